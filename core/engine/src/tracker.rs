//! Per-frame detection-to-track association.
//!
//! Greedy bipartite matching on IoU cost: cheap, deterministic, and good
//! enough at video frame rates. Exact optimal assignment is intentionally
//! not attempted.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::geometry::iou;
use crate::track::{Detection, Track, TrackEvent};

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Minimum IoU for a (track, detection) pair to be matchable at all.
    pub min_iou: f32,
    /// Consecutive missed frames tolerated before a track is removed.
    pub max_age: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_age: 30,
        }
    }
}

pub struct Tracker {
    config: TrackerConfig,
    next_id: u64,
    tracks: Vec<Track>,
    invalid_dropped: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            tracks: Vec::new(),
            invalid_dropped: 0,
        }
    }

    /// Consume one frame's detections and report every track transition.
    ///
    /// Never fails: malformed detections are dropped with a warning, and the
    /// returned event list is always consistent with the surviving track set.
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame_number: u64,
        timestamp: DateTime<Utc>,
        show_confidence: f32,
    ) -> Vec<TrackEvent> {
        let valid: Vec<&Detection> = detections
            .iter()
            .filter(|det| {
                if det.is_valid() {
                    true
                } else {
                    self.invalid_dropped = self.invalid_dropped.saturating_add(1);
                    warn!(
                        class = %det.class_name,
                        confidence = det.confidence,
                        frame = frame_number,
                        "Dropping malformed detection"
                    );
                    false
                }
            })
            .collect();

        // All matchable pairs, ordered by ascending cost with deterministic
        // tie-breaks: lower track ID first, then higher detection confidence.
        let mut pairs: Vec<(f32, u64, f32, usize, usize)> = Vec::new();
        for (t_idx, track) in self.tracks.iter().enumerate() {
            for (d_idx, det) in valid.iter().enumerate() {
                if track.class_name != det.class_name {
                    continue;
                }
                let overlap = iou(&track.bbox, &det.bbox);
                if overlap < self.config.min_iou {
                    continue;
                }
                pairs.push((1.0 - overlap, track.id, det.confidence, t_idx, d_idx));
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| b.2.total_cmp(&a.2))
        });

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; valid.len()];
        let mut events = Vec::new();

        for (_, _, _, t_idx, d_idx) in pairs {
            if track_matched[t_idx] || det_matched[d_idx] {
                continue;
            }
            track_matched[t_idx] = true;
            det_matched[d_idx] = true;
            let track = &mut self.tracks[t_idx];
            track.apply_match(valid[d_idx], frame_number, timestamp);
            events.push(TrackEvent::Updated(track.observation(frame_number, timestamp)));
        }

        // Births: unmatched detections above the show threshold.
        for (d_idx, det) in valid.iter().enumerate() {
            if det_matched[d_idx] || det.confidence < show_confidence {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let track = Track::born(id, *det, frame_number, timestamp);
            events.push(TrackEvent::Created(track.observation(frame_number, timestamp)));
            self.tracks.push(track);
            track_matched.push(true);
        }

        // Misses and deaths for everything left unmatched.
        let max_age = self.config.max_age;
        let mut retained = Vec::with_capacity(self.tracks.len());
        for (t_idx, mut track) in std::mem::take(&mut self.tracks).into_iter().enumerate() {
            if !track_matched[t_idx] {
                track.apply_miss();
            }
            if track.misses > max_age {
                debug!(track_id = track.id, class = %track.class_name, "Track removed");
                events.push(TrackEvent::Lost {
                    track_id: track.id,
                    class_name: track.class_name.clone(),
                    last_seen: track.last_seen,
                });
            } else {
                retained.push(track);
            }
        }
        self.tracks = retained;

        events
    }

    pub fn active_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Lifetime count of malformed detections dropped at the boundary.
    pub fn invalid_dropped(&self) -> u64 {
        self.invalid_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackState;
    use lookout_protocol::BoundingBox;

    const SHOW: f32 = 0.5;

    fn det(class: &str, conf: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(class, conf, BoundingBox::new(x, y, w, h))
    }

    fn tracker(max_age: u32) -> Tracker {
        Tracker::new(TrackerConfig {
            min_iou: 0.3,
            max_age,
        })
    }

    fn created_ids(events: &[TrackEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::Created(obs) => Some(obs.track_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ids_are_strictly_increasing_and_never_reused() {
        let mut tracker = tracker(0);
        let mut seen = Vec::new();
        // Alternate appearing/disappearing objects so tracks die between births.
        for round in 0..5u64 {
            let offset = round as f32 * 200.0;
            let events = tracker.update(
                &[det("person", 0.9, offset, 0.0, 20.0, 20.0)],
                round * 2 + 1,
                Utc::now(),
                SHOW,
            );
            seen.extend(created_ids(&events));
            // Empty frame kills the track (max_age = 0).
            tracker.update(&[], round * 2 + 2, Utc::now(), SHOW);
        }
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen, sorted, "IDs must be strictly increasing, never reused");
    }

    #[test]
    fn continuously_matched_track_stays_active_with_zero_misses() {
        let mut tracker = tracker(5);
        tracker.update(&[det("car", 0.9, 100.0, 100.0, 60.0, 40.0)], 1, Utc::now(), SHOW);
        for frame in 2..30u64 {
            let drift = frame as f32 * 0.5;
            tracker.update(
                &[det("car", 0.8, 100.0 + drift, 100.0, 60.0, 40.0)],
                frame,
                Utc::now(),
                SHOW,
            );
            let track = &tracker.active_tracks()[0];
            assert_eq!(track.state, TrackState::Active);
            assert_eq!(track.misses, 0);
            assert_eq!(track.id, 1);
        }
    }

    #[test]
    fn unmatched_track_is_removed_after_grace_with_one_lost_event() {
        let max_age = 3;
        let mut tracker = tracker(max_age);
        tracker.update(&[det("person", 0.9, 10.0, 10.0, 50.0, 50.0)], 1, Utc::now(), SHOW);

        let mut lost_events = 0;
        for frame in 2..=(2 + max_age as u64 + 2) {
            let events = tracker.update(&[], frame, Utc::now(), SHOW);
            lost_events += events
                .iter()
                .filter(|e| matches!(e, TrackEvent::Lost { .. }))
                .count();
        }
        assert_eq!(lost_events, 1, "exactly one lost event");
        assert!(tracker.active_tracks().is_empty());
    }

    #[test]
    fn different_classes_never_share_a_track() {
        let mut tracker = tracker(5);
        tracker.update(&[det("person", 0.9, 10.0, 10.0, 50.0, 50.0)], 1, Utc::now(), SHOW);
        let events = tracker.update(&[det("dog", 0.9, 10.0, 10.0, 50.0, 50.0)], 2, Utc::now(), SHOW);
        // Identical box, different class: must be a birth, not a match.
        assert_eq!(created_ids(&events), vec![2]);
        assert_eq!(tracker.active_tracks().len(), 2);
    }

    #[test]
    fn association_is_deterministic_across_runs() {
        let frames: Vec<Vec<Detection>> = vec![
            vec![
                det("car", 0.9, 0.0, 0.0, 40.0, 30.0),
                det("car", 0.8, 100.0, 0.0, 40.0, 30.0),
            ],
            vec![
                det("car", 0.7, 98.0, 2.0, 40.0, 30.0),
                det("car", 0.85, 2.0, 1.0, 40.0, 30.0),
            ],
            vec![det("car", 0.6, 4.0, 2.0, 40.0, 30.0)],
        ];

        let run = || {
            let mut tracker = tracker(5);
            let mut log = Vec::new();
            for (i, dets) in frames.iter().enumerate() {
                let events = tracker.update(dets, i as u64 + 1, Utc::now(), SHOW);
                for event in &events {
                    log.push(match event {
                        TrackEvent::Created(o) => format!("created:{}", o.track_id),
                        TrackEvent::Updated(o) => format!("updated:{}", o.track_id),
                        TrackEvent::Lost { track_id, .. } => format!("lost:{}", track_id),
                    });
                }
            }
            log
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn equal_cost_ties_break_toward_lower_track_id() {
        let mut tracker = tracker(5);
        tracker.update(
            &[
                det("car", 0.9, 0.0, 0.0, 20.0, 10.0),
                det("car", 0.9, 10.0, 0.0, 20.0, 10.0),
            ],
            1,
            Utc::now(),
            SHOW,
        );
        // Equidistant between both tracks: equal IoU, so track 1 wins.
        let events = tracker.update(&[det("car", 0.9, 5.0, 0.0, 20.0, 10.0)], 2, Utc::now(), SHOW);
        let updated: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::Updated(o) => Some(o.track_id),
                _ => None,
            })
            .collect();
        assert_eq!(updated, vec![1]);
    }

    #[test]
    fn malformed_detection_is_dropped_without_aborting_the_frame() {
        let mut tracker = tracker(5);
        let events = tracker.update(
            &[
                det("person", 1.7, 10.0, 10.0, 50.0, 50.0),
                det("person", 0.8, 0.0, 0.0, -5.0, 50.0),
                det("person", 0.8, 200.0, 200.0, 50.0, 50.0),
            ],
            1,
            Utc::now(),
            SHOW,
        );
        assert_eq!(created_ids(&events).len(), 1);
        assert_eq!(tracker.invalid_dropped(), 2);
    }

    #[test]
    fn below_show_threshold_detections_do_not_create_tracks() {
        let mut tracker = tracker(5);
        let events = tracker.update(&[det("person", 0.3, 10.0, 10.0, 50.0, 50.0)], 1, Utc::now(), SHOW);
        assert!(events.is_empty());
        assert!(tracker.active_tracks().is_empty());
    }

    #[test]
    fn low_confidence_match_still_updates_existing_track() {
        // The show threshold gates births, not matches.
        let mut tracker = tracker(5);
        tracker.update(&[det("person", 0.9, 10.0, 10.0, 50.0, 50.0)], 1, Utc::now(), SHOW);
        let events = tracker.update(&[det("person", 0.2, 11.0, 10.0, 50.0, 50.0)], 2, Utc::now(), SHOW);
        assert!(matches!(events[0], TrackEvent::Updated(_)));
        assert_eq!(tracker.active_tracks()[0].confidence, 0.2);
    }

    #[test]
    fn worked_example_from_contract() {
        let max_age = 3;
        let mut tracker = tracker(max_age);

        let events = tracker.update(&[det("person", 0.8, 10.0, 10.0, 50.0, 50.0)], 1, Utc::now(), SHOW);
        assert_eq!(created_ids(&events), vec![1]);

        let events = tracker.update(&[det("person", 0.75, 12.0, 11.0, 50.0, 50.0)], 2, Utc::now(), SHOW);
        assert!(
            matches!(&events[..], [TrackEvent::Updated(o)] if o.track_id == 1),
            "high-IoU same-class detection must update track 1, not create"
        );

        let mut lost = 0;
        for frame in 3..=(3 + max_age as u64 + 1) {
            let events = tracker.update(&[], frame, Utc::now(), SHOW);
            lost += events
                .iter()
                .filter(|e| matches!(e, TrackEvent::Lost { track_id: 1, .. }))
                .count();
        }
        assert_eq!(lost, 1);
        assert!(tracker.active_tracks().is_empty());
    }
}
