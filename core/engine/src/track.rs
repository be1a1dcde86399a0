//! Track entity and its lifecycle.
//!
//! A track is born from an unmatched detection, stays `Active` while it
//! keeps matching, drops to `Lost` after a missed frame (box held at the
//! last known position), and is removed by the tracker once its miss count
//! exceeds the grace period. IDs are monotonic and never reused in-process.

use chrono::{DateTime, Utc};
use lookout_protocol::{BoundingBox, TrackEntry, TrackPhase};

/// One raw per-frame observation from the detector collaborator.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }

    /// Boundary validation: a detection the tracker is willing to consume.
    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid() && self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Active,
    Lost,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    /// Sticky: assigned at birth, association never matches across classes.
    pub class_name: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_frame: u64,
    pub misses: u32,
    pub state: TrackState,
}

impl Track {
    pub fn born(id: u64, detection: &Detection, frame_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            class_name: detection.class_name.clone(),
            bbox: detection.bbox,
            confidence: detection.confidence,
            first_seen: timestamp,
            last_seen: timestamp,
            last_frame: frame_number,
            misses: 0,
            state: TrackState::Active,
        }
    }

    /// A matched detection replaces box and confidence outright; no smoothing.
    pub fn apply_match(&mut self, detection: &Detection, frame_number: u64, timestamp: DateTime<Utc>) {
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.last_seen = timestamp;
        self.last_frame = frame_number;
        self.misses = 0;
        self.state = TrackState::Active;
    }

    /// No match this frame. The box is held at the last known position.
    pub fn apply_miss(&mut self) {
        self.misses = self.misses.saturating_add(1);
        self.state = TrackState::Lost;
    }

    pub fn observation(&self, frame_number: u64, timestamp: DateTime<Utc>) -> TrackObservation {
        TrackObservation {
            track_id: self.id,
            class_name: self.class_name.clone(),
            confidence: self.confidence,
            bbox: self.bbox,
            frame_number,
            timestamp,
            first_seen: self.first_seen,
        }
    }

    pub fn entry(&self, jpeg_url: Option<String>, gif_url: Option<String>) -> TrackEntry {
        TrackEntry {
            track_id: self.id,
            class_name: self.class_name.clone(),
            confidence: self.confidence,
            bbox: self.bbox,
            frame_number: self.last_frame,
            timestamp: rfc3339(self.last_seen),
            first_seen: rfc3339(self.first_seen),
            phase: match self.state {
                TrackState::Active => TrackPhase::Active,
                TrackState::Lost => TrackPhase::Lost,
            },
            jpeg_url,
            gif_url,
        }
    }
}

fn rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Payload handed to the session ledger for birth/match events.
#[derive(Debug, Clone)]
pub struct TrackObservation {
    pub track_id: u64,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
}

/// Per-frame transition reported by `Tracker::update`.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    Created(TrackObservation),
    Updated(TrackObservation),
    Lost {
        track_id: u64,
        class_name: String,
        last_seen: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(conf: f32) -> Detection {
        Detection::new("person", conf, BoundingBox::new(10.0, 10.0, 50.0, 50.0))
    }

    #[test]
    fn birth_starts_active_with_zero_misses() {
        let track = Track::born(1, &detection(0.8), 1, Utc::now());
        assert_eq!(track.state, TrackState::Active);
        assert_eq!(track.misses, 0);
        assert_eq!(track.first_seen, track.last_seen);
    }

    #[test]
    fn match_resets_misses_and_replaces_box() {
        let mut track = Track::born(1, &detection(0.8), 1, Utc::now());
        track.apply_miss();
        track.apply_miss();
        assert_eq!(track.state, TrackState::Lost);
        assert_eq!(track.misses, 2);

        let update = Detection::new("person", 0.6, BoundingBox::new(12.0, 11.0, 50.0, 50.0));
        track.apply_match(&update, 4, Utc::now());
        assert_eq!(track.state, TrackState::Active);
        assert_eq!(track.misses, 0);
        assert_eq!(track.bbox, update.bbox);
        assert_eq!(track.confidence, 0.6);
    }

    #[test]
    fn miss_holds_last_position() {
        let mut track = Track::born(1, &detection(0.8), 1, Utc::now());
        let held = track.bbox;
        track.apply_miss();
        assert_eq!(track.bbox, held);
    }

    #[test]
    fn invalid_detections_are_flagged() {
        assert!(detection(0.5).is_valid());
        assert!(!detection(1.5).is_valid());
        assert!(!detection(f32::NAN).is_valid());
        assert!(!Detection::new("person", 0.5, BoundingBox::new(0.0, 0.0, -1.0, 5.0)).is_valid());
    }
}
