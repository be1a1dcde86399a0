//! Rolling performance metrics for the frame pipeline.
//!
//! FPS is derived from the span of a bounded window of frame completion
//! times rather than instantaneous deltas, so a single slow frame does not
//! whipsaw the reported rate.

use std::collections::VecDeque;
use std::time::Instant;

use lookout_protocol::MetricsSnapshot;

const WINDOW: usize = 120;

pub struct MetricsRecorder {
    frame_times: VecDeque<Instant>,
    frame_ms: VecDeque<f64>,
    last_inference_ms: f64,
    total_detections: u64,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(WINDOW),
            frame_ms: VecDeque::with_capacity(WINDOW),
            last_inference_ms: 0.0,
            total_detections: 0,
        }
    }

    /// Record one processed (non-skipped) frame and its inference latency.
    pub fn record_frame(&mut self, inference_ms: f64) {
        if self.frame_times.len() == WINDOW {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(Instant::now());

        if self.frame_ms.len() == WINDOW {
            self.frame_ms.pop_front();
        }
        self.frame_ms.push_back(inference_ms);
        self.last_inference_ms = inference_ms;
    }

    pub fn record_detections(&mut self, count: usize) {
        self.total_detections = self.total_detections.saturating_add(count as u64);
    }

    pub fn total_detections(&self) -> u64 {
        self.total_detections
    }

    pub fn snapshot(
        &self,
        frame_number: u64,
        active_tracks: usize,
        invalid_detections: u64,
        dropped_artifacts: u64,
        session_id: &str,
    ) -> MetricsSnapshot {
        let fps = match (self.frame_times.front(), self.frame_times.back()) {
            (Some(first), Some(last)) if self.frame_times.len() >= 2 => {
                let span = last.duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.frame_times.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let avg_frame_ms = if self.frame_ms.is_empty() {
            0.0
        } else {
            self.frame_ms.iter().sum::<f64>() / self.frame_ms.len() as f64
        };

        MetricsSnapshot {
            fps,
            avg_frame_ms,
            last_inference_ms: self.last_inference_ms,
            frame_number,
            active_tracks,
            total_detections: self.total_detections,
            invalid_detections,
            dropped_artifacts,
            session_id: session_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_recorder_reports_zeroes() {
        let recorder = MetricsRecorder::new();
        let snapshot = recorder.snapshot(0, 0, 0, 0, "s");
        assert_eq!(snapshot.fps, 0.0);
        assert_eq!(snapshot.avg_frame_ms, 0.0);
        assert_eq!(snapshot.total_detections, 0);
    }

    #[test]
    fn averages_frame_latency_over_window() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_frame(10.0);
        recorder.record_frame(20.0);
        recorder.record_frame(30.0);
        let snapshot = recorder.snapshot(3, 1, 0, 0, "s");
        assert!((snapshot.avg_frame_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.last_inference_ms, 30.0);
    }

    #[test]
    fn window_is_bounded() {
        let mut recorder = MetricsRecorder::new();
        for _ in 0..(WINDOW + 50) {
            recorder.record_frame(1.0);
        }
        assert_eq!(recorder.frame_ms.len(), WINDOW);
        assert_eq!(recorder.frame_times.len(), WINDOW);
    }

    #[test]
    fn detection_counter_accumulates() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_detections(3);
        recorder.record_detections(2);
        assert_eq!(recorder.total_detections(), 5);
    }
}
