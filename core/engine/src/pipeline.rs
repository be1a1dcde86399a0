//! The frame pipeline: one producer turning frames into published state.
//!
//! Capture and inference stay behind narrow traits; everything downstream —
//! association, session recording, media capture, snapshot publication —
//! runs strictly sequentially here and never waits on a consumer.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::config::{EngineConfig, SharedSettings};
use crate::db::Db;
use crate::error::Result;
use crate::frame::FrameBuffer;
use crate::media::MediaStore;
use crate::metrics::MetricsRecorder;
use crate::session::SessionLedger;
use crate::track::Detection;
use crate::tracker::Tracker;
use lookout_protocol::{TrackEntry, TracksSnapshot};

/// Frame acquisition collaborator. Frame rate is not controlled here.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<(FrameBuffer, DateTime<Utc>)>;
}

/// Detector collaborator. May be slow; its latency is reported, not managed.
pub trait Detector {
    fn infer(&mut self, frame: &FrameBuffer, image_size: u32) -> Vec<Detection>;
}

/// Consumer-facing handles: everything the transport layer needs.
#[derive(Clone)]
pub struct EngineHandle {
    pub ledger: Arc<SessionLedger>,
    pub broadcaster: Arc<Broadcaster>,
    pub settings: SharedSettings,
}

pub struct Pipeline {
    tracker: Tracker,
    ledger: Arc<SessionLedger>,
    broadcaster: Arc<Broadcaster>,
    settings: SharedSettings,
    metrics: MetricsRecorder,
    frame_number: u64,
    skip_counter: u32,
}

impl Pipeline {
    pub fn new(config: &EngineConfig) -> Result<(Self, EngineHandle)> {
        let db = Db::new(config.storage.db_path())?;
        let media = MediaStore::open(config.storage.media_root(), config.media)?;
        let ledger = Arc::new(SessionLedger::open(db, media)?);
        let broadcaster = Arc::new(Broadcaster::new());
        let settings = SharedSettings::new(config.detection);

        let handle = EngineHandle {
            ledger: Arc::clone(&ledger),
            broadcaster: Arc::clone(&broadcaster),
            settings: settings.clone(),
        };
        let pipeline = Self {
            tracker: Tracker::new(config.tracker.into()),
            ledger,
            broadcaster,
            settings,
            metrics: MetricsRecorder::new(),
            frame_number: 0,
            skip_counter: 0,
        };
        Ok((pipeline, handle))
    }

    /// Drive the pipeline until the source is exhausted.
    pub fn run(&mut self, source: &mut dyn FrameSource, detector: &mut dyn Detector) {
        while let Some((frame, timestamp)) = source.next_frame() {
            self.process_frame(detector, &frame, timestamp);
        }
        if let Err(err) = self.ledger.flush() {
            warn!(error = %err, "Final ledger flush failed");
        }
        info!(frames = self.frame_number, "Frame loop ended");
    }

    /// One frame through the full pipeline. Settings are read once at the
    /// top, so config patches apply atomically between frames.
    pub fn process_frame(&mut self, detector: &mut dyn Detector, frame: &FrameBuffer, timestamp: DateTime<Utc>) {
        self.frame_number += 1;
        let settings = self.settings.current();

        if settings.skip_frames > 0 {
            self.skip_counter += 1;
            if self.skip_counter <= settings.skip_frames {
                return;
            }
            self.skip_counter = 0;
        }

        let started = Instant::now();
        let detections = detector.infer(frame, settings.image_size);
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

        let events = self.tracker.update(
            &detections,
            self.frame_number,
            timestamp,
            settings.confidence,
        );
        let recorded = self.ledger.handle_events(&events, frame, &settings);

        if let Err(err) = self.ledger.maybe_flush(timestamp) {
            warn!(error = %err, "Ledger flush failed; retrying next interval");
        }

        self.metrics.record_frame(inference_ms);
        self.metrics.record_detections(recorded as usize);
        self.broadcaster.publish(self.snapshot());
    }

    fn snapshot(&self) -> TracksSnapshot {
        let session_id = self.ledger.active_session_id();
        let tracks: Vec<TrackEntry> = self
            .tracker
            .active_tracks()
            .iter()
            .map(|track| {
                let refs = self.ledger.media_refs(track.id);
                track.entry(refs.jpeg_url, refs.gif_url)
            })
            .collect();
        let metrics = self.metrics.snapshot(
            self.frame_number,
            tracks.len(),
            self.tracker.invalid_dropped(),
            self.ledger.media().dropped_artifacts(),
            &session_id,
        );
        TracksSnapshot {
            frame_number: self.frame_number,
            tracks,
            metrics,
        }
    }
}
