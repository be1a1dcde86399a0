//! Session ledger: the single owner of the active session.
//!
//! The producer thread records track events and periodically flushes them;
//! consumers query and delete through the same handle. The active-session
//! lock covers metadata only — detection batches and session rows are
//! written to SQLite outside it.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::config::DetectionSettings;
use crate::db::{Db, SessionRow};
use crate::error::{EngineError, Result};
use crate::frame::FrameBuffer;
use crate::media::{MediaRefs, MediaStore};
use crate::track::{TrackEvent, TrackObservation};
use lookout_protocol::{
    DetectionKind, DetectionRecord, SessionSummary, DEFAULT_DETECTION_QUERY_LIMIT,
    MAX_DETECTION_QUERY_LIMIT,
};

const FLUSH_INTERVAL_SECS: i64 = 30;

struct ActiveSession {
    session_id: String,
    created_at: DateTime<Utc>,
    detections: u64,
    tracks: u64,
    classes: HashSet<String>,
    pending: Vec<DetectionRecord>,
    last_flush: DateTime<Utc>,
}

impl ActiveSession {
    fn start(now: DateTime<Utc>, previous_id: Option<&str>) -> Self {
        let mut session_id = now.format("%Y%m%d_%H%M%S").to_string();
        if previous_id == Some(session_id.as_str()) {
            // Same-second rollover; disambiguate with milliseconds.
            session_id = now.format("%Y%m%d_%H%M%S%3f").to_string();
        }
        Self {
            session_id,
            created_at: now,
            detections: 0,
            tracks: 0,
            classes: HashSet::new(),
            pending: Vec::new(),
            last_flush: now,
        }
    }

    fn row(&self, media: &MediaStore, closed_at: Option<String>) -> SessionRow {
        let (size_bytes, gifs) = media.usage(&self.session_id);
        let mut classes: Vec<String> = self.classes.iter().cloned().collect();
        classes.sort();
        SessionRow {
            session_id: self.session_id.clone(),
            created_at: rfc3339(self.created_at),
            closed_at,
            detections: self.detections,
            tracks: self.tracks,
            gifs,
            size_bytes,
            classes,
        }
    }
}

pub struct SessionLedger {
    db: Db,
    media: MediaStore,
    active: Mutex<ActiveSession>,
}

impl SessionLedger {
    /// Open the ledger and roll over to a fresh session, as happens on
    /// every process start.
    pub fn open(db: Db, media: MediaStore) -> Result<Self> {
        let active = ActiveSession::start(Utc::now(), None);
        info!(session_id = %active.session_id, "Session started");
        let ledger = Self {
            db,
            media,
            active: Mutex::new(active),
        };
        ledger.flush()?;
        Ok(ledger)
    }

    pub fn active_session_id(&self) -> String {
        self.lock_active().session_id.clone()
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    /// Record one frame's track events. Detections at or above the show
    /// threshold land in the log; those at or above the save threshold also
    /// trigger a media capture. Returns the number of entries recorded.
    pub fn handle_events(
        &self,
        events: &[TrackEvent],
        frame: &FrameBuffer,
        settings: &DetectionSettings,
    ) -> u64 {
        let mut recorded = 0u64;
        let mut captures: Vec<(String, TrackObservation)> = Vec::new();
        {
            let mut active = self.lock_active();
            for event in events {
                match event {
                    TrackEvent::Created(obs) | TrackEvent::Updated(obs) => {
                        if obs.confidence < settings.confidence {
                            continue;
                        }
                        let kind = match event {
                            TrackEvent::Created(_) => DetectionKind::Created,
                            _ => DetectionKind::Updated,
                        };
                        if kind == DetectionKind::Created {
                            active.tracks += 1;
                        }
                        active.detections += 1;
                        active.classes.insert(obs.class_name.clone());
                        let record = DetectionRecord {
                            session_id: active.session_id.clone(),
                            track_id: obs.track_id,
                            class_name: obs.class_name.clone(),
                            confidence: obs.confidence,
                            bbox: obs.bbox,
                            frame_number: obs.frame_number,
                            recorded_at: rfc3339(obs.timestamp),
                            kind,
                        };
                        active.pending.push(record);
                        recorded += 1;

                        if obs.confidence >= settings.save_confidence {
                            captures.push((active.session_id.clone(), obs.clone()));
                        }
                    }
                    TrackEvent::Lost { track_id, .. } => {
                        debug!(track_id, session_id = %active.session_id, "Track lost");
                    }
                }
            }
        }
        for (session_id, obs) in captures {
            self.media
                .store(&session_id, obs.track_id, frame, &obs.bbox, obs.timestamp);
        }
        recorded
    }

    /// Flush pending detections if the interval has elapsed.
    pub fn maybe_flush(&self, now: DateTime<Utc>) -> Result<()> {
        let due = {
            let active = self.lock_active();
            now.signed_duration_since(active.last_flush) >= Duration::seconds(FLUSH_INTERVAL_SECS)
        };
        if due {
            self.flush()?;
        }
        Ok(())
    }

    /// Write pending detection entries and the current session counters.
    pub fn flush(&self) -> Result<()> {
        let (batch, row) = {
            let mut active = self.lock_active();
            active.last_flush = Utc::now();
            let batch = std::mem::take(&mut active.pending);
            (batch, active.row(&self.media, None))
        };
        if !batch.is_empty() {
            debug!(count = batch.len(), session_id = %row.session_id, "Flushing detection batch");
        }
        self.db.insert_detections(&batch)?;
        self.db.upsert_session(&row)?;
        Ok(())
    }

    /// Freeze the current session and open a new one. Returns the new id.
    pub fn close_active(&self) -> Result<String> {
        self.flush()?;
        let now = Utc::now();
        let (closed_row, new_id) = {
            let mut active = self.lock_active();
            let previous_id = active.session_id.clone();
            let previous =
                std::mem::replace(&mut *active, ActiveSession::start(now, Some(&previous_id)));
            let closed_row = previous.row(&self.media, Some(rfc3339(now)));
            (closed_row, active.session_id.clone())
        };
        self.media.finish_session(&closed_row.session_id);
        // finish_session waits for the encoder, so final counts are in.
        let (size_bytes, gifs) = self.media.usage(&closed_row.session_id);
        let closed_row = SessionRow {
            size_bytes,
            gifs,
            ..closed_row
        };
        self.db.upsert_session(&closed_row)?;
        info!(
            closed = %closed_row.session_id,
            opened = %new_id,
            detections = closed_row.detections,
            "Session rolled over"
        );
        self.flush()?;
        Ok(new_id)
    }

    /// All sessions, newest first, active flagged. The active session's
    /// counters come from the live in-memory state, not the last flush.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let active_id = self.active_session_id();
        let rows = self.db.list_sessions()?;
        Ok(rows
            .into_iter()
            .map(|row| summarize(self.overlay_active(row), &active_id))
            .collect())
    }

    pub fn get_session(&self, session_id: &str) -> Result<SessionSummary> {
        let active_id = self.active_session_id();
        let row = self
            .db
            .get_session(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        Ok(summarize(self.overlay_active(row), &active_id))
    }

    fn overlay_active(&self, row: SessionRow) -> SessionRow {
        let active = self.lock_active();
        if row.session_id == active.session_id {
            active.row(&self.media, None)
        } else {
            row
        }
    }

    /// Delete a closed session: its metadata, detection log, and media
    /// artifacts, canceling any in-flight captures.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        if session_id == self.active_session_id() {
            return Err(EngineError::ActiveSessionConflict(session_id.to_string()));
        }
        if self.db.get_session(session_id)?.is_none() {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }
        self.media.cancel_session(session_id)?;
        self.db.delete_session(session_id)?;
        info!(session_id, "Session deleted");
        Ok(())
    }

    /// Most recent detection-log entries, newest window in chronological
    /// order. Defaults to the active session.
    pub fn detections(&self, session_id: Option<&str>, limit: Option<usize>) -> Result<Vec<DetectionRecord>> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.active_session_id(),
        };
        let limit = limit
            .unwrap_or(DEFAULT_DETECTION_QUERY_LIMIT)
            .min(MAX_DETECTION_QUERY_LIMIT);
        self.db.list_detections(&session_id, limit)
    }

    pub fn media_refs(&self, track_id: u64) -> MediaRefs {
        let session_id = self.active_session_id();
        self.media.refs_for(&session_id, track_id)
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveSession> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn summarize(row: SessionRow, active_id: &str) -> SessionSummary {
    let active = row.session_id == active_id;
    SessionSummary {
        session_id: row.session_id,
        created_at: row.created_at,
        closed_at: row.closed_at,
        active,
        detections: row.detections,
        tracks: row.tracks,
        gifs: row.gifs,
        classes: row.classes,
        size_bytes: row.size_bytes,
    }
}

fn rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
