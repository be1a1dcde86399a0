//! Media artifact store: JPEG crops and GIF animations for qualifying
//! detections.
//!
//! The frame loop only clips the crop and enqueues a job on a bounded
//! channel; all encoding and file I/O happens on a background worker. A full
//! queue drops the job with a warning instead of blocking the producer.
//! Each session has a byte budget enforced by FIFO eviction after every
//! write.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Delay, ExtendedColorType, Frame as AnimationFrame, RgbImage, RgbaImage};
use tracing::{debug, info, warn};

use crate::config::MediaSection;
use crate::error::{EngineError, Result};
use crate::frame::FrameBuffer;
use lookout_protocol::BoundingBox;

const WORKER_TICK: Duration = Duration::from_millis(200);

/// Relative artifact paths for one track, as exposed in snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaRefs {
    pub jpeg_url: Option<String>,
    pub gif_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    Still,
    Animation,
}

#[derive(Debug, Clone)]
struct ArtifactRecord {
    rel_path: String,
    bytes: u64,
    track_id: u64,
    kind: ArtifactKind,
}

#[derive(Default)]
struct SessionUsage {
    /// FIFO eviction order: oldest stored artifact first.
    artifacts: VecDeque<ArtifactRecord>,
    bytes: u64,
    gifs: u64,
    refs: HashMap<u64, MediaRefs>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, SessionUsage>,
    canceled: HashSet<String>,
    dropped_artifacts: u64,
}

enum Job {
    Capture {
        session_id: String,
        track_id: u64,
        crop: FrameBuffer,
        timestamp: DateTime<Utc>,
    },
    FinishSession {
        session_id: String,
        ack: Sender<()>,
    },
    Shutdown,
}

pub struct MediaStore {
    root: PathBuf,
    jobs: Sender<Job>,
    registry: Arc<Mutex<Registry>>,
    worker: Option<JoinHandle<()>>,
}

impl MediaStore {
    pub fn open(root: PathBuf, config: MediaSection) -> Result<Self> {
        fs_err::create_dir_all(&root)
            .map_err(|err| EngineError::io(format!("create {}", root.display()), err))?;

        let registry = Arc::new(Mutex::new(Registry::default()));
        let (tx, rx) = bounded::<Job>(config.queue_capacity.max(1));

        let mut worker = EncoderWorker::new(root.clone(), config, Arc::clone(&registry));
        let handle = thread::spawn(move || worker.run(rx));

        Ok(Self {
            root,
            jobs: tx,
            registry,
            worker: Some(handle),
        })
    }

    /// Queue a crop of `frame` under `bbox` for track `track_id`.
    ///
    /// Returns immediately; the artifact reference appears in `refs_for`
    /// once the worker has written it. A full queue drops the capture.
    pub fn store(&self, session_id: &str, track_id: u64, frame: &FrameBuffer, bbox: &BoundingBox, timestamp: DateTime<Utc>) {
        let crop = frame.crop(bbox);
        let job = Job::Capture {
            session_id: session_id.to_string(),
            track_id,
            crop,
            timestamp,
        };
        if self.jobs.try_send(job).is_err() {
            let mut registry = self.lock_registry();
            registry.dropped_artifacts = registry.dropped_artifacts.saturating_add(1);
            warn!(session_id, track_id, "Media queue full; capture dropped");
        }
    }

    /// Flush any pending animations for a session being closed and wait for
    /// the encoder to drain them. Runs off the hot path only.
    pub fn finish_session(&self, session_id: &str) {
        let (ack_tx, ack_rx) = bounded(1);
        if self
            .jobs
            .send(Job::FinishSession {
                session_id: session_id.to_string(),
                ack: ack_tx,
            })
            .is_ok()
        {
            let _ = ack_rx.recv_timeout(Duration::from_secs(5));
        }
    }

    /// Discard in-flight and future work for a deleted session and remove
    /// its artifact directory.
    pub fn cancel_session(&self, session_id: &str) -> Result<()> {
        {
            let mut registry = self.lock_registry();
            registry.canceled.insert(session_id.to_string());
            registry.sessions.remove(session_id);
        }
        let dir = self.session_dir(session_id);
        if dir.is_dir() {
            fs_err::remove_dir_all(&dir)
                .map_err(|err| EngineError::io(format!("remove {}", dir.display()), err))?;
        }
        info!(session_id, "Session media removed");
        Ok(())
    }

    pub fn refs_for(&self, session_id: &str, track_id: u64) -> MediaRefs {
        self.lock_registry()
            .sessions
            .get(session_id)
            .and_then(|usage| usage.refs.get(&track_id).cloned())
            .unwrap_or_default()
    }

    /// Current stored bytes and generated animation count for a session.
    pub fn usage(&self, session_id: &str) -> (u64, u64) {
        self.lock_registry()
            .sessions
            .get(session_id)
            .map(|usage| (usage.bytes, usage.gifs))
            .unwrap_or((0, 0))
    }

    pub fn dropped_artifacts(&self) -> u64 {
        self.lock_registry().dropped_artifacts
    }

    /// Resolve a relative artifact reference to a servable path.
    pub fn resolve(&self, rel_path: &str) -> Result<PathBuf> {
        if rel_path.split('/').any(|part| part == "..") || rel_path.starts_with('/') {
            return Err(EngineError::ArtifactNotFound(rel_path.to_string()));
        }
        let path = self.root.join(rel_path);
        if !path.is_file() {
            return Err(EngineError::ArtifactNotFound(rel_path.to_string()));
        }
        Ok(path)
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("session_{}", session_id))
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MediaStore {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

struct AnimationBuffer {
    frames: Vec<RgbImage>,
    started: DateTime<Utc>,
    done: bool,
}

/// Background encoder. Owns the animation buffers; shares the artifact
/// registry with the producer side.
struct EncoderWorker {
    root: PathBuf,
    config: MediaSection,
    registry: Arc<Mutex<Registry>>,
    buffers: HashMap<(String, u64), AnimationBuffer>,
}

impl EncoderWorker {
    fn new(root: PathBuf, config: MediaSection, registry: Arc<Mutex<Registry>>) -> Self {
        Self {
            root,
            config,
            registry,
            buffers: HashMap::new(),
        }
    }

    fn run(&mut self, rx: Receiver<Job>) {
        loop {
            match rx.recv_timeout(WORKER_TICK) {
                Ok(Job::Shutdown) => break,
                Ok(job) => self.handle(job),
                Err(RecvTimeoutError::Timeout) => self.sweep_expired(Utc::now()),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle(&mut self, job: Job) {
        match job {
            Job::Capture {
                session_id,
                track_id,
                crop,
                timestamp,
            } => self.handle_capture(&session_id, track_id, crop, timestamp),
            Job::FinishSession { session_id, ack } => {
                self.finish_session(&session_id);
                let _ = ack.send(());
            }
            Job::Shutdown => {}
        }
    }

    fn handle_capture(&mut self, session_id: &str, track_id: u64, crop: FrameBuffer, timestamp: DateTime<Utc>) {
        if self.is_canceled(session_id) {
            debug!(session_id, track_id, "Skipping capture for canceled session");
            return;
        }

        let Some(rgb) = RgbImage::from_raw(crop.width(), crop.height(), crop.data().to_vec()) else {
            warn!(session_id, track_id, "Unusable crop buffer");
            return;
        };

        if !self.has_still(session_id, track_id) {
            self.write_still(session_id, track_id, &rgb);
        }
        self.buffer_animation_frame(session_id, track_id, rgb, timestamp);
    }

    fn write_still(&mut self, session_id: &str, track_id: u64, rgb: &RgbImage) {
        let started = Instant::now();
        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, 85);
        if let Err(err) = encoder.encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        ) {
            warn!(session_id, track_id, error = %err, "JPEG encode failed");
            self.count_drop();
            return;
        }
        if self.over_budget(started) {
            warn!(session_id, track_id, "JPEG encode exceeded time budget; dropped");
            self.count_drop();
            return;
        }

        let file_name = format!("track_{}.jpg", track_id);
        match self.write_artifact(session_id, &file_name, &encoded) {
            Some(rel_path) => {
                info!(session_id, track_id, path = %rel_path, "Saved track crop");
                self.record_artifact(session_id, track_id, rel_path, encoded.len() as u64, ArtifactKind::Still);
            }
            None => self.count_drop(),
        }
    }

    fn buffer_animation_frame(&mut self, session_id: &str, track_id: u64, rgb: RgbImage, timestamp: DateTime<Utc>) {
        let key = (session_id.to_string(), track_id);
        let max_width = self.config.crop_max_width;
        let buffer = self.buffers.entry(key).or_insert_with(|| AnimationBuffer {
            frames: Vec::new(),
            started: timestamp,
            done: false,
        });
        if buffer.done {
            return;
        }

        // All frames must share the first frame's dimensions.
        let frame = match buffer.frames.first() {
            Some(first) => imageops::resize(&rgb, first.width(), first.height(), FilterType::Triangle),
            None if rgb.width() > max_width => {
                let scale = max_width as f32 / rgb.width() as f32;
                let height = ((rgb.height() as f32 * scale) as u32).max(1);
                imageops::resize(&rgb, max_width, height, FilterType::Triangle)
            }
            None => rgb,
        };
        buffer.frames.push(frame);

        let window = chrono::Duration::seconds(self.config.animation_secs as i64);
        let elapsed = timestamp.signed_duration_since(buffer.started);
        if elapsed >= window && buffer.frames.len() >= self.config.animation_min_frames {
            self.finalize_animation(session_id, track_id);
        }
    }

    /// Encode and write a buffered animation, then free its frames.
    fn finalize_animation(&mut self, session_id: &str, track_id: u64) {
        let key = (session_id.to_string(), track_id);
        let Some(buffer) = self.buffers.get_mut(&key) else {
            return;
        };
        if buffer.done || buffer.frames.len() < self.config.animation_min_frames {
            return;
        }
        buffer.done = true;
        let frames = std::mem::take(&mut buffer.frames);

        let started = Instant::now();
        let step = (frames.len() / self.config.animation_max_frames.max(1)).max(1);
        let frame_delay = Delay::from_numer_denom_ms(self.config.animation_frame_ms, 1);

        let mut encoded = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut encoded);
            if encoder.set_repeat(Repeat::Infinite).is_err() {
                warn!(session_id, track_id, "GIF encoder rejected repeat setting");
                self.count_drop();
                return;
            }
            for rgb in frames.iter().step_by(step) {
                let rgba: RgbaImage = image::DynamicImage::ImageRgb8(rgb.clone()).into_rgba8();
                let frame = AnimationFrame::from_parts(rgba, 0, 0, frame_delay);
                if let Err(err) = encoder.encode_frame(frame) {
                    warn!(session_id, track_id, error = %err, "GIF encode failed");
                    self.count_drop();
                    return;
                }
            }
        }
        if self.over_budget(started) {
            warn!(session_id, track_id, "GIF encode exceeded time budget; dropped");
            self.count_drop();
            return;
        }

        let file_name = format!("track_{}.gif", track_id);
        match self.write_artifact(session_id, &file_name, &encoded) {
            Some(rel_path) => {
                info!(
                    session_id,
                    track_id,
                    path = %rel_path,
                    frames = frames.len().div_ceil(step),
                    "Saved track animation"
                );
                self.record_artifact(session_id, track_id, rel_path, encoded.len() as u64, ArtifactKind::Animation);
            }
            None => self.count_drop(),
        }
    }

    /// Finalize buffers whose window has elapsed without fresh captures.
    fn sweep_expired(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::seconds(self.config.animation_secs as i64);
        let min_frames = self.config.animation_min_frames;
        let expired: Vec<(String, u64)> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| {
                !buffer.done
                    && buffer.frames.len() >= min_frames
                    && now.signed_duration_since(buffer.started) >= window
            })
            .map(|(key, _)| key.clone())
            .collect();
        for (session_id, track_id) in expired {
            self.finalize_animation(&session_id, track_id);
        }
    }

    fn finish_session(&mut self, session_id: &str) {
        let pending: Vec<u64> = self
            .buffers
            .iter()
            .filter(|((sid, _), buffer)| sid == session_id && !buffer.done)
            .map(|((_, track_id), _)| *track_id)
            .collect();
        for track_id in pending {
            self.finalize_animation(session_id, track_id);
        }
        self.buffers.retain(|(sid, _), _| sid != session_id);
    }

    fn write_artifact(&self, session_id: &str, file_name: &str, bytes: &[u8]) -> Option<String> {
        if self.is_canceled(session_id) {
            return None;
        }
        let dir = self.root.join(format!("session_{}", session_id));
        if let Err(err) = fs_err::create_dir_all(&dir) {
            warn!(session_id, error = %err, "Failed to create session media directory");
            return None;
        }
        let path = dir.join(file_name);
        if let Err(err) = fs_err::write(&path, bytes) {
            warn!(session_id, path = %path.display(), error = %err, "Failed to write artifact");
            return None;
        }
        Some(format!("session_{}/{}", session_id, file_name))
    }

    fn record_artifact(&mut self, session_id: &str, track_id: u64, rel_path: String, bytes: u64, kind: ArtifactKind) {
        let url = format!("/media/{}", rel_path);
        let mut evicted = Vec::new();
        {
            let mut registry = self.lock_registry();
            let usage = registry.sessions.entry(session_id.to_string()).or_default();
            usage.artifacts.push_back(ArtifactRecord {
                rel_path,
                bytes,
                track_id,
                kind,
            });
            usage.bytes = usage.bytes.saturating_add(bytes);
            let refs = usage.refs.entry(track_id).or_default();
            match kind {
                ArtifactKind::Still => refs.jpeg_url = Some(url),
                ArtifactKind::Animation => {
                    refs.gif_url = Some(url);
                    usage.gifs = usage.gifs.saturating_add(1);
                }
            }

            // FIFO eviction keeps the session under its byte budget.
            while usage.bytes > self.config.session_budget_bytes {
                let Some(oldest) = usage.artifacts.pop_front() else {
                    break;
                };
                usage.bytes = usage.bytes.saturating_sub(oldest.bytes);
                if let Some(refs) = usage.refs.get_mut(&oldest.track_id) {
                    match oldest.kind {
                        ArtifactKind::Still => refs.jpeg_url = None,
                        ArtifactKind::Animation => refs.gif_url = None,
                    }
                }
                evicted.push(oldest);
            }
        }
        for record in evicted {
            let path = self.root.join(&record.rel_path);
            if let Err(err) = fs_err::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "Failed to remove evicted artifact");
            } else {
                info!(session_id, path = %record.rel_path, "Evicted artifact over session budget");
            }
        }
    }

    fn has_still(&self, session_id: &str, track_id: u64) -> bool {
        self.lock_registry()
            .sessions
            .get(session_id)
            .and_then(|usage| usage.refs.get(&track_id))
            .map(|refs| refs.jpeg_url.is_some())
            .unwrap_or(false)
    }

    fn is_canceled(&self, session_id: &str) -> bool {
        self.lock_registry().canceled.contains(session_id)
    }

    fn over_budget(&self, started: Instant) -> bool {
        started.elapsed() > Duration::from_millis(self.config.encode_budget_ms)
    }

    fn count_drop(&self) {
        let mut registry = self.lock_registry();
        registry.dropped_artifacts = registry.dropped_artifacts.saturating_add(1);
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
