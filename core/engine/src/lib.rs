//! # lookout-engine
//!
//! Multi-object tracking and session lifecycle core for Lookout. Turns
//! per-frame detections into identity-stable tracks, persists reviewable
//! evidence (crops, animations, session logs), and publishes immutable
//! snapshots to any number of concurrent readers.
//!
//! ## Design Principles
//!
//! - **Single writer**: one producer thread drives the frame pipeline;
//!   consumers only read snapshots or query the ledger.
//! - **Never block the frame loop**: media encoding runs on a worker with a
//!   bounded queue; push subscribers get bounded buffers with a drop-oldest
//!   policy.
//! - **Graceful degradation**: malformed detections and over-budget encodes
//!   are dropped and counted, never fatal.
//! - **Transport stays outside**: HTTP/WebSocket clients talk through
//!   `lookout-protocol` types and the `EngineHandle`.

// Public modules
pub mod api;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod pipeline;
pub mod session;
pub mod track;
pub mod tracker;

// Re-export commonly used items at crate root
pub use api::handle_request;
pub use broadcast::{Broadcaster, Subscription};
pub use config::{load_config, DetectionSettings, EngineConfig, SharedSettings};
pub use error::{EngineError, Result};
pub use frame::FrameBuffer;
pub use media::{MediaRefs, MediaStore};
pub use pipeline::{Detector, EngineHandle, FrameSource, Pipeline};
pub use session::SessionLedger;
pub use track::{Detection, Track, TrackEvent, TrackObservation, TrackState};
pub use tracker::{Tracker, TrackerConfig};
