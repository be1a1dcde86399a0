//! Engine configuration.
//!
//! A TOML file supplies startup config (storage roots, tracker tuning, media
//! budgets, logging); the detection subset stays runtime-mutable through
//! validated protocol patches, applied atomically between frames.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::tracker::TrackerConfig;
use lookout_protocol::{ConfigPatch, ConfigSnapshot};

pub const CONFIG_ENV_VAR: &str = "LOOKOUT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "lookout.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub detection: DetectionSettings,
    pub tracker: TrackerSection,
    pub media: MediaSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

/// Runtime-mutable detection parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSettings {
    /// Show threshold: minimum confidence for a detection to seed a track.
    pub confidence: f32,
    /// Save threshold: minimum confidence to persist media evidence.
    pub save_confidence: f32,
    /// Model input size passed through to the detector collaborator.
    pub image_size: u32,
    /// Run inference on every (N+1)-th frame.
    pub skip_frames: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            save_confidence: 0.5,
            image_size: 640,
            skip_frames: 0,
        }
    }
}

impl DetectionSettings {
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            confidence: self.confidence,
            save_confidence: self.save_confidence,
            image_size: self.image_size,
            skip_frames: self.skip_frames,
        }
    }

    fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(value) = patch.confidence {
            self.confidence = value;
        }
        if let Some(value) = patch.save_confidence {
            self.save_confidence = value;
        }
        if let Some(value) = patch.image_size {
            self.image_size = value;
        }
        if let Some(value) = patch.skip_frames {
            self.skip_frames = value;
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerSection {
    pub min_iou: f32,
    pub max_age: u32,
}

impl Default for TrackerSection {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            min_iou: defaults.min_iou,
            max_age: defaults.max_age,
        }
    }
}

impl From<TrackerSection> for TrackerConfig {
    fn from(section: TrackerSection) -> Self {
        Self {
            min_iou: section.min_iou,
            max_age: section.max_age,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaSection {
    /// Per-session artifact budget; oldest artifacts are evicted past this.
    pub session_budget_bytes: u64,
    /// Animation window: seconds of crops buffered per track before encoding.
    pub animation_secs: u32,
    pub animation_min_frames: usize,
    pub animation_max_frames: usize,
    pub animation_frame_ms: u32,
    /// First animation frame is scaled down to at most this width.
    pub crop_max_width: u32,
    /// Encodes slower than this are dropped, not retried.
    pub encode_budget_ms: u64,
    pub queue_capacity: usize,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            session_budget_bytes: 256 * 1024 * 1024,
            animation_secs: 5,
            animation_min_frames: 5,
            animation_max_frames: 20,
            animation_frame_ms: 250,
            crop_max_width: 200,
            encode_budget_ms: 500,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageSection {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("lookout.db")
    }

    pub fn media_root(&self) -> PathBuf {
        self.data_dir.join("detections")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
    /// When set, logs also rotate into daily files under this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Load config from the first existing candidate: explicit path, the
/// `LOOKOUT_CONFIG` env var, then `./lookout.toml`. No file means defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let env_path = env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
    let candidates = [
        path.map(Path::to_path_buf),
        env_path,
        Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
    ];

    let chosen = candidates
        .into_iter()
        .flatten()
        .find(|candidate| candidate.is_file());

    let Some(chosen) = chosen else {
        return Ok(EngineConfig::default());
    };

    let raw = fs_err::read_to_string(&chosen)
        .map_err(|err| EngineError::io(format!("read config {}", chosen.display()), err))?;
    toml::from_str(&raw)
        .map_err(|err| EngineError::InvalidConfig(format!("{}: {}", chosen.display(), err)))
}

/// Shared handle to the runtime-mutable detection settings.
///
/// The pipeline reads one consistent copy at the top of each frame; patches
/// applied through this handle therefore take effect atomically before the
/// next `update`.
#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<Mutex<DetectionSettings>>,
}

impl SharedSettings {
    pub fn new(settings: DetectionSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(settings)),
        }
    }

    pub fn current(&self) -> DetectionSettings {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn apply(&self, patch: &ConfigPatch) -> Result<ConfigSnapshot> {
        patch
            .validate()
            .map_err(|err| EngineError::InvalidConfig(err.message))?;
        let mut settings = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        settings.apply(patch);
        Ok(settings.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_config_file() {
        let config = load_config(Some(Path::new("/nonexistent/lookout.toml")));
        // Explicit missing path falls through to defaults only if no
        // ./lookout.toml exists; both outcomes must parse cleanly.
        let config = config.expect("defaults");
        assert_eq!(config.detection.image_size, 640);
        assert_eq!(config.tracker.max_age, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("lookout.toml");
        let mut file = fs_err::File::create(&path).expect("create config");
        writeln!(
            file,
            "[detection]\nconfidence = 0.6\n\n[tracker]\nmax_age = 10\n\n[storage]\ndata_dir = \"/tmp/lookout\"\n"
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load");
        assert_eq!(config.detection.confidence, 0.6);
        assert_eq!(config.detection.save_confidence, 0.5);
        assert_eq!(config.tracker.max_age, 10);
        assert_eq!(config.storage.db_path(), PathBuf::from("/tmp/lookout/lookout.db"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("lookout.toml");
        fs_err::write(&path, "[detection]\nconfidence = \"high\"\n").expect("write config");
        assert!(matches!(
            load_config(Some(&path)),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn shared_settings_apply_validates() {
        let settings = SharedSettings::new(DetectionSettings::default());
        let err = settings
            .apply(&ConfigPatch {
                confidence: Some(2.0),
                ..Default::default()
            })
            .expect_err("out-of-range confidence");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        // Unchanged after the rejected patch.
        assert_eq!(settings.current().confidence, 0.5);

        let snapshot = settings
            .apply(&ConfigPatch {
                confidence: Some(0.7),
                skip_frames: Some(3),
                ..Default::default()
            })
            .expect("valid patch");
        assert_eq!(snapshot.confidence, 0.7);
        assert_eq!(settings.current().skip_frames, 3);
    }
}
