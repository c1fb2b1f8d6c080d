use likeness_core::preprocess::DEFAULT_CANONICAL_SIZE;
use likeness_core::tiers::{DEFAULT_T_HIGH, DEFAULT_T_LOW};
use likeness_core::{ConfidenceTiers, LbphParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const MIN_CANONICAL_SIZE: u32 = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration.
///
/// Loaded from an optional TOML file, then overridden field by field from
/// `LIKENESS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// SQLite identity database.
    pub db_path: PathBuf,
    /// Trained LBPH model file.
    pub model_path: PathBuf,
    /// SCRFD ONNX model used to locate faces.
    pub locator_model_path: PathBuf,
    /// Number of pooled store connections.
    pub pool_size: usize,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
    /// Enrollment stops once this many samples are captured.
    pub capture_target: usize,
    /// Enrollments with fewer samples are rolled back.
    pub minimum_required: usize,
    /// Recognition locates and classifies every Nth frame.
    pub frame_throttle: u32,
    /// Distances below this are a match.
    pub t_low: f64,
    /// Distances at or above this are unknown.
    pub t_high: f64,
    /// Side length of canonical face images.
    pub canonical_size: u32,
    pub lbph: LbphParams,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            db_path: data_dir.join("identities.db"),
            model_path: data_dir.join("model.json"),
            locator_model_path: data_dir.join("models").join("det_10g.onnx"),
            pool_size: likeness_store::DEFAULT_POOL_SIZE,
            warmup_frames: 4,
            capture_target: 50,
            minimum_required: 20,
            frame_throttle: 2,
            t_low: DEFAULT_T_LOW,
            t_high: DEFAULT_T_HIGH,
            canonical_size: DEFAULT_CANONICAL_SIZE,
            lbph: LbphParams::default(),
        }
    }
}

impl Config {
    /// Read `path` (or the default location, if present), apply environment
    /// overrides, and validate.
    ///
    /// An explicitly given path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `LIKENESS_*` variables; unparsable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("LIKENESS_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("LIKENESS_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("LIKENESS_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = var("LIKENESS_LOCATOR_MODEL") {
            self.locator_model_path = PathBuf::from(v);
        }
        env_parse(&var, "LIKENESS_POOL_SIZE", &mut self.pool_size);
        env_parse(&var, "LIKENESS_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&var, "LIKENESS_CAPTURE_TARGET", &mut self.capture_target);
        env_parse(&var, "LIKENESS_MINIMUM_REQUIRED", &mut self.minimum_required);
        env_parse(&var, "LIKENESS_FRAME_THROTTLE", &mut self.frame_throttle);
        env_parse(&var, "LIKENESS_T_LOW", &mut self.t_low);
        env_parse(&var, "LIKENESS_T_HIGH", &mut self.t_high);
        env_parse(&var, "LIKENESS_CANONICAL_SIZE", &mut self.canonical_size);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiers()?;
        if self.minimum_required == 0 {
            return Err(ConfigError::Invalid("minimum_required must be positive".into()));
        }
        if self.minimum_required > self.capture_target {
            return Err(ConfigError::Invalid(format!(
                "minimum_required ({}) exceeds capture_target ({})",
                self.minimum_required, self.capture_target
            )));
        }
        if self.frame_throttle == 0 {
            return Err(ConfigError::Invalid("frame_throttle must be at least 1".into()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be positive".into()));
        }
        if self.canonical_size < MIN_CANONICAL_SIZE {
            return Err(ConfigError::Invalid(format!(
                "canonical_size must be at least {MIN_CANONICAL_SIZE}, got {}",
                self.canonical_size
            )));
        }
        self.lbph
            .validate(self.canonical_size)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn tiers(&self) -> Result<ConfidenceTiers, ConfigError> {
        ConfidenceTiers::new(self.t_low, self.t_high).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    match var(key).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => *field = value,
        Some(Err(_)) => tracing::warn!(key, "ignoring unparsable environment override"),
        None => {}
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("likeness")
        .join("config.toml")
}
