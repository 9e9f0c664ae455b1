//! Rig configuration.
//!
//! Configuration is an explicit object handed to the orchestrator at
//! construction — nothing reads a preferences singleton at runtime. It is
//! loaded from a TOML file merged with `CAMRIG_`-prefixed environment
//! variables (e.g. `CAMRIG_STORAGE__DATA_DIR=/data` overrides
//! `[storage] data_dir`).
//!
//! Driver-specific camera settings stay as a raw `toml::Value` table and
//! are validated by the matching [`SourceFactory`](crate::source::SourceFactory).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CamError, CamResult};
use crate::source::TriggerMode;

/// Top-level rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    /// Optional synchronization channel.
    pub sync: Option<SyncChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all recordings.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Experiment name; becomes a directory component and can be changed
    /// at runtime between runs. Defaults to the session date.
    #[serde(default = "default_experiment")]
    pub experiment: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            experiment: default_experiment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TCP address the JSON control endpoint binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_addr: default_bind_addr(),
        }
    }
}

/// Per-camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Unique camera identifier; used in file names and log fields.
    pub id: String,
    /// Driver type resolved through the source registry.
    pub driver: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether saving starts enabled for this camera.
    #[serde(default)]
    pub save: bool,
    #[serde(default)]
    pub trigger: TriggerMode,
    /// Frames written to one file before rotating to the next.
    #[serde(default = "default_frames_per_file")]
    pub frames_per_file: u64,
    /// Hardware poll timeout in milliseconds; also bounds cancellation
    /// latency for this camera.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Depth of the bounded frame queue to the writer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Output format of the writer.
    #[serde(default = "default_format")]
    pub format: String,
    /// Consecutive capture faults tolerated before a recovery cycle.
    #[serde(default = "default_max_consecutive_faults")]
    pub max_consecutive_faults: u32,
    /// Stop/close/reopen recovery cycles attempted before the camera is
    /// declared fatally failed.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    /// Driver-specific settings, passed verbatim to the factory.
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

/// Synchronization channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncChannelConfig {
    #[serde(default = "default_sync_id")]
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
    #[serde(default = "default_sync_channels")]
    pub channels: Vec<String>,
}

fn default_app_name() -> String {
    "camrig".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_experiment() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:9023".to_string()
}

fn default_true() -> bool {
    true
}

fn default_frames_per_file() -> u64 {
    256
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    crate::queue::DEFAULT_QUEUE_CAPACITY
}

fn default_format() -> String {
    "tiff".to_string()
}

fn default_max_consecutive_faults() -> u32 {
    5
}

fn default_max_recovery_attempts() -> u32 {
    2
}

fn default_sync_id() -> String {
    "sync".to_string()
}

fn default_sample_rate() -> f64 {
    1000.0
}

fn default_sync_channels() -> Vec<String> {
    vec!["di0".to_string()]
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl RigConfig {
    /// Load from a TOML file merged with `CAMRIG_`-prefixed environment
    /// variables, then validate.
    pub fn load(path: &Path) -> CamResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CAMRIG_").split("__"))
            .extract()
            .map_err(|e| CamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string (tests and embedded defaults).
    pub fn from_toml(text: &str) -> CamResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::string(text))
            .extract()
            .map_err(|e| CamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> CamResult<()> {
        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if camera.id.is_empty() {
                return Err(CamError::Config("camera id must not be empty".into()));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(CamError::Config(format!(
                    "duplicate camera id '{}'",
                    camera.id
                )));
            }
            if camera.frames_per_file == 0 {
                return Err(CamError::Config(format!(
                    "camera '{}': frames_per_file must be positive",
                    camera.id
                )));
            }
            if camera.poll_timeout_ms == 0 {
                return Err(CamError::Config(format!(
                    "camera '{}': poll_timeout_ms must be positive",
                    camera.id
                )));
            }
        }
        if let Some(sync) = &self.sync {
            if sync.sample_rate_hz <= 0.0 {
                return Err(CamError::Config(
                    "sync sample_rate_hz must be positive".into(),
                ));
            }
            if sync.channels.is_empty() {
                return Err(CamError::Config("sync channels must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Cameras that are enabled, in declaration order.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|c| c.enabled)
    }
}
