pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file directly
pub const CONFIG_PATH_ENV: &str = "CLOUDMIRROR_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["cloudmirror.local.yaml", "cloudmirror.yaml"];

/// Shortest allowed interval between two syncs of the same scope
pub const MIN_FREQUENCY_LIMIT_MIN: u64 = 10;

/// CloudMirror configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cloud_resource: CloudResourceConfig,
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudResourceConfig {
    pub sync: SyncConfig,
}

/// Periodic resource sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enable: bool,

    /// Minutes between scheduled syncs
    pub sync_interval_min: u64,

    /// Cool-down after a run ends, in minutes
    pub sync_frequency_limiting_time_min: u64,

    /// Regions synced at once
    pub concurrency: usize,

    pub page_size: u32,

    /// How long a run stays valid without progress, in minutes
    pub lease_ttl_min: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable: true,
            sync_interval_min: 30,
            sync_frequency_limiting_time_min: MIN_FREQUENCY_LIMIT_MIN,
            concurrency: 10,
            page_size: 100,
            lease_ttl_min: 30,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        minutes(self.sync_interval_min)
    }

    pub fn cooldown(&self) -> Duration {
        minutes(self.sync_frequency_limiting_time_min)
    }

    pub fn lease_ttl(&self) -> Duration {
        minutes(self.lease_ttl_min)
    }
}

/// Default operation polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            timeout_secs: 60,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

impl Config {
    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        // An empty file is valid and means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sync = &self.cloud_resource.sync;
        if sync.enable {
            if sync.sync_frequency_limiting_time_min < MIN_FREQUENCY_LIMIT_MIN {
                return Err(ConfigError::Invalid(format!(
                    "cloud_resource.sync.sync_frequency_limiting_time_min must be at least {}, got {}",
                    MIN_FREQUENCY_LIMIT_MIN, sync.sync_frequency_limiting_time_min
                )));
            }
            if sync.sync_interval_min == 0 {
                return Err(ConfigError::Invalid(
                    "cloud_resource.sync.sync_interval_min must be positive".into(),
                ));
            }
        }
        if sync.concurrency == 0 {
            return Err(ConfigError::Invalid("cloud_resource.sync.concurrency must be positive".into()));
        }
        if sync.page_size == 0 {
            return Err(ConfigError::Invalid("cloud_resource.sync.page_size must be positive".into()));
        }
        if sync.lease_ttl_min == 0 {
            return Err(ConfigError::Invalid("cloud_resource.sync.lease_ttl_min must be positive".into()));
        }
        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Invalid("poller.interval_secs must be positive".into()));
        }
        if self.poller.timeout_secs < self.poller.interval_secs {
            return Err(ConfigError::Invalid(format!(
                "poller.timeout_secs ({}) must not be shorter than poller.interval_secs ({})",
                self.poller.timeout_secs, self.poller.interval_secs
            )));
        }
        Ok(())
    }
}

/// Get the CloudMirror config directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cloudmirror");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the config file
///
/// Search order:
/// 1. `CLOUDMIRROR_CONFIG_PATH` (direct path)
/// 2. current directory: `cloudmirror.local.yaml`, `cloudmirror.yaml`
/// 3. `./.cloudmirror/` with the same names
/// 4. `~/.config/cloudmirror/config.yaml` (global)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", CONFIG_PATH_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".cloudmirror");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("cloudmirror").join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::NotFound)
}

/// Load the config from `path`
pub fn load_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = Config::from_yaml(&content, path)?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Discover and load the config, falling back to defaults when none exists
pub fn load() -> Result<Config> {
    match find_config_file() {
        Ok(path) => load_from(path),
        Err(ConfigError::NotFound) => {
            tracing::debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e),
    }
}
