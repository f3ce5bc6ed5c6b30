//! # Orchestrator Configuration
//!
//! Deadlines, retry caps and monitor settings. All durations are written in TOML as seconds
//! (integers or floats):
//!
//! ```toml
//! construction_timeout = 30
//! probe_timeout = 10
//! heavy_construction_timeout = 60
//! max_retry_delay = 60
//!
//! [monitor]
//! interval = 300
//! cache_ttl = 60
//! enabled = true
//! ```
//!
//! Every field is optional; anything left out keeps its default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming a TOML file to load with [`OrchestratorConfig::load`].
pub const CONFIG_ENV_VAR: &str = "ORCHESTRATOR_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deadline for one factory call.
    #[serde(with = "secs")]
    pub construction_timeout: Duration,
    /// Deadline for health probes and shutdown hooks.
    #[serde(with = "secs")]
    pub probe_timeout: Duration,
    /// Construction deadline for definitions marked `heavy()`.
    #[serde(with = "secs")]
    pub heavy_construction_timeout: Duration,
    /// Cap on the retry delay as it grows between attempts.
    #[serde(with = "secs")]
    pub max_retry_delay: Duration,
    /// Request buffer of the registry task.
    pub registry_capacity: usize,
    pub monitor: MonitorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            construction_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            heavy_construction_timeout: Duration::from_secs(60),
            max_retry_delay: Duration::from_secs(60),
            registry_capacity: 64,
            monitor: MonitorConfig::default(),
        }
    }
}

/// Background health monitor settings. Can be changed at runtime through
/// [`Orchestrator::configure_monitoring`](crate::Orchestrator::configure_monitoring).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "secs")]
    pub interval: Duration,
    #[serde(with = "secs")]
    pub cache_ttl: Duration,
    /// `false` keeps the loop from being started.
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(60),
            enabled: true,
        }
    }
}

impl OrchestratorConfig {
    /// Loads the file named by `ORCHESTRATOR_CONFIG`, falling back to defaults if the variable
    /// is unset or the file is unusable.
    pub fn load() -> Self {
        let Ok(path) = std::env::var(CONFIG_ENV_VAR) else {
            return Self::default();
        };
        let path = PathBuf::from(path);
        match Self::load_from_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded orchestrator config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load orchestrator config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Every deadline and interval must be positive and the registry needs a non-empty buffer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let durations = [
            ("construction_timeout", self.construction_timeout),
            ("probe_timeout", self.probe_timeout),
            ("heavy_construction_timeout", self.heavy_construction_timeout),
            ("max_retry_delay", self.max_retry_delay),
            ("monitor.interval", self.monitor.interval),
            ("monitor.cache_ttl", self.monitor.cache_ttl),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                errors.push(format!("{field} must be greater than zero"));
            }
        }
        if self.registry_capacity == 0 {
            errors.push("registry_capacity must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Durations as (fractional) seconds.
mod secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|e| de::Error::custom(format!("{secs}: {e}")))
    }
}
