//! Controller configuration
//!
//! Two layers, later wins:
//! 1. Built-in defaults
//! 2. Optional TOML file (`hooklane.toml`)
//!
//! `HOOKLANE_DATA_DIR` overrides `data_dir` when set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "HOOKLANE_DATA_DIR";

/// Controller configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Root for the job catalog and the artifact store.
    pub data_dir: PathBuf,

    /// Upper bound for a runtime attach (default: 10000)
    pub attach_timeout_ms: u64,

    /// How long cancel waits for the runtime to confirm unload (default: 2000)
    pub detach_wait_ms: u64,

    /// Terminal jobs retained per target (default: 200)
    pub history_limit: usize,

    /// Largest ttl a caller may request (default: 86400000 = 24h)
    pub max_ttl_ms: u64,

    /// Largest serialized params object accepted (default: 65536)
    pub max_params_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".hooklane"),
            attach_timeout_ms: 10_000,
            detach_wait_ms: 2_000,
            history_limit: 200,
            max_ttl_ms: 86_400_000,
            max_params_bytes: 64 * 1024,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {message}")]
    IoError { path: String, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// A loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ControllerConfig,
    /// File the second layer was read from, if any.
    pub path: Option<PathBuf>,
    /// SHA-256 of the file bytes, if any.
    pub digest: Option<String>,
}

impl ControllerConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Resolve the effective configuration.
    ///
    /// A missing file at `path` is not an error; the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let mut loaded = LoadedConfig {
            config: Self::default(),
            path: None,
            digest: None,
        };

        if let Some(path) = path.filter(|p| p.exists()) {
            let bytes = fs::read(path).map_err(|e| ConfigError::IoError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let contents = String::from_utf8(bytes)
                .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

            loaded.config = toml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
            loaded.digest = Some(hex::encode(Sha256::digest(contents.as_bytes())));
            loaded.path = Some(path.to_path_buf());
        }

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                loaded.config.data_dir = PathBuf::from(dir);
            }
        }

        loaded.config.validate()?;
        Ok(loaded)
    }

    /// Check bounds on every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "data_dir must not be empty".to_string(),
            ));
        }

        // attach_timeout_ms must be in (0, 300000]
        if self.attach_timeout_ms == 0 || self.attach_timeout_ms > 300_000 {
            return Err(ConfigError::ValidationError(format!(
                "attach_timeout_ms must be in (0, 300000], got {}",
                self.attach_timeout_ms
            )));
        }

        // detach_wait_ms must be in (0, 60000]
        if self.detach_wait_ms == 0 || self.detach_wait_ms > 60_000 {
            return Err(ConfigError::ValidationError(format!(
                "detach_wait_ms must be in (0, 60000], got {}",
                self.detach_wait_ms
            )));
        }

        if self.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "history_limit must be at least 1".to_string(),
            ));
        }

        if self.max_ttl_ms == 0 {
            return Err(ConfigError::ValidationError(
                "max_ttl_ms must be positive".to_string(),
            ));
        }

        if self.max_params_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_params_bytes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn detach_wait(&self) -> Duration {
        Duration::from_millis(self.detach_wait_ms)
    }

    /// `<data_dir>/jobs`
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// `<data_dir>/artifacts`
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }
}
