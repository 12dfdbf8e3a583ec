//! Server configuration: the JSON settings file and its defaults.
//!
//! The file has four sections (`server`, `auth`, `persistence`,
//! `compression`); every field is optional and empty strings fall back
//! to defaults. Interval strings use `<N><unit>` with s/m/h/d units and
//! are clamped to sane operating ranges.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use antcache_core::CompressionConfig;

/// Default snapshot cadence and its permitted range.
pub const DEFAULT_ATD_INTERVAL: Duration = Duration::from_secs(3_600);
pub const MIN_ATD_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MAX_ATD_INTERVAL: Duration = Duration::from_secs(30 * 86_400);

/// Default journal sync cadence and its permitted range.
pub const DEFAULT_ACL_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_ACL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_ACL_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub persistence: PersistenceSection,
    pub compression: CompressionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: "8890".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Empty means authentication is disabled.
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub atd_interval: String,
    pub acl_interval: String,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            atd_interval: "1h".into(),
            acl_interval: "1s".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionSection {
    pub enabled: bool,
    pub min_size: usize,
    pub strings_only: bool,
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            min_size: 1024,
            strings_only: false,
        }
    }
}

impl Settings {
    /// Loads and validates the settings file. A missing or malformed
    /// file is a startup failure.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut settings: Settings =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        settings.apply_defaults();
        Ok(settings)
    }

    fn apply_defaults(&mut self) {
        if self.server.host.is_empty() {
            self.server.host = "localhost".into();
        }
        if self.server.port.is_empty() {
            self.server.port = "8890".into();
        }
        if self.persistence.atd_interval.is_empty() {
            self.persistence.atd_interval = "1h".into();
        }
        if self.persistence.acl_interval.is_empty() {
            self.persistence.acl_interval = "1s".into();
        }
        if self.compression.min_size == 0 {
            self.compression.min_size = 1024;
        }
    }

    /// The snapshot interval, clamped to [5 m, 30 d]. An unparseable
    /// value logs a warning and falls back to the default.
    pub fn atd_interval(&self) -> Duration {
        interval_or_default(
            &self.persistence.atd_interval,
            DEFAULT_ATD_INTERVAL,
            MIN_ATD_INTERVAL,
            MAX_ATD_INTERVAL,
        )
    }

    /// The journal sync interval, clamped to [1 s, 1 m].
    pub fn acl_interval(&self) -> Duration {
        interval_or_default(
            &self.persistence.acl_interval,
            DEFAULT_ACL_INTERVAL,
            MIN_ACL_INTERVAL,
            MAX_ACL_INTERVAL,
        )
    }

    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            enabled: self.compression.enabled,
            min_size: self.compression.min_size,
            strings_only: self.compression.strings_only,
        }
    }

    /// Human-readable dump for the `--query` flag.
    pub fn describe(&self, path: &Path) -> String {
        let auth_enabled = !self.auth.password.is_empty();
        format!(
            "=== antcache configuration ===\n\
             Config file: {}\n\
             \n[server]\nhost: {}\nport: {}\n\
             \n[persistence]\natd_interval: {}\nacl_interval: {}\n\
             \n[auth]\nenabled: {}\n\
             \n[compression]\nenabled: {}\nmin_size: {}\nstrings_only: {}\n",
            path.display(),
            self.server.host,
            self.server.port,
            self.persistence.atd_interval,
            self.persistence.acl_interval,
            auth_enabled,
            self.compression.enabled,
            self.compression.min_size,
            self.compression.strings_only,
        )
    }
}

/// Parses a duration string like "90s", "5m", "1h", "2d".
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    if !input.is_ascii() {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }
    let lower = input.to_ascii_lowercase();
    let (num_str, unit) = lower.split_at(lower.len() - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;
    let secs = match unit {
        "s" => num,
        "m" => num.saturating_mul(60),
        "h" => num.saturating_mul(3_600),
        "d" => num.saturating_mul(86_400),
        _ => return Err(ConfigError::InvalidDuration(input.to_string())),
    };
    Ok(Duration::from_secs(secs))
}

fn interval_or_default(input: &str, default: Duration, min: Duration, max: Duration) -> Duration {
    let parsed = match parse_duration(input) {
        Ok(d) => d,
        Err(_) => {
            warn!(value = input, "invalid interval in config, using default");
            default
        }
    };
    parsed.clamp(min, max)
}
