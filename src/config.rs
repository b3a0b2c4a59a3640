use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on how long the poll thread may sleep between stop checks.
pub(crate) const MAX_CANCEL_GRANULARITY: Duration = Duration::from_millis(150);

/// Bounds for the time between poll cycles.
pub(crate) const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config must be a JSON object")]
    NotAnObject,
}

/// Engine settings. Every field has a default so a partial (or older) file
/// still loads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between background refreshes
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How often the poll thread wakes to check for shutdown (capped at 150ms)
    #[serde(default = "default_cancel_granularity_ms")]
    pub cancel_granularity_ms: u64,
    /// Hard per-menu item cap imposed by the host
    #[serde(default = "default_page_capacity")]
    pub page_capacity: usize,
    /// Fetch synchronously on `register` when a session exists
    #[serde(default = "default_true")]
    pub eager_fetch: bool,
    /// `tracing` filter used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_cancel_granularity_ms() -> u64 {
    100
}

fn default_page_capacity() -> usize {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "trackmenu=info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            cancel_granularity_ms: default_cancel_granularity_ms(),
            page_capacity: default_page_capacity(),
            eager_fetch: true,
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Strict parse. Anything but a JSON object is rejected, since serde
    /// would otherwise read an array as positional fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load from a JSON file, returning defaults if it is missing or corrupt.
    /// Problems other than a missing file are logged so a broken config does
    /// not silently reset behaviour.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(source) => {
                let err = ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                };
                tracing::warn!(error = %err, "using default engine config");
                return Self::default();
            }
        };
        match Self::from_json_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "corrupt engine config, using defaults");
                Self::default()
            }
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            cancel_granularity: Duration::from_millis(self.cancel_granularity_ms),
        }
        .normalized()
    }
}

/// Timing knobs for the query cache's poll loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub poll_interval: Duration,
    pub cancel_granularity: Duration,
}

impl CacheConfig {
    /// Clamp granularity into `1ms..=150ms` so shutdown latency stays bounded,
    /// and the poll interval into `1s..=24h`.
    pub fn normalized(self) -> Self {
        Self {
            poll_interval: self
                .poll_interval
                .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
            cancel_granularity: self
                .cancel_granularity
                .clamp(Duration::from_millis(1), MAX_CANCEL_GRANULARITY),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        EngineConfig::default().cache_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_for_empty_object() {
        let cfg = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.poll_interval_secs, 10);
        assert_eq!(cfg.page_capacity, 30);
        assert!(cfg.eager_fetch);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"page_capacity": 12, "eager_fetch": false}"#).unwrap();
        assert_eq!(cfg.page_capacity, 12);
        assert!(!cfg.eager_fetch);
        assert_eq!(cfg.cancel_granularity_ms, 100);
        assert_eq!(cfg.log_filter, "trackmenu=info");
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = EngineConfig::load(&dir.path().join("engine.json"));
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn load_corrupt_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(EngineConfig::load(&path), EngineConfig::default());
    }

    #[test]
    fn load_reads_values_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"poll_interval_secs": 3, "page_capacity": 50}"#).unwrap();
        let cfg = EngineConfig::load(&path);
        assert_eq!(cfg.poll_interval_secs, 3);
        assert_eq!(cfg.page_capacity, 50);
    }

    #[test]
    fn strict_parse_reports_errors() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"page_capacity": "many"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn positional_array_is_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str("[1, 2]"),
            Err(ConfigError::NotAnObject)
        ));
    }

    #[test]
    fn array_file_loads_as_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, "[0, 2]").unwrap();
        assert_eq!(EngineConfig::load(&path), EngineConfig::default());
    }

    #[test]
    fn zero_poll_interval_is_floored() {
        let cfg = EngineConfig {
            poll_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.cache_config().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn huge_poll_interval_is_capped() {
        let cfg = EngineConfig::from_json_str(r#"{"poll_interval_secs": 18446744073709551615}"#).unwrap();
        assert_eq!(cfg.cache_config().poll_interval, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn granularity_is_capped() {
        let cfg = EngineConfig {
            cancel_granularity_ms: 5_000,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.cache_config().cancel_granularity, Duration::from_millis(150));

        let zero = EngineConfig {
            cancel_granularity_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(zero.cache_config().cancel_granularity, Duration::from_millis(1));
    }
}
