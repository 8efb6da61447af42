//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::ChainConfig;

/// Client identity sent as `User-Agent` unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "harvest/",
    env!("CARGO_PKG_VERSION"),
    " (Autonomous; record extraction)"
);

/// Env var naming a JSON config file.
pub const CONFIG_ENV: &str = "HARVEST_CONFIG";

/// Config file picked up from the working directory when nothing else is set.
pub const LOCAL_CONFIG_FILE: &str = "harvest.json";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Pipeline settings. Every field has a default, so partial files are fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub user_agent: String,
    /// Default overall deadline per request.
    pub timeout_ms: u64,
    /// Fetch attempts per request, first attempt included.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// Maximum simultaneous page fetches.
    pub max_concurrency: usize,
    /// Byte cap for diagnostic content snapshots.
    pub snapshot_limit: usize,
    /// Where diagnostic snapshots are written; kept in memory only when unset.
    pub diagnostics_dir: Option<PathBuf>,
    pub chain: ChainConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            cache_ttl_secs: 900,
            cache_max_entries: 256,
            max_concurrency: 4,
            snapshot_limit: 64 * 1024,
            diagnostics_dir: None,
            chain: ChainConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Resolve configuration: explicit path, then `HARVEST_CONFIG`, then
    /// `./harvest.json`, then defaults. `HARVEST_*` overrides apply last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(LOCAL_CONFIG_FILE);
                local.exists().then_some(local)
            });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `HARVEST_*` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(ua) = lookup("HARVEST_USER_AGENT") {
            self.user_agent = ua;
        }
        if let Some(v) = lookup("HARVEST_TIMEOUT_MS") {
            self.timeout_ms = parse_number("HARVEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("HARVEST_MAX_ATTEMPTS") {
            self.max_attempts = parse_number("HARVEST_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("HARVEST_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_number("HARVEST_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("HARVEST_MAX_CONCURRENCY") {
            self.max_concurrency = parse_number("HARVEST_MAX_CONCURRENCY", &v)?;
        }
        if let Some(dir) = lookup("HARVEST_DIAGNOSTICS_DIR") {
            self.diagnostics_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_attempts", self.max_attempts as u64),
            ("max_concurrency", self.max_concurrency as u64),
            ("cache_max_entries", self.cache_max_entries as u64),
            ("timeout_ms", self.timeout_ms),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent".to_string(),
                reason: "a client identity is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("expected a number, got {raw:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = HarvestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.json");
        std::fs::write(&path, r#"{"cache_ttl_secs": 60, "max_concurrency": 2}"#).unwrap();

        let config = HarvestConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(!config.chain.schemas.is_empty());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            HarvestConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("HARVEST_TIMEOUT_MS", "1500"),
            ("HARVEST_USER_AGENT", "custom-agent/1.0"),
            ("HARVEST_DIAGNOSTICS_DIR", "/tmp/diag"),
        ]
        .into_iter()
        .collect();

        let mut config = HarvestConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.user_agent, "custom-agent/1.0");
        assert_eq!(config.diagnostics_dir, Some(PathBuf::from("/tmp/diag")));
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = HarvestConfig::default();
        let err = config
            .apply_overrides(|k| (k == "HARVEST_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_zero_concurrency_invalid() {
        let config = HarvestConfig {
            max_concurrency: 0,
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
