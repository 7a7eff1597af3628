//! Runtime configuration, read from `PROTRACK_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::monitor::Backoff;
use crate::sync_manager::FallbackOptions;
use crate::types::RejectedPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the Supabase/PostgREST backend.
    pub backend_url: String,

    /// Sent as both `apikey` and bearer token when set.
    pub api_key: Option<String>,

    /// SQLite file for offline state; `None` uses the OS data directory.
    pub db_path: Option<PathBuf>,

    pub request_timeout_secs: u64,

    /// Regular interval of the background sync worker.
    pub sync_interval_secs: u64,

    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,

    pub rejected_policy: RejectedPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            api_key: None,
            db_path: None,
            request_timeout_secs: 10,
            sync_interval_secs: 30,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            rejected_policy: RejectedPolicy::Halt,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// All variables are optional:
    /// - `PROTRACK_BACKEND_URL` (default `http://localhost:54321`)
    /// - `PROTRACK_API_KEY`
    /// - `PROTRACK_DB_PATH` (default `{data_dir}/protrack/offline.db`)
    /// - `PROTRACK_REQUEST_TIMEOUT_SECS` (default 10)
    /// - `PROTRACK_SYNC_INTERVAL_SECS` (default 30)
    /// - `PROTRACK_BACKOFF_INITIAL_MS` (default 1000)
    /// - `PROTRACK_BACKOFF_MAX_MS` (default 30000)
    /// - `PROTRACK_REJECTED_POLICY` (`halt` or `dead_letter`, default `halt`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            backend_url: var("PROTRACK_BACKEND_URL").unwrap_or(defaults.backend_url),
            api_key: var("PROTRACK_API_KEY"),
            db_path: var("PROTRACK_DB_PATH").map(PathBuf::from),
            request_timeout_secs: parse_or(
                var("PROTRACK_REQUEST_TIMEOUT_SECS"),
                "PROTRACK_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            sync_interval_secs: parse_or(
                var("PROTRACK_SYNC_INTERVAL_SECS"),
                "PROTRACK_SYNC_INTERVAL_SECS",
                defaults.sync_interval_secs,
            )?,
            backoff_initial_ms: parse_or(
                var("PROTRACK_BACKOFF_INITIAL_MS"),
                "PROTRACK_BACKOFF_INITIAL_MS",
                defaults.backoff_initial_ms,
            )?,
            backoff_max_ms: parse_or(
                var("PROTRACK_BACKOFF_MAX_MS"),
                "PROTRACK_BACKOFF_MAX_MS",
                defaults.backoff_max_ms,
            )?,
            rejected_policy: match var("PROTRACK_REJECTED_POLICY") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| invalid("PROTRACK_REJECTED_POLICY", format!("{e}")))?,
                None => defaults.rejected_policy,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(invalid(
                "PROTRACK_BACKEND_URL",
                "must be a valid HTTP(S) URL",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("PROTRACK_REQUEST_TIMEOUT_SECS", "must be positive"));
        }
        if self.sync_interval_secs == 0 {
            return Err(invalid("PROTRACK_SYNC_INTERVAL_SECS", "must be positive"));
        }
        if self.backoff_initial_ms == 0 {
            return Err(invalid("PROTRACK_BACKOFF_INITIAL_MS", "must be positive"));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(invalid(
                "PROTRACK_BACKOFF_MAX_MS",
                "must not be below PROTRACK_BACKOFF_INITIAL_MS",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn fallback_options(&self) -> FallbackOptions {
        FallbackOptions {
            request_timeout: self.request_timeout(),
            rejected_policy: self.rejected_policy,
        }
    }
}

fn parse_or(raw: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(key, format!("'{raw}' is not a non-negative integer"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.backoff().current(), Duration::from_secs(1));
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("PROTRACK_BACKEND_URL", "https://abc.supabase.co"),
            ("PROTRACK_API_KEY", "anon"),
            ("PROTRACK_DB_PATH", "/tmp/protrack.db"),
            ("PROTRACK_REQUEST_TIMEOUT_SECS", "5"),
            ("PROTRACK_SYNC_INTERVAL_SECS", "15"),
            ("PROTRACK_BACKOFF_INITIAL_MS", "250"),
            ("PROTRACK_BACKOFF_MAX_MS", "8000"),
            ("PROTRACK_REJECTED_POLICY", "dead_letter"),
        ])
        .unwrap();

        assert_eq!(config.backend_url, "https://abc.supabase.co");
        assert_eq!(config.api_key.as_deref(), Some("anon"));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/protrack.db")));
        assert_eq!(config.fallback_options().request_timeout, Duration::from_secs(5));
        assert_eq!(config.sync_interval(), Duration::from_secs(15));
        assert_eq!(config.rejected_policy, RejectedPolicy::DeadLetter);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("PROTRACK_API_KEY", "  "), ("PROTRACK_SYNC_INTERVAL_SECS", "")]).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.sync_interval_secs, 30);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            load(&[("PROTRACK_REQUEST_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::Invalid { key: "PROTRACK_REQUEST_TIMEOUT_SECS", .. })
        ));
        assert!(load(&[("PROTRACK_BACKEND_URL", "ftp://example.com")]).is_err());
        assert!(load(&[("PROTRACK_REJECTED_POLICY", "ignore")]).is_err());
        assert!(load(&[("PROTRACK_REQUEST_TIMEOUT_SECS", "0")]).is_err());
        assert!(
            load(&[
                ("PROTRACK_BACKOFF_INITIAL_MS", "5000"),
                ("PROTRACK_BACKOFF_MAX_MS", "1000"),
            ])
            .is_err()
        );
    }
}
