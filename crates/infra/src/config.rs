//! Environment configuration shared by the worker and the API.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::{ProcessorSettings, RetryPolicy};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_QUEUE: &str = "q:exports";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub database_url: Option<String>,
    pub log_level: String,
    pub exports_dir: PathBuf,
    pub queue: String,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            database_url: None,
            log_level: "info".to_string(),
            exports_dir: PathBuf::from("exports"),
            queue: DEFAULT_QUEUE.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Read the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_attempts = match get("EXPORT_MAX_ATTEMPTS") {
            Some(v) => parse_number::<u32>("EXPORT_MAX_ATTEMPTS", &v)?,
            None => defaults.retry.max_attempts,
        };
        let base_delay = match get("EXPORT_RETRY_BASE_MS") {
            Some(v) => Duration::from_millis(parse_number::<u64>("EXPORT_RETRY_BASE_MS", &v)?),
            None => defaults.retry.base_delay,
        };

        Ok(Self {
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            database_url: get("DATABASE_URL"),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            exports_dir: get("EXPORTS_DIR").map(PathBuf::from).unwrap_or(defaults.exports_dir),
            queue: get("EXPORT_QUEUE").unwrap_or(defaults.queue),
            retry: RetryPolicy::new(max_attempts, base_delay),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            queue: self.queue.clone(),
            exports_dir: self.exports_dir.clone(),
            retry: self.retry.clone(),
        }
    }
}

/// Load `.env` into the process environment. A missing file is fine.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

pub fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(2000));
        assert_eq!(config.queue, "q:exports");
        assert_eq!(config.require_database_url(), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("REDIS_URL", "redis://cache:6379"),
            ("DATABASE_URL", "postgres://db/wacrm"),
            ("EXPORT_MAX_ATTEMPTS", "0"),
            ("EXPORT_RETRY_BASE_MS", "250"),
            ("EXPORTS_DIR", "/var/exports"),
            ("EXPORT_QUEUE", "q:exports:eu"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.require_database_url().unwrap(), "postgres://db/wacrm");
        assert_eq!(config.retry, RetryPolicy::new(0, Duration::from_millis(250)));
        assert_eq!(config.exports_dir, PathBuf::from("/var/exports"));
        assert_eq!(config.processor_settings().queue, "q:exports:eu");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn rejects_non_numeric() {
        let err = from_pairs(&[("EXPORT_MAX_ATTEMPTS", "three")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                name: "EXPORT_MAX_ATTEMPTS",
                value: "three".to_string()
            }
        );
        assert!(from_pairs(&[("EXPORT_RETRY_BASE_MS", "-5")]).is_err());
    }

    #[test]
    fn blank_values_fall_back() {
        let config = from_pairs(&[("EXPORT_MAX_ATTEMPTS", " "), ("REDIS_URL", "")]).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
    }
}
