//! API configuration: the shared worker settings plus HTTP concerns.

use wacrm_infra::config::{load_dotenv, parse_number, ConfigError, WorkerConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEV_JWT_SECRET: &str = "dev-secret";
pub const DEFAULT_DOWNLOAD_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub worker: WorkerConfig,
    pub bind_addr: String,
    pub jwt_secret: String,
    /// `JWT_SECRET` was unset and the insecure dev default is in use.
    pub jwt_secret_defaulted: bool,
    pub download_secret: String,
    pub download_ttl_secs: i64,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let worker = WorkerConfig::from_lookup(&lookup)?;

        let jwt_secret = get("JWT_SECRET");
        let jwt_secret_defaulted = jwt_secret.is_none();
        let jwt_secret = jwt_secret.unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let download_ttl_secs = match get("DOWNLOAD_TOKEN_TTL_SECS") {
            Some(v) => parse_number::<u32>("DOWNLOAD_TOKEN_TTL_SECS", &v)?.into(),
            None => DEFAULT_DOWNLOAD_TTL_SECS,
        };

        Ok(Self {
            worker,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            download_secret: get("DOWNLOAD_TOKEN_SECRET").unwrap_or_else(|| jwt_secret.clone()),
            jwt_secret,
            jwt_secret_defaulted,
            download_ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ApiConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn defaults_flag_dev_secret() {
        let config = from_pairs(&[]);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.jwt_secret, "dev-secret");
        assert!(config.jwt_secret_defaulted);
        assert_eq!(config.download_secret, "dev-secret");
        assert_eq!(config.download_ttl_secs, 900);
    }

    #[test]
    fn download_secret_follows_jwt_secret_unless_set() {
        let config = from_pairs(&[("JWT_SECRET", "s1"), ("BIND_ADDR", "127.0.0.1:9000")]);
        assert!(!config.jwt_secret_defaulted);
        assert_eq!(config.download_secret, "s1");
        assert_eq!(config.bind_addr, "127.0.0.1:9000");

        let config = from_pairs(&[("JWT_SECRET", "s1"), ("DOWNLOAD_TOKEN_SECRET", "s2")]);
        assert_eq!(config.download_secret, "s2");
    }
}
