use crate::sdk::geo::cache::DEFAULT_TTL;
use crate::sdk::geo::provider::remote::DEFAULT_BASE_URL;
use crate::sdk::geo::writeback::DEFAULT_QUEUE_SIZE;
use crate::sdk::util::rate_limit::DEFAULT_PER_MINUTE;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub api_key: String,
    pub base_url: String,
    pub provider_timeout: Duration,
    pub tier_timeout: Duration,
    pub rate_per_minute: u32,
    pub concurrency: usize,
    pub ttl: Duration,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub queue_size: usize,
}

impl ResolverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars().collect())
    }

    /// Builds the config from an explicit variable map. Empty values count as unset.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("GEOCODE_API_KEY").ok_or(ConfigError::Missing("GEOCODE_API_KEY"))?;

        Ok(Self {
            api_key,
            base_url: get("GEOCODE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            provider_timeout: Duration::from_secs(parse_or(
                "GEOCODE_TIMEOUT_SECS",
                get("GEOCODE_TIMEOUT_SECS"),
                10u64,
            )?),
            tier_timeout: Duration::from_millis(parse_or(
                "TIER_TIMEOUT_MS",
                get("TIER_TIMEOUT_MS"),
                2000u64,
            )?),
            rate_per_minute: parse_or(
                "GEOCODE_RATE_PER_MINUTE",
                get("GEOCODE_RATE_PER_MINUTE"),
                DEFAULT_PER_MINUTE,
            )?,
            concurrency: parse_or("RESOLVER_CONCURRENCY", get("RESOLVER_CONCURRENCY"), 8usize)?,
            ttl: match get("CACHE_TTL_DAYS") {
                Some(raw) => Duration::from_secs(parse::<u64>("CACHE_TTL_DAYS", &raw)? * 24 * 60 * 60),
                None => DEFAULT_TTL,
            },
            redis_url: get("REDIS_URL"),
            database_url: get("DATABASE_URL"),
            queue_size: parse_or(
                "WRITEBACK_QUEUE_SIZE",
                get("WRITEBACK_QUEUE_SIZE"),
                DEFAULT_QUEUE_SIZE,
            )?,
        })
    }
}

fn parse<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn parse_or<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = ResolverConfig::from_vars(vars(&[("GEOCODE_API_KEY", "secret")])).unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.rate_per_minute, 40);
        assert_eq!(config.provider_timeout, Duration::from_secs(10));
        assert_eq!(config.redis_url, None);
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn missing_key_is_an_error() {
        assert_eq!(
            ResolverConfig::from_vars(vars(&[("GEOCODE_API_KEY", "  ")])),
            Err(ConfigError::Missing("GEOCODE_API_KEY"))
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ResolverConfig::from_vars(vars(&[
            ("GEOCODE_API_KEY", "k"),
            ("CACHE_TTL_DAYS", "7"),
            ("RESOLVER_CONCURRENCY", "2"),
            ("REDIS_URL", "redis://127.0.0.1/"),
        ]))
        .unwrap();
        assert_eq!(config.ttl, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = ResolverConfig::from_vars(vars(&[
            ("GEOCODE_API_KEY", "k"),
            ("RESOLVER_CONCURRENCY", "lots"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "RESOLVER_CONCURRENCY",
                value: "lots".to_string()
            }
        );
    }
}
