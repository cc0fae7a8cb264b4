//! Configuration loading and representation.
//!
//! Everything comes from environment variables; only `DATABASE_URL` is
//! required.

use std::time::Duration;

use thiserror::Error;

use ledgerflow_observability::LogFormat;

use crate::ledger_service::DEFAULT_CONFLICT_RETRIES;
use crate::workers::outbox_relay::{
    DEFAULT_RELAY_BATCH_SIZE, DEFAULT_RELAY_INTERVAL, DEFAULT_RELAY_TOPIC, RelayConfig,
};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub relay_interval: Duration,
    pub relay_batch_size: usize,
    pub relay_topic: String,
    pub conflict_retries: u32,
    pub redis_url: Option<String>,
    pub log_format: LogFormat,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url: with_default_sslmode(&database_url),
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                var("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            relay_interval: Duration::from_millis(positive(
                "RELAY_INTERVAL_MS",
                parse_or(
                    "RELAY_INTERVAL_MS",
                    var("RELAY_INTERVAL_MS"),
                    DEFAULT_RELAY_INTERVAL.as_millis() as u64,
                )?,
            )?),
            relay_batch_size: positive(
                "RELAY_BATCH_SIZE",
                parse_or(
                    "RELAY_BATCH_SIZE",
                    var("RELAY_BATCH_SIZE"),
                    DEFAULT_RELAY_BATCH_SIZE,
                )?,
            )?,
            relay_topic: var("RELAY_TOPIC").unwrap_or_else(|| DEFAULT_RELAY_TOPIC.to_string()),
            conflict_retries: parse_or(
                "LEDGER_CONFLICT_RETRIES",
                var("LEDGER_CONFLICT_RETRIES"),
                DEFAULT_CONFLICT_RETRIES,
            )?,
            redis_url: var("REDIS_URL"),
            log_format: parse_or("LOG_FORMAT", var("LOG_FORMAT"), LogFormat::Json)?,
        })
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::default()
            .with_interval(self.relay_interval)
            .with_batch_size(self.relay_batch_size)
            .with_topic(self.relay_topic.clone())
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Default + PartialEq + core::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Append `sslmode=disable` unless the DSN already picks a mode.
fn with_default_sslmode(url: &str) -> String {
    if url.contains("sslmode=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&sslmode=disable")
    } else {
        format!("{url}?sslmode=disable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(settings(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert_eq!(
            settings(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn defaults_apply() {
        let s = settings(&[("DATABASE_URL", "postgres://u:p@db/ledger")]).unwrap();
        assert_eq!(s.database_url, "postgres://u:p@db/ledger?sslmode=disable");
        assert_eq!(s.max_connections, 10);
        assert_eq!(s.relay_interval, Duration::from_secs(1));
        assert_eq!(s.relay_batch_size, 10);
        assert_eq!(s.relay_topic, "transaction.events");
        assert_eq!(s.conflict_retries, 3);
        assert_eq!(s.redis_url, None);
        assert_eq!(s.log_format, LogFormat::Json);
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("DATABASE_URL", "postgres://db/ledger?sslmode=require"),
            ("DATABASE_MAX_CONNECTIONS", "25"),
            ("RELAY_INTERVAL_MS", "250"),
            ("RELAY_BATCH_SIZE", "50"),
            ("RELAY_TOPIC", "ledger"),
            ("LEDGER_CONFLICT_RETRIES", "0"),
            ("REDIS_URL", "redis://cache:6379"),
            ("LOG_FORMAT", "pretty"),
        ])
        .unwrap();

        assert_eq!(s.database_url, "postgres://db/ledger?sslmode=require");
        assert_eq!(s.max_connections, 25);

        let relay = s.relay_config();
        assert_eq!(relay.interval, Duration::from_millis(250));
        assert_eq!(relay.batch_size, 50);
        assert_eq!(relay.topic, "ledger");
        assert_eq!(s.conflict_retries, 0);
        assert_eq!(s.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(s.log_format, LogFormat::Pretty);
    }

    #[test]
    fn sslmode_is_appended_to_existing_query() {
        let s = settings(&[("DATABASE_URL", "postgres://db/ledger?application_name=relay")]).unwrap();
        assert_eq!(
            s.database_url,
            "postgres://db/ledger?application_name=relay&sslmode=disable"
        );
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = settings(&[("DATABASE_URL", "postgres://db"), ("RELAY_BATCH_SIZE", "lots")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "RELAY_BATCH_SIZE", .. }));

        let err = settings(&[("DATABASE_URL", "postgres://db"), ("LOG_FORMAT", "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LOG_FORMAT", .. }));
    }

    #[test]
    fn zero_relay_interval_and_batch_size_are_rejected() {
        let err = settings(&[("DATABASE_URL", "postgres://db"), ("RELAY_INTERVAL_MS", "0")])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "RELAY_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            }
        );

        let err = settings(&[("DATABASE_URL", "postgres://db"), ("RELAY_BATCH_SIZE", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "RELAY_BATCH_SIZE", .. }));

        let s = settings(&[("DATABASE_URL", "postgres://db"), ("RELAY_INTERVAL_MS", "1")]).unwrap();
        assert_eq!(s.relay_interval, Duration::from_millis(1));
    }
}
