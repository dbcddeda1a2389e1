//! Orchestrator configuration.
//!
//! Defaults suit local development. Every field can be overridden through
//! `EXCHANGEFLOW_*` environment variables:
//!
//! | Env Var                              | Default                  |
//! |--------------------------------------|--------------------------|
//! | `EXCHANGEFLOW_BIND_ADDR`             | `0.0.0.0:8080`           |
//! | `EXCHANGEFLOW_REQUEST_QUEUE`         | `exchange-set-requests`  |
//! | `EXCHANGEFLOW_RESPONSE_QUEUE`        | `build-responses`        |
//! | `EXCHANGEFLOW_POLL_MAX_MESSAGES`     | `16`                     |
//! | `EXCHANGEFLOW_POLL_INTERVAL_MS`      | `1000`                   |
//! | `EXCHANGEFLOW_ERROR_DELAY_MS`        | `5000`                   |
//! | `EXCHANGEFLOW_CHANNEL_CAPACITY`      | `16`                     |
//! | `EXCHANGEFLOW_ASSEMBLY_CONCURRENCY`  | `1`                      |
//! | `EXCHANGEFLOW_BATCH_EXPIRY_HOURS`    | `168`                    |
//! | `EXCHANGEFLOW_CONTINUE_ON_FAILURE`   | `false`                  |
//! | `EXCHANGEFLOW_THROW_ON_ERROR`        | `false`                  |
//! | `EXCHANGEFLOW_LOG_FORMAT`            | `pretty`                 |
//! | `EXCHANGEFLOW_<STD>_WORKER_QUEUE`    | per-standard default     |
//! | `EXCHANGEFLOW_<STD>_NAME_TEMPLATE`   | per-standard default     |
//!
//! `<STD>` is `S100`, `S63` or `S57`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::core::ExecutionOptions;
use crate::dispatch::DispatchSettings;
use crate::model::DataStandard;
use crate::observability::LogFormat;
use crate::standards::{StandardOverrides, StandardRegistry};

const PREFIX: &str = "EXCHANGEFLOW_";

/// A configuration value could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set but did not parse.
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        /// Full variable name.
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A parsed value is out of range.
    #[error("{field} must be {requirement}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// The constraint.
        requirement: &'static str,
    },
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP bind address.
    pub bind_addr: String,
    /// Inbound assembly request queue.
    pub request_queue: String,
    /// Inbound worker response queue.
    pub response_queue: String,
    /// Maximum messages per receive.
    pub poll_max_messages: usize,
    /// Pause after an empty receive.
    pub poll_interval_ms: u64,
    /// Pause after a poller error.
    pub error_delay_ms: u64,
    /// Request hand-off channel capacity.
    pub channel_capacity: usize,
    /// Assembly runs in flight at once.
    pub assembly_concurrency: usize,
    /// Lifetime of an allocated batch.
    pub batch_expiry_hours: i64,
    /// Global execution options.
    pub execution: ExecutionOptions,
    /// Per-standard profile overrides.
    pub standards: HashMap<DataStandard, StandardOverrides>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let dispatch = DispatchSettings::default();
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_queue: dispatch.request_queue,
            response_queue: dispatch.response_queue,
            poll_max_messages: dispatch.max_messages,
            poll_interval_ms: 1000,
            error_delay_ms: 5000,
            channel_capacity: dispatch.channel_capacity,
            assembly_concurrency: dispatch.assembly_concurrency,
            batch_expiry_hours: 24 * 7,
            execution: ExecutionOptions::default(),
            standards: HashMap::new(),
            log_format: LogFormat::default(),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        key: format!("{PREFIX}{key}"),
        value: value.to_string(),
        reason: err.to_string(),
    })
}

impl OrchestratorConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, which maps full variable names to
    /// values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{PREFIX}{key}"));
        let mut config = Self::default();

        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = get("REQUEST_QUEUE") {
            config.request_queue = v;
        }
        if let Some(v) = get("RESPONSE_QUEUE") {
            config.response_queue = v;
        }
        if let Some(v) = get("POLL_MAX_MESSAGES") {
            config.poll_max_messages = parse("POLL_MAX_MESSAGES", &v)?;
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("ERROR_DELAY_MS") {
            config.error_delay_ms = parse("ERROR_DELAY_MS", &v)?;
        }
        if let Some(v) = get("CHANNEL_CAPACITY") {
            config.channel_capacity = parse("CHANNEL_CAPACITY", &v)?;
        }
        if let Some(v) = get("ASSEMBLY_CONCURRENCY") {
            config.assembly_concurrency = parse("ASSEMBLY_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("BATCH_EXPIRY_HOURS") {
            config.batch_expiry_hours = parse("BATCH_EXPIRY_HOURS", &v)?;
        }
        if let Some(v) = get("CONTINUE_ON_FAILURE") {
            config.execution.continue_on_failure = parse("CONTINUE_ON_FAILURE", &v)?;
        }
        if let Some(v) = get("THROW_ON_ERROR") {
            config.execution.throw_on_error = parse("THROW_ON_ERROR", &v)?;
        }
        if let Some(v) = get("LOG_FORMAT") {
            config.log_format = parse("LOG_FORMAT", &v)?;
        }

        for standard in DataStandard::ALL {
            let tag = standard.to_string();
            let overrides = StandardOverrides {
                worker_queue: get(&format!("{tag}_WORKER_QUEUE")),
                exchange_set_name_template: get(&format!("{tag}_NAME_TEMPLATE")),
            };
            if overrides != StandardOverrides::default() {
                config.standards.insert(standard, overrides);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_max_messages == 0 {
            return Err(ConfigError::OutOfRange {
                field: "poll_max_messages",
                requirement: "at least 1",
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "channel_capacity",
                requirement: "at least 1",
            });
        }
        if self.assembly_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                field: "assembly_concurrency",
                requirement: "at least 1",
            });
        }
        if self.batch_expiry_hours <= 0 {
            return Err(ConfigError::OutOfRange {
                field: "batch_expiry_hours",
                requirement: "positive",
            });
        }
        Ok(())
    }

    /// Dispatcher settings.
    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            request_queue: self.request_queue.clone(),
            response_queue: self.response_queue.clone(),
            max_messages: self.poll_max_messages,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_delay: Duration::from_millis(self.error_delay_ms),
            channel_capacity: self.channel_capacity,
            assembly_concurrency: self.assembly_concurrency,
        }
    }

    /// Standard profiles with overrides applied.
    #[must_use]
    pub fn standard_registry(&self) -> StandardRegistry {
        StandardRegistry::with_overrides(&self.standards)
    }

    /// Batch lifetime.
    #[must_use]
    pub fn batch_expiry(&self) -> chrono::Duration {
        chrono::Duration::hours(self.batch_expiry_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.poll_max_messages, 16);
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.assembly_concurrency, 1);
        assert_eq!(config.batch_expiry(), chrono::Duration::days(7));
        assert_eq!(config.execution, ExecutionOptions::strict());
    }

    #[test]
    fn test_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("EXCHANGEFLOW_POLL_INTERVAL_MS", "250"),
            ("EXCHANGEFLOW_CONTINUE_ON_FAILURE", "true"),
            ("EXCHANGEFLOW_LOG_FORMAT", "json"),
            ("EXCHANGEFLOW_S63_WORKER_QUEUE", "enc-builds"),
        ]))
        .unwrap();

        assert_eq!(config.dispatch_settings().poll_interval, Duration::from_millis(250));
        assert!(config.execution.continue_on_failure);
        assert_eq!(config.log_format, LogFormat::Json);
        let registry = config.standard_registry();
        assert_eq!(registry.get(DataStandard::S63).worker_queue(), "enc-builds");
        assert_eq!(
            registry.get(DataStandard::S57).worker_queue(),
            "s57-build-requests"
        );
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("EXCHANGEFLOW_CHANNEL_CAPACITY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "EXCHANGEFLOW_CHANNEL_CAPACITY"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("EXCHANGEFLOW_CHANNEL_CAPACITY", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                field: "channel_capacity",
                requirement: "at least 1",
            }
        );
    }
}
