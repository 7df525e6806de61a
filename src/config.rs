//! Dispatcher configuration.
//!
//! Values are resolved in order, later sources winning:
//!
//! 1. built-in defaults
//! 2. a YAML file named by `DISPATCHER_CONFIG`
//! 3. `DISPATCHER_*` environment variables
//!
//! Everything is static for the lifetime of the process.

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "DISPATCHER_CONFIG";
pub const ENV_BIND_ADDRESS: &str = "DISPATCHER_BIND_ADDRESS";
pub const ENV_REPLICAS: &str = "DISPATCHER_REPLICAS";
pub const ENV_QUEUE_CAPACITY: &str = "DISPATCHER_QUEUE_CAPACITY";
pub const ENV_CACHE_CAPACITY: &str = "DISPATCHER_CACHE_CAPACITY";
pub const ENV_WORKERS: &str = "DISPATCHER_WORKERS";
pub const ENV_TIMEOUT_SECS: &str = "DISPATCHER_TIMEOUT_SECS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultStoreConfig {
    /// Upper bound on stored records; `None` keeps every record for the
    /// lifetime of the process.
    pub max_records: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub bind_address: String,
    pub replicas: Vec<String>,
    pub queue_capacity: usize,
    pub cache_capacity: usize,
    pub workers: usize,
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,
    /// Path of the inference endpoint on every replica.
    pub predict_path: String,
    pub result_store: ResultStoreConfig,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            replicas: vec!["http://127.0.0.1:5000".to_string()],
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cache_capacity: 1000,
            workers: 4,
            request_timeout: Duration::from_secs(30),
            predict_path: "/predict".to_string(),
            result_store: ResultStoreConfig::default(),
            circuit_breaker: None,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then `DISPATCHER_CONFIG`, then environment overrides; validated.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::from_yaml_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to read config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
            self.bind_address = addr;
        }
        if let Some(list) = lookup(ENV_REPLICAS) {
            self.replicas = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = parse_env(ENV_QUEUE_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_CACHE_CAPACITY) {
            self.cache_capacity = parse_env(ENV_CACHE_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_SECS) {
            let secs: f64 = parse_env(ENV_TIMEOUT_SECS, &v)?;
            self.request_timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| invalid(ENV_TIMEOUT_SECS, e.to_string()))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_address
            .parse::<SocketAddr>()
            .map_err(|e| invalid("bind_address", e.to_string()))?;
        if self.replicas.is_empty() {
            return Err(invalid("replicas", "at least one replica is required"));
        }
        for (i, replica) in self.replicas.iter().enumerate() {
            let parsed = url::Url::parse(replica)
                .map_err(|e| invalid(format!("replicas[{}]", i), e.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(
                    format!("replicas[{}]", i),
                    format!("unsupported scheme '{}'", parsed.scheme()),
                ));
            }
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout_secs", "must be greater than zero"));
        }
        if let Some(cb) = &self.circuit_breaker {
            if cb.failure_threshold == 0 {
                return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn with_replicas<I, S>(mut self, replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replicas = replicas.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_predict_path(mut self, path: impl Into<String>) -> Self {
        self.predict_path = path.into();
        self
    }

    pub fn with_max_stored_results(mut self, max: usize) -> Self {
        self.result_store.max_records = Some(max);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }
}

fn invalid(field: impl Into<String>, details: impl Into<String>) -> Error {
    Error::configuration_with_context(
        "invalid dispatcher configuration",
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("config"),
    )
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, format!("'{}': {}", value, e)))
}

/// Serde adapter storing a `Duration` as (fractional) seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
