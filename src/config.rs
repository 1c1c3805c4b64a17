//! Application configuration
//!
//! Defaults are overridden by `IDEA_PIPELINE_*` environment variables.
//! Malformed values are reported instead of silently falling back.

use crate::error::{AppError, Result};
use crate::models::RetryPolicy;
use crate::pipeline::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every environment key
pub const ENV_PREFIX: &str = "IDEA_PIPELINE_";

string_enum! {
    /// Job store implementation
    pub enum StoreBackend {
        Memory => "memory",
        Sqlite => "sqlite",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid listen address: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub job_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub step_retry: RetryPolicy,
    /// Recent triggered alerts attached to a request that asks for them
    pub alert_context_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            job_ttl_secs: 3600,
            sweep_interval_secs: 60,
            step_retry: RetryPolicy::default(),
            alert_context_limit: 10,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            step_retry: self.step_retry,
            job_ttl: chrono::Duration::seconds(self.job_ttl_secs as i64),
            alert_context_limit: self.alert_context_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackSettings {
    pub queue_capacity: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            concurrency: 8,
            timeout_secs: 10,
        }
    }
}

/// Requests per second per bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub general: u32,
    pub submission: u32,
    pub ingestion: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: 100,
            submission: 10,
            ingestion: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StoreConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("jobs.db")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub callbacks: CallbackSettings,
    pub rate_limit: RateLimitConfig,
    pub store: StoreConfig,
    pub default_jurisdiction: String,
    pub recent_alert_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            worker: WorkerConfig::default(),
            callbacks: CallbackSettings::default(),
            rate_limit: RateLimitConfig::default(),
            store: StoreConfig::default(),
            default_jurisdiction: crate::compliance::DEFAULT_JURISDICTION.to_string(),
            recent_alert_capacity: crate::alerts::RECENT_CAPACITY,
        }
    }
}

/// Overwrite `target` when `key` is set
fn apply<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    if let Some(raw) = lookup(&name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{}={:?}: {}", name, raw, e)))?;
    }
    Ok(())
}

impl AppConfig {
    /// Defaults overridden by the process environment, then validated
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through `lookup`, then validated
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let l = &lookup;

        apply(l, "HOST", &mut config.server.host)?;
        apply(l, "PORT", &mut config.server.port)?;

        apply(l, "STORE", &mut config.store.backend)?;
        apply(l, "DATA_DIR", &mut config.store.data_dir)?;

        let worker = &mut config.worker;
        apply(l, "WORKERS", &mut worker.workers)?;
        apply(l, "POLL_INTERVAL_MS", &mut worker.poll_interval_ms)?;
        apply(l, "JOB_TTL_SECS", &mut worker.job_ttl_secs)?;
        apply(l, "SWEEP_INTERVAL_SECS", &mut worker.sweep_interval_secs)?;
        apply(l, "ALERT_CONTEXT_LIMIT", &mut worker.alert_context_limit)?;
        apply(l, "STEP_MAX_RETRIES", &mut worker.step_retry.max_retries)?;
        apply(l, "STEP_INITIAL_BACKOFF_MS", &mut worker.step_retry.initial_backoff_ms)?;
        apply(l, "STEP_BACKOFF_MULTIPLIER", &mut worker.step_retry.backoff_multiplier)?;
        apply(l, "STEP_MAX_BACKOFF_MS", &mut worker.step_retry.max_backoff_ms)?;

        apply(l, "CALLBACK_QUEUE_CAPACITY", &mut config.callbacks.queue_capacity)?;
        apply(l, "CALLBACK_CONCURRENCY", &mut config.callbacks.concurrency)?;
        apply(l, "CALLBACK_TIMEOUT_SECS", &mut config.callbacks.timeout_secs)?;

        apply(l, "RATE_LIMIT_GENERAL", &mut config.rate_limit.general)?;
        apply(l, "RATE_LIMIT_SUBMISSION", &mut config.rate_limit.submission)?;
        apply(l, "RATE_LIMIT_INGESTION", &mut config.rate_limit.ingestion)?;

        apply(l, "DEFAULT_JURISDICTION", &mut config.default_jurisdiction)?;
        apply(l, "RECENT_ALERT_CAPACITY", &mut config.recent_alert_capacity)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let worker = &self.worker;
        let retry = &worker.step_retry;

        if worker.workers == 0 {
            problems.push("worker count must be at least 1");
        }
        if worker.poll_interval_ms == 0 {
            problems.push("poll interval must be positive");
        }
        if worker.job_ttl_secs == 0 {
            problems.push("job TTL must be positive");
        }
        if worker.sweep_interval_secs == 0 {
            problems.push("sweep interval must be positive");
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            problems.push("initial backoff exceeds max backoff");
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            problems.push("backoff multiplier must be at least 1");
        }
        if self.callbacks.queue_capacity == 0 || self.callbacks.concurrency == 0 {
            problems.push("callback queue capacity and concurrency must be positive");
        }
        if self.callbacks.timeout_secs == 0 {
            problems.push("callback timeout must be positive");
        }
        let limits = &self.rate_limit;
        if limits.general == 0 || limits.submission == 0 || limits.ingestion == 0 {
            problems.push("rate limits must be positive");
        }
        if self.default_jurisdiction.trim().is_empty() {
            problems.push("default jurisdiction is required");
        }
        if self.recent_alert_capacity == 0 {
            problems.push("recent alert capacity must be positive");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.server.addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "9090"),
            ("STORE", "memory"),
            ("WORKERS", "2"),
            ("STEP_MAX_RETRIES", "5"),
            ("DEFAULT_JURISDICTION", "EU"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.worker.workers, 2);
        assert_eq!(config.worker.pipeline_settings().step_retry.max_retries, 5);
        assert_eq!(config.default_jurisdiction, "EU");
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("IDEA_PIPELINE_PORT")));

        assert!(AppConfig::from_lookup(lookup(&[("STORE", "postgres")])).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        for pairs in [
            &[("WORKERS", "0")][..],
            &[("JOB_TTL_SECS", "0")][..],
            &[("STEP_INITIAL_BACKOFF_MS", "5000"), ("STEP_MAX_BACKOFF_MS", "100")][..],
        ] {
            assert!(
                matches!(AppConfig::from_lookup(lookup(pairs)), Err(AppError::Config(_))),
                "{:?} should be rejected",
                pairs
            );
        }
    }
}
