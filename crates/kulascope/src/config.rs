// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use reqwest::header::HeaderValue;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const STAGING_LOGS_URL: &str = "https://api.staging.kulawise.com/kulascope/logs";
const PRODUCTION_LOGS_URL: &str = "https://api.kulawise.com/kulascope/logs";

/// Worker count used when the configured value is unset or non-positive.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Collector environment the SDK ships to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Collector URL that receives `POST`ed log events.
    pub fn logs_endpoint(&self) -> &'static str {
        match self {
            Environment::Staging => STAGING_LOGS_URL,
            Environment::Production => PRODUCTION_LOGS_URL,
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue sizes, batching and retry tunables of the background pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Capacity of the delivery job queue. Enqueueing suspends when full.
    pub delivery_queue_capacity: usize,
    /// Retries after the first delivery attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every following one.
    pub backoff_base: Duration,
    /// Upper bound for a single HTTP attempt.
    pub request_timeout: Duration,
    /// Capacity of the diagnostic queue. The oldest pending write is dropped when full.
    pub diagnostic_queue_capacity: usize,
    /// Diagnostic writes flushed at once when the batch fills up.
    pub batch_size: usize,
    /// Period of the diagnostic flush timer.
    pub flush_interval: Duration,
    /// Time given to in-flight jobs and batches on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            delivery_queue_capacity: 50_000,
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            diagnostic_queue_capacity: 100_000,
            batch_size: 100,
            flush_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Configuration consumed by [`crate::Kulascope`].
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Credential sent as `x-api-key` with every delivery.
    pub api_key: String,
    /// Header names whose values are replaced in captured request headers.
    pub redact_headers: Vec<String>,
    /// Keys scrubbed from captured request bodies.
    pub redact_request_body: Vec<String>,
    /// Keys scrubbed from captured response bodies.
    pub redact_response_body: Vec<String>,
    /// Keys masked by the line-level redaction of the diagnostic sink.
    /// Empty means the built-in list.
    pub redact_log_keys: Vec<String>,
    /// Number of delivery workers; zero falls back to [`DEFAULT_WORKER_COUNT`].
    pub worker_count: usize,
    /// Replaces the environment's collector URL, e.g. for a self-hosted collector.
    pub endpoint_override: Option<String>,
    pub pipeline: PipelineSettings,
}

impl Config {
    /// Creates a configuration with default redaction rules and pipeline settings.
    pub fn new(environment: Environment, api_key: impl Into<String>) -> Self {
        Self {
            environment,
            api_key: api_key.into(),
            redact_headers: Vec::new(),
            redact_request_body: Vec::new(),
            redact_response_body: Vec::new(),
            redact_log_keys: Vec::new(),
            worker_count: 0,
            endpoint_override: None,
            pipeline: PipelineSettings::default(),
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("KULASCOPE_ENVIRONMENT")
            .ok()
            .map(|val| val.parse::<Environment>())
            .transpose()?
            .unwrap_or(Environment::Production);

        let api_key = env::var("KULASCOPE_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let worker_count = match env::var("KULASCOPE_WORKER_COUNT") {
            Ok(val) => val.trim().parse::<i64>().map_err(|_| {
                ConfigError::Invalid(format!("KULASCOPE_WORKER_COUNT is not a number: {val}"))
            })?,
            Err(_) => 0,
        };

        let config = Self {
            redact_headers: list_from_env("KULASCOPE_REDACT_HEADERS"),
            redact_request_body: list_from_env("KULASCOPE_REDACT_REQUEST_BODY"),
            redact_response_body: list_from_env("KULASCOPE_REDACT_RESPONSE_BODY"),
            worker_count: usize::try_from(worker_count).unwrap_or(0),
            endpoint_override: env::var("KULASCOPE_ENDPOINT")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            ..Self::new(environment, api_key)
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if HeaderValue::from_str(&self.api_key).is_err() {
            return Err(ConfigError::Invalid(
                "api_key contains characters not allowed in an HTTP header".to_string(),
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.delivery_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "delivery_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if pipeline.diagnostic_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "diagnostic_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if pipeline.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if pipeline.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            DEFAULT_WORKER_COUNT
        } else {
            self.worker_count
        }
    }

    pub fn logs_endpoint(&self) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| self.environment.logs_endpoint().to_string())
    }
}

fn list_from_env(name: &str) -> Vec<String> {
    env::var(name)
        .map(|val| {
            val.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
