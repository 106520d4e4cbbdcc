// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the background pipelines.
//!
//! [`Kulascope`] is what a web-framework adapter holds on to: it opens a
//! [`RequestLog`] per request, turns the finished request into a redacted
//! [`LogEvent`] and hands it to the delivery workers.

use crate::config::{Config, Environment};
use crate::delivery::{
    DeliveryError, DeliveryHandle, DeliveryJob, DeliveryPipeline, DeliveryTarget, HttpTransport,
    RetryPolicy, Transport,
};
use crate::diagnostics::{DiagnosticHandle, DiagnosticLogger, DiagnosticWriter, RedactingWriter};
use crate::error::ConfigError;
use crate::event::{Level, LogEvent};
use crate::redact::{
    redact_body_value, redact_headers, HeaderSnapshot, RuleSet, DEFAULT_BODY_RULES,
    DEFAULT_HEADER_RULES,
};
use crate::request_log::RequestLog;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

const REQUEST_COMPLETED: &str = "http request completed";

/// What the adapter observed about one finished request.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub client_ip: Option<String>,
    /// When the adapter started handling the request.
    pub started: Instant,
    pub request_headers: Option<HeaderSnapshot>,
    pub request_body: Option<Vec<u8>>,
    pub response_body: Option<Vec<u8>>,
}

impl RequestSummary {
    pub fn new(method: impl Into<String>, path: impl Into<String>, status: u16, started: Instant) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            status,
            client_ip: None,
            started,
            request_headers: None,
            request_body: None,
            response_body: None,
        }
    }
}

#[derive(Default)]
struct Tasks {
    workers: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// Running request logger: diagnostic writer task plus delivery worker pool.
pub struct Kulascope {
    environment: Environment,
    target: Arc<DeliveryTarget>,
    header_rules: RuleSet,
    request_body_rules: RuleSet,
    response_body_rules: RuleSet,
    diagnostics: DiagnosticHandle,
    delivery: DeliveryHandle,
    shutdown_grace: Duration,
    tasks: Mutex<Tasks>,
}

impl Kulascope {
    /// Starts the pipelines with the HTTP transport and stdout as diagnostic sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: Config) -> Result<Self, ConfigError> {
        let transport = Arc::new(HttpTransport::new(config.pipeline.request_timeout));
        Self::start_with(config, transport, Box::new(io::stdout()))
    }

    /// Starts the pipelines over a custom transport and diagnostic sink.
    ///
    /// Lines written to `sink` go through the line-level redaction of
    /// `config.redact_log_keys`.
    pub fn start_with(
        config: Config,
        transport: Arc<dyn Transport>,
        sink: Box<dyn Write + Send>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let sink = RedactingWriter::new(sink, &config.redact_log_keys)
            .map_err(|e| ConfigError::Invalid(format!("invalid log redaction key: {e}")))?;
        let logger = DiagnosticLogger::new(config.environment.as_str(), Box::new(sink));

        let settings = &config.pipeline;
        let (writer, diagnostics) = DiagnosticWriter::new(
            logger,
            settings.diagnostic_queue_capacity,
            settings.batch_size,
            settings.flush_interval,
        );
        let writer = tokio::spawn(writer.run());

        let policy = RetryPolicy {
            max_retries: settings.max_retries,
            backoff_base: settings.backoff_base,
        };
        let (pipeline, delivery) = DeliveryPipeline::new(
            settings.delivery_queue_capacity,
            transport,
            diagnostics.clone(),
            policy,
        );
        let worker_count = config.effective_worker_count();
        let workers = pipeline.start(worker_count);

        debug!(
            "Kulascope started for {} with {worker_count} delivery workers",
            config.environment
        );

        Ok(Self {
            environment: config.environment,
            target: Arc::new(DeliveryTarget {
                endpoint: config.logs_endpoint(),
                api_key: config.api_key.clone(),
            }),
            header_rules: RuleSet::merge(DEFAULT_HEADER_RULES, &config.redact_headers),
            request_body_rules: RuleSet::merge(DEFAULT_BODY_RULES, &config.redact_request_body),
            response_body_rules: RuleSet::merge(DEFAULT_BODY_RULES, &config.redact_response_body),
            diagnostics,
            delivery,
            shutdown_grace: config.pipeline.shutdown_grace,
            tasks: Mutex::new(Tasks {
                workers,
                writer: Some(writer),
            }),
        })
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Process-wide handle of the diagnostic writer.
    pub fn diagnostics(&self) -> DiagnosticHandle {
        self.diagnostics.clone()
    }

    /// Opens the log of a new request under a fresh trace id.
    pub fn begin_request(&self) -> RequestLog {
        RequestLog::new(Uuid::new_v4(), Some(self.diagnostics.clone()))
    }

    /// Records the access log line, assembles the request's event and queues it
    /// for delivery. Only waits when the delivery queue is full.
    pub async fn finish_request(
        &self,
        log: &RequestLog,
        summary: RequestSummary,
    ) -> Result<(), DeliveryError> {
        let latency = u64::try_from(summary.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut access = log
            .info()
            .str("method", summary.method.as_str())
            .str("path", summary.path.as_str())
            .field("status", summary.status)
            .field("latency", latency);
        if let Some(ip) = &summary.client_ip {
            access = access.str("ip", ip.as_str());
        }
        access.msg(REQUEST_COMPLETED);

        let event = self.build_event(log, summary, latency);
        self.delivery
            .enqueue(DeliveryJob {
                target: Arc::clone(&self.target),
                payload: event,
            })
            .await
    }

    fn build_event(&self, log: &RequestLog, summary: RequestSummary, latency: u64) -> LogEvent {
        let mut event = LogEvent::new(log.trace_id(), Level::Info, REQUEST_COMPLETED);

        if let Some(headers) = &summary.request_headers {
            let headers = redact_headers(headers, &self.header_rules)
                .into_iter()
                .map(|(name, values)| (name, Value::from(values)))
                .collect();
            event
                .metadata
                .insert("request_headers".to_string(), Value::Object(headers));
        }
        if let Some(body) = &summary.request_body {
            event.metadata.insert(
                "request_body".to_string(),
                redact_body_value(body, &self.request_body_rules),
            );
        }
        if let Some(body) = &summary.response_body {
            event.metadata.insert(
                "response_body".to_string(),
                redact_body_value(body, &self.response_body_rules),
            );
        }

        event.status = Some(summary.status);
        event.method = Some(summary.method);
        event.path = Some(summary.path);
        event.latency_ms = Some(latency);
        event.client_ip = summary.client_ip;
        event.sub_logs = log.snapshot();
        event
    }

    /// Stops accepting jobs, lets the workers drain the queue and the writer
    /// flush, then aborts whatever is still running after the grace period.
    pub async fn shutdown(&self) {
        let Tasks { workers, writer } = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;

        self.delivery.shutdown();
        for worker in workers {
            join_until(worker, deadline, "delivery worker").await;
        }

        // workers may still record exhausted retries, stop the writer last
        // and give it a grace period of its own
        self.diagnostics.shutdown();
        if let Some(writer) = writer {
            let deadline = tokio::time::Instant::now() + self.shutdown_grace;
            join_until(writer, deadline, "diagnostic writer").await;
        }
        debug!("Kulascope shut down");
    }
}

async fn join_until(mut task: JoinHandle<()>, deadline: tokio::time::Instant, name: &str) {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{name} task failed: {e}"),
        Err(_) => {
            warn!("{name} did not finish within the shutdown grace period, aborting");
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::delivery::TransportError;
    use crate::diagnostics::MemorySink;
    use crate::redact::REDACTION_SENTINEL;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::json;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingTransport {
        bodies: Mutex<Vec<Value>>,
    }

    impl RecordingTransport {
        fn bodies(&self) -> Vec<Value> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            _target: &DeliveryTarget,
            body: Vec<u8>,
        ) -> Result<StatusCode, TransportError> {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&body).unwrap());
            Ok(StatusCode::ACCEPTED)
        }
    }

    struct StuckTransport;

    #[async_trait]
    impl Transport for StuckTransport {
        async fn send(
            &self,
            _target: &DeliveryTarget,
            _body: Vec<u8>,
        ) -> Result<StatusCode, TransportError> {
            std::future::pending().await
        }
    }

    fn config() -> Config {
        let mut config = Config::new(Environment::Staging, "ks_test");
        config.worker_count = 2;
        config
    }

    #[tokio::test]
    async fn test_finish_request_delivers_redacted_event() {
        let transport = Arc::new(RecordingTransport::default());
        let sink = MemorySink::new();
        let kulascope =
            Kulascope::start_with(config(), transport.clone(), Box::new(sink.clone())).unwrap();

        let log = kulascope.begin_request();
        log.debug().str("user", "alice").msg("Checking credentials");

        let mut summary = RequestSummary::new("POST", "/login", 200, Instant::now());
        summary.client_ip = Some("10.0.0.7".to_string());
        summary.request_headers = Some(HeaderSnapshot::from([
            ("Authorization".to_string(), vec!["Bearer xyz".to_string()]),
            ("Accept".to_string(), vec!["application/json".to_string()]),
        ]));
        summary.request_body = Some(br#"{"user":{"password":"p@ss","id":1}}"#.to_vec());
        summary.response_body = Some(b"not json".to_vec());

        kulascope.finish_request(&log, summary).await.unwrap();
        kulascope.shutdown().await;

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        let event = &bodies[0];
        assert_eq!(event["trace_id"], json!(log.trace_id().to_string()));
        assert_eq!(event["message"], json!(REQUEST_COMPLETED));
        assert_eq!(event["status"], json!(200));
        assert_eq!(event["method"], json!("POST"));
        assert_eq!(event["ip"], json!("10.0.0.7"));
        assert_eq!(
            event["metadata"]["request_headers"]["Authorization"],
            json!([REDACTION_SENTINEL])
        );
        assert_eq!(
            event["metadata"]["request_headers"]["Accept"],
            json!(["application/json"])
        );
        assert_eq!(
            event["metadata"]["request_body"],
            json!({"user": {"password": REDACTION_SENTINEL, "id": 1}})
        );
        assert_eq!(event["metadata"]["response_body"], json!("not json"));

        let sub_logs = event["sub_logs"].as_array().unwrap();
        assert_eq!(sub_logs.len(), 2);
        assert_eq!(sub_logs[0]["message"], json!("Checking credentials"));
        assert_eq!(sub_logs[1]["message"], json!(REQUEST_COMPLETED));
        assert_eq!(sub_logs[1]["metadata"]["path"], json!("/login"));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["env"] == json!("staging")));
        assert_eq!(records[1]["method"], json!("POST"));
    }

    #[tokio::test]
    async fn test_diagnostic_lines_are_masked() {
        let transport = Arc::new(RecordingTransport::default());
        let sink = MemorySink::new();
        let kulascope =
            Kulascope::start_with(config(), transport, Box::new(sink.clone())).unwrap();

        let log = kulascope.begin_request();
        log.info()
            .str("password", "hunter2")
            .str("user", "alice")
            .msg("login attempt");
        kulascope.shutdown().await;

        let records = sink.records();
        assert_eq!(records[0]["password"], json!("[REDACTED]"));
        assert_eq!(records[0]["user"], json!("alice"));
        assert_eq!(log.snapshot()[0].metadata["password"], json!("hunter2"));
    }

    #[tokio::test]
    async fn test_start_rejects_missing_api_key() {
        let config = Config::new(Environment::Production, "  ");
        let result = Kulascope::start_with(
            config,
            Arc::new(RecordingTransport::default()),
            Box::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_begin_request_uses_fresh_trace_ids() {
        let kulascope = Kulascope::start_with(
            config(),
            Arc::new(RecordingTransport::default()),
            Box::new(MemorySink::new()),
        )
        .unwrap();

        let first = kulascope.begin_request();
        let second = kulascope.begin_request();
        assert_ne!(first.trace_id(), second.trace_id());
        assert_ne!(first.trace_id(), Uuid::nil());
        kulascope.shutdown().await;
    }

    #[tokio::test]
    async fn test_finish_after_shutdown_is_rejected() {
        let kulascope = Kulascope::start_with(
            config(),
            Arc::new(RecordingTransport::default()),
            Box::new(MemorySink::new()),
        )
        .unwrap();
        kulascope.shutdown().await;

        let log = kulascope.begin_request();
        let result = kulascope
            .finish_request(&log, RequestSummary::new("GET", "/", 204, Instant::now()))
            .await;
        assert!(matches!(result, Err(DeliveryError::QueueClosed)));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_shutdown_aborts_stuck_workers_after_grace() {
        let mut config = config();
        config.worker_count = 1;
        config.pipeline.shutdown_grace = Duration::from_secs(2);
        config.pipeline.flush_interval = Duration::from_secs(3600);
        let sink = MemorySink::new();
        let kulascope =
            Kulascope::start_with(config, Arc::new(StuckTransport), Box::new(sink.clone()))
                .unwrap();

        let log = kulascope.begin_request();
        log.info().msg("important line");
        kulascope
            .finish_request(&log, RequestSummary::new("GET", "/slow", 200, Instant::now()))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        kulascope.shutdown().await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(logs_contain("delivery worker did not finish within the shutdown grace period"));
        assert!(!logs_contain("diagnostic writer did not finish"));

        let messages: Vec<_> = sink
            .records()
            .into_iter()
            .map(|r| r["message"].clone())
            .collect();
        assert_eq!(messages, vec![json!("important line"), json!(REQUEST_COMPLETED)]);
    }
}
