// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

use crate::delivery::transport::{DeliveryTarget, Transport, TransportError};
use crate::diagnostics::{DiagnosticHandle, DiagnosticRecord};
use crate::event::{Level, LogEvent};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One fully assembled event waiting to be shipped.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub target: Arc<DeliveryTarget>,
    pub payload: LogEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to serialize log event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("delivery queue is closed")]
    QueueClosed,

    #[error("log event cannot be sent: {0}")]
    InvalidRequest(String),

    #[error("failed to send log after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the failed attempt number `attempt` (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    /// 4xx: terminal, not retried.
    Rejected(StatusCode),
    /// The request could not be built, e.g. an unusable credential. Terminal.
    Invalid(String),
    /// 5xx or network failure.
    Retryable(String),
}

pub fn classify(result: Result<StatusCode, TransportError>) -> AttemptOutcome {
    match result {
        Ok(status) if status.is_server_error() => {
            AttemptOutcome::Retryable(format!("server error: {}", status.as_u16()))
        }
        Ok(status) if status.is_client_error() => AttemptOutcome::Rejected(status),
        Ok(_) => AttemptOutcome::Delivered,
        Err(e @ TransportError::InvalidRequest(_)) => AttemptOutcome::Invalid(e.to_string()),
        Err(e @ TransportError::Network(_)) => AttemptOutcome::Retryable(e.to_string()),
    }
}

/// Delivers one job, retrying transient failures with exponential backoff.
///
/// Returns the number of attempts made on success or rejection.
pub async fn send_with_retry(
    transport: &dyn Transport,
    job: &DeliveryJob,
    policy: RetryPolicy,
) -> Result<u32, DeliveryError> {
    let body = serde_json::to_vec(&job.payload)?;
    let max_attempts = policy.max_attempts();

    let mut attempt: u32 = 0;
    loop {
        let outcome = classify(transport.send(&job.target, body.clone()).await);
        attempt += 1;

        match outcome {
            AttemptOutcome::Delivered => return Ok(attempt),
            AttemptOutcome::Rejected(status) => {
                warn!(
                    "Collector rejected log event {} with status {}, not retrying",
                    job.payload.trace_id,
                    status.as_u16()
                );
                return Ok(attempt);
            }
            AttemptOutcome::Invalid(reason) => return Err(DeliveryError::InvalidRequest(reason)),
            AttemptOutcome::Retryable(reason) => {
                if attempt >= max_attempts {
                    return Err(DeliveryError::RetriesExhausted {
                        attempts: attempt,
                        last_error: reason,
                    });
                }
                let wait = policy.backoff(attempt - 1);
                debug!(
                    "Attempt {attempt} for log event {} failed: {reason}, retrying in {}ms",
                    job.payload.trace_id,
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Cloneable producer side of the delivery queue.
#[derive(Clone, Debug)]
pub struct DeliveryHandle {
    tx: mpsc::Sender<DeliveryJob>,
    cancel: CancellationToken,
}

impl DeliveryHandle {
    /// Queues a job, waiting for room when the queue is full.
    pub async fn enqueue(&self, job: DeliveryJob) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::QueueClosed);
        }
        self.tx
            .send(job)
            .await
            .map_err(|_| DeliveryError::QueueClosed)
    }

    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Stops accepting jobs. Workers drain what is queued, then exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Fixed pool of workers consuming the delivery queue.
pub struct DeliveryPipeline {
    rx: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>,
    transport: Arc<dyn Transport>,
    diagnostics: DiagnosticHandle,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl DeliveryPipeline {
    #[must_use]
    pub fn new(
        capacity: usize,
        transport: Arc<dyn Transport>,
        diagnostics: DiagnosticHandle,
        policy: RetryPolicy,
    ) -> (Self, DeliveryHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let pipeline = Self {
            rx: Arc::new(Mutex::new(rx)),
            transport,
            diagnostics,
            policy,
            cancel: cancel.clone(),
        };
        (pipeline, DeliveryHandle { tx, cancel })
    }

    /// Spawns `workers` worker tasks.
    pub fn start(self, workers: usize) -> Vec<JoinHandle<()>> {
        let pipeline = Arc::new(self);
        (0..workers.max(1))
            .map(|id| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { pipeline.work(id).await })
            })
            .collect()
    }

    async fn work(&self, id: usize) {
        debug!("Delivery worker {id} started");
        while let Some(job) = self.next_job().await {
            self.deliver(job).await;
        }
        debug!("Delivery worker {id} stopped");
    }

    async fn next_job(&self) -> Option<DeliveryJob> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            job = rx.recv() => job,
            () = self.cancel.cancelled() => {
                // late senders get an error; jobs already accepted are still handed out
                rx.close();
                rx.recv().await
            }
        }
    }

    async fn deliver(&self, job: DeliveryJob) {
        match send_with_retry(self.transport.as_ref(), &job, self.policy).await {
            Ok(attempts) => {
                debug!(
                    "Delivered log event {} after {attempts} attempt(s)",
                    job.payload.trace_id
                );
            }
            Err(DeliveryError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                self.diagnostics.emit(
                    DiagnosticRecord::new(Level::Error, "failed to send log after retries")
                        .with_trace_id(job.payload.trace_id)
                        .with_field("attempts", attempts)
                        .with_error(last_error),
                );
            }
            Err(e) => {
                self.diagnostics.emit(
                    DiagnosticRecord::new(Level::Error, "dropping log event")
                        .with_trace_id(job.payload.trace_id)
                        .with_error(e.to_string()),
                );
            }
        }
    }
}
