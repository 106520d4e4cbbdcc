// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Batched, non-blocking writer for diagnostic lines.
//!
//! Producers hold a cloneable [`DiagnosticHandle`] and enqueue deferred writes;
//! a single [`DiagnosticWriter`] task owns the [`DiagnosticLogger`] and applies
//! them in batches:
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │  enqueue (never blocks)
//!    └──────┬───────┘
//!           │ bounded queue, drops oldest when full
//!           v
//!    ┌──────────────┐
//!    │ Writer task  │  batch of `batch_size`, or timer tick
//!    └──────┬───────┘
//!           v
//!    ┌──────────────┐
//!    │    Logger    │
//!    └──────────────┘
//! ```
//!
//! Under overload the oldest pending write is evicted to make room for the
//! newest one. Writes are applied in enqueue order.

use crate::diagnostics::sink::{DiagnosticLogger, DiagnosticRecord};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A write deferred until the writer task flushes its batch.
pub type DeferredWrite = Box<dyn FnOnce(&DiagnosticLogger) + Send + 'static>;

struct PendingWrites {
    queue: Mutex<VecDeque<DeferredWrite>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl PendingWrites {
    fn push(&self, write: DeferredWrite) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() >= self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Diagnostic queue full ({} items), dropped oldest write ({dropped} dropped so far)",
                    self.capacity
                );
            }
            queue.push_back(write);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<DeferredWrite> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Cloneable producer side of the diagnostic writer.
#[derive(Clone)]
pub struct DiagnosticHandle {
    pending: Arc<PendingWrites>,
    cancel: CancellationToken,
}

impl DiagnosticHandle {
    /// Queues a deferred write. Never blocks; after shutdown the write is discarded.
    pub fn enqueue<F>(&self, write: F)
    where
        F: FnOnce(&DiagnosticLogger) + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return;
        }
        self.pending.push(Box::new(write));
    }

    /// Queues one record.
    pub fn emit(&self, record: DiagnosticRecord) {
        self.enqueue(move |logger| logger.write(&record));
    }

    /// Writes waiting for the writer task.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Writes evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.pending.dropped.load(Ordering::Relaxed)
    }

    /// Asks the writer task to flush everything pending and stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for DiagnosticHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticHandle")
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// The consumer task. Spawn [`DiagnosticWriter::run`] once per logger.
pub struct DiagnosticWriter {
    logger: DiagnosticLogger,
    pending: Arc<PendingWrites>,
    cancel: CancellationToken,
    batch_size: usize,
    flush_interval: Duration,
}

impl DiagnosticWriter {
    /// Returns the writer (to be spawned) and a handle for producers.
    #[must_use]
    pub fn new(
        logger: DiagnosticLogger,
        capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (Self, DiagnosticHandle) {
        let pending = Arc::new(PendingWrites {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();

        let writer = Self {
            logger,
            pending: Arc::clone(&pending),
            cancel: cancel.clone(),
            batch_size: batch_size.max(1),
            flush_interval,
        };
        let handle = DiagnosticHandle { pending, cancel };

        (writer, handle)
    }

    /// Consumes the queue until [`DiagnosticHandle::shutdown`], then flushes what is left.
    pub async fn run(self) {
        debug!("Diagnostic writer started");

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        let mut batch: Vec<DeferredWrite> = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    while let Some(write) = self.pending.pop() {
                        batch.push(write);
                    }
                    self.flush(&mut batch);
                    debug!("Diagnostic writer shutting down");
                    break;
                }
                () = self.pending.notify.notified() => {
                    while let Some(write) = self.pending.pop() {
                        batch.push(write);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch);
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch);
                    }
                }
            }
        }
    }

    fn flush(&self, batch: &mut Vec<DeferredWrite>) {
        for write in batch.drain(..) {
            write(&self.logger);
        }
    }
}
