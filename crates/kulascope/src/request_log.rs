// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Per-request accumulation of sub-events.
//!
//! A [`RequestLog`] is created when a request starts and is handed to every piece
//! of code that logs on behalf of that request, either explicitly or through
//! [`RequestLog::scope`]. Each finalised event is appended to the request's own
//! buffer and, independently, queued as a diagnostic line.

use crate::diagnostics::{DiagnosticHandle, DiagnosticRecord};
use crate::event::{Level, Metadata, SubLogEntry};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_REQUEST: RequestLog;
}

struct Inner {
    trace_id: Uuid,
    entries: Mutex<Vec<SubLogEntry>>,
    diagnostics: Option<DiagnosticHandle>,
}

/// Handle to one request's sub-event buffer. Clones share the buffer.
#[derive(Clone)]
pub struct RequestLog {
    inner: Arc<Inner>,
}

impl RequestLog {
    pub fn new(trace_id: Uuid, diagnostics: Option<DiagnosticHandle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                trace_id,
                entries: Mutex::new(Vec::new()),
                diagnostics,
            }),
        }
    }

    /// A log that isn't tied to any request: nil trace id, no diagnostic lines.
    pub fn detached() -> Self {
        Self::new(Uuid::nil(), None)
    }

    pub fn trace_id(&self) -> Uuid {
        self.inner.trace_id
    }

    /// Appends one sub-event. Appends on the same handle never interleave.
    pub fn append(
        &self,
        level: Level,
        message: impl Into<String>,
        metadata: Metadata,
        error: Option<String>,
    ) {
        let entry = SubLogEntry {
            level,
            message: message.into(),
            metadata,
            error,
            timestamp: Utc::now(),
        };
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Copy of the sub-events recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<SubLogEntry> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn event(&self, level: Level) -> EventBuilder {
        EventBuilder {
            log: self.clone(),
            level,
            metadata: Metadata::new(),
            error: None,
        }
    }

    pub fn trace(&self) -> EventBuilder {
        self.event(Level::Trace)
    }

    pub fn debug(&self) -> EventBuilder {
        self.event(Level::Debug)
    }

    pub fn info(&self) -> EventBuilder {
        self.event(Level::Info)
    }

    pub fn warn(&self) -> EventBuilder {
        self.event(Level::Warn)
    }

    pub fn error(&self) -> EventBuilder {
        self.event(Level::Error)
    }

    pub fn fatal(&self) -> EventBuilder {
        self.event(Level::Fatal)
    }

    pub fn panic(&self) -> EventBuilder {
        self.event(Level::Panic)
    }

    /// Runs `fut` with this log installed as the task's current request.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_REQUEST.scope(self, fut).await
    }

    /// The log installed by the enclosing [`RequestLog::scope`], or a detached one.
    pub fn current() -> Self {
        CURRENT_REQUEST
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Self::detached())
    }
}

impl std::fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLog")
            .field("trace_id", &self.inner.trace_id)
            .field("entries", &self.len())
            .finish()
    }
}

/// A leveled event under construction. Nothing is recorded until [`EventBuilder::msg`].
#[must_use = "events are only recorded by calling `msg`"]
pub struct EventBuilder {
    log: RequestLog,
    level: Level,
    metadata: Metadata,
    error: Option<String>,
}

impl EventBuilder {
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn str(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.field(key, Value::String(value.into()))
    }

    pub fn int(self, key: impl Into<String>, value: i64) -> Self {
        self.field(key, value)
    }

    pub fn float(self, key: impl Into<String>, value: f64) -> Self {
        self.field(key, value)
    }

    pub fn bool(self, key: impl Into<String>, value: bool) -> Self {
        self.field(key, value)
    }

    pub fn strs<S: AsRef<str>>(self, key: impl Into<String>, values: &[S]) -> Self {
        let values = values
            .iter()
            .map(|v| Value::from(v.as_ref()))
            .collect::<Vec<_>>();
        self.field(key, values)
    }

    /// Stores raw JSON bytes as a string field.
    pub fn raw_json(self, key: impl Into<String>, value: &[u8]) -> Self {
        self.field(key, String::from_utf8_lossy(value).into_owned())
    }

    /// Stores a duration in milliseconds.
    pub fn duration(self, key: impl Into<String>, value: Duration) -> Self {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        self.field(key, millis)
    }

    pub fn time(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.field(key, value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn err<E: std::fmt::Display + ?Sized>(mut self, err: &E) -> Self {
        let text = err.to_string();
        self.metadata
            .insert("error".to_string(), Value::String(text.clone()));
        self.error = Some(text);
        self
    }

    /// Records the event: one sub-event on the request, one diagnostic line.
    pub fn msg(self, message: impl Into<String>) {
        let EventBuilder {
            log,
            level,
            metadata,
            error,
        } = self;
        let message = message.into();

        let record = log.inner.diagnostics.as_ref().map(|_| {
            let mut record =
                DiagnosticRecord::new(level, message.clone()).with_trace_id(log.trace_id());
            record.fields = metadata.clone();
            record.error = error.clone();
            record
        });

        log.append(level, message, metadata, error);

        if let (Some(diagnostics), Some(record)) = (&log.inner.diagnostics, record) {
            diagnostics.emit(record);
        }
    }
}
