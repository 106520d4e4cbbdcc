// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! The backing sink of diagnostic lines.
//!
//! Every line is one JSON object:
//!
//! ```text
//! {"env":"staging","level":"info","message":"http request completed","method":"GET",...,"time":"2024-05-01T10:00:00Z","trace_id":"..."}
//! ```
//!
//! [`RedactingWriter`] masks `"<key>": "<value>"` pairs of sensitive keys on the
//! serialized line, independently of the structural redaction in [`crate::redact`].

use crate::event::{Level, Metadata};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;
use uuid::Uuid;

/// Replacement written by the line-level redaction.
pub const LINE_REDACTION_SENTINEL: &str = "[REDACTED]";

/// Keys masked on diagnostic lines when the caller configures none.
pub const DEFAULT_LOG_REDACT_KEYS: &[&str] = &[
    "password",
    "pass",
    "pwd",
    "token",
    "access_token",
    "refresh_token",
    "id_token",
    "authorization",
    "x-authorization",
    "x-auth-token",
    "secret",
    "client_secret",
    "private_key",
    "ssh_key",
    "api_key",
    "apikey",
    "x-api-key",
    "credit_card",
    "cc",
    "cvv",
    "pin",
];

/// A single diagnostic line before serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticRecord {
    pub level: Level,
    pub message: String,
    pub trace_id: Option<Uuid>,
    pub fields: Metadata,
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl DiagnosticRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            trace_id: None,
            fields: Metadata::new(),
            error: None,
            time: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Writes diagnostic records as JSON lines tagged with the environment.
///
/// Writes are serialized through a mutex so concurrent lines never interleave.
pub struct DiagnosticLogger {
    env: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl DiagnosticLogger {
    pub fn new(env: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            env: env.into(),
            out: Mutex::new(out),
        }
    }

    /// Logger over stdout with line-level redaction of `keys`
    /// (or [`DEFAULT_LOG_REDACT_KEYS`] when empty).
    pub fn stdout<K: AsRef<str>>(env: impl Into<String>, keys: &[K]) -> Result<Self, regex::Error> {
        let writer = RedactingWriter::new(io::stdout(), keys)?;
        Ok(Self::new(env, Box::new(writer)))
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn format(&self, record: &DiagnosticRecord) -> Value {
        let mut line = record.fields.clone();
        line.insert("level".to_string(), Value::from(record.level.as_str()));
        line.insert(
            "time".to_string(),
            Value::from(record.time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        line.insert("env".to_string(), Value::from(self.env.as_str()));
        if let Some(trace_id) = record.trace_id {
            line.insert("trace_id".to_string(), Value::from(trace_id.to_string()));
        }
        if let Some(err) = &record.error {
            line.insert("error".to_string(), Value::from(err.as_str()));
        }
        line.insert("message".to_string(), Value::from(record.message.as_str()));
        Value::Object(line)
    }

    pub fn write(&self, record: &DiagnosticRecord) {
        let mut bytes = match serde_json::to_vec(&self.format(record)) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize diagnostic line: {e}");
                return;
            }
        };
        bytes.push(b'\n');

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(&bytes).and_then(|()| out.flush()) {
            error!("Failed to write diagnostic line: {e}");
        }
    }
}

/// Masks the values of sensitive keys in everything written through it.
pub struct RedactingWriter<W> {
    inner: W,
    pattern: Option<Regex>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new<K: AsRef<str>>(inner: W, keys: &[K]) -> Result<Self, regex::Error> {
        let keys: Vec<String> = if keys.is_empty() {
            DEFAULT_LOG_REDACT_KEYS.iter().map(|k| regex::escape(k)).collect()
        } else {
            keys.iter()
                .map(|k| k.as_ref().trim())
                .filter(|k| !k.is_empty())
                .map(regex::escape)
                .collect()
        };
        let pattern = if keys.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r#"(?i)("(?:{})"\s*:\s*)"(?:[^"\\]|\\.)*""#,
                keys.join("|")
            ))?)
        };
        Ok(Self { inner, pattern })
    }

    pub fn redact_line<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match &self.pattern {
            Some(pattern) => {
                pattern.replace_all(line, format!(r#"${{1}}"{LINE_REDACTION_SENTINEL}""#))
            }
            None => Cow::Borrowed(line),
        }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let redacted = self.redact_line(&text);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// In-memory sink, for tests and for adapters that forward lines elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(String::from).collect()
    }

    /// Lines parsed back into JSON; unparseable lines are skipped.
    pub fn records(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_contains_env_time_and_trace() {
        let sink = MemorySink::new();
        let logger = DiagnosticLogger::new("staging", Box::new(sink.clone()));
        let trace_id = Uuid::new_v4();

        logger.write(
            &DiagnosticRecord::new(Level::Warn, "Something went wrong")
                .with_trace_id(trace_id)
                .with_field("attempts", 3),
        );

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let line = &records[0];
        assert_eq!(line["env"], json!("staging"));
        assert_eq!(line["level"], json!("warn"));
        assert_eq!(line["message"], json!("Something went wrong"));
        assert_eq!(line["attempts"], json!(3));
        assert_eq!(line["trace_id"], json!(trace_id.to_string()));
        assert!(line["time"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_reserved_keys_win_over_fields() {
        let sink = MemorySink::new();
        let logger = DiagnosticLogger::new("production", Box::new(sink.clone()));

        logger.write(&DiagnosticRecord::new(Level::Info, "real").with_field("message", "fake"));

        assert_eq!(sink.records()[0]["message"], json!("real"));
    }

    #[test]
    fn test_redacting_writer_masks_default_keys() {
        let sink = MemorySink::new();
        let mut writer = RedactingWriter::new(sink.clone(), &[] as &[&str]).unwrap();

        writer
            .write_all(br#"{"password":"hunter2","user":"bob","Authorization" : "Bearer \"x\""}"#)
            .unwrap();

        assert_eq!(
            sink.contents(),
            r#"{"password":"[REDACTED]","user":"bob","Authorization" : "[REDACTED]"}"#
        );
    }

    #[test]
    fn test_redacting_writer_uses_configured_keys_only() {
        let writer = RedactingWriter::new(io::sink(), &["session"]).unwrap();
        assert_eq!(
            writer.redact_line(r#"{"SESSION":"abc","password":"p"}"#),
            r#"{"SESSION":"[REDACTED]","password":"p"}"#
        );
    }

    #[test]
    fn test_redacting_writer_escapes_keys() {
        let writer = RedactingWriter::new(io::sink(), &["a.b"]).unwrap();
        assert_eq!(writer.redact_line(r#"{"axb":"v"}"#), r#"{"axb":"v"}"#);
        assert_eq!(
            writer.redact_line(r#"{"a.b":"v"}"#),
            r#"{"a.b":"[REDACTED]"}"#
        );
    }
}
