// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Wire types shipped to the collector.
//!
//! Field names of [`LogEvent`] and [`SubLogEntry`] are the collector's contract.
//! Optional fields are omitted, never serialized as `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Structured fields attached to an event.
///
/// Values are the closed JSON variant, so redaction and serialization stay total.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Panic => "panic",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            "panic" => Ok(Level::Panic),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One log line emitted while a request was being handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLogEntry {
    pub level: Level,
    pub message: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The top-level event describing one completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub trace_id: Uuid,
    pub level: Level,
    pub message: String,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Request latency in milliseconds.
    #[serde(rename = "latency", default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub sub_logs: Vec<SubLogEntry>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(trace_id: Uuid, level: Level, message: impl Into<String>) -> Self {
        Self {
            trace_id,
            level,
            message: message.into(),
            metadata: Metadata::new(),
            status: None,
            method: None,
            path: None,
            latency_ms: None,
            client_ip: None,
            sub_logs: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_wire_names() {
        assert_eq!(serde_json::to_value(Level::Warn).unwrap(), json!("warn"));
        assert_eq!(serde_json::to_value(Level::Panic).unwrap(), json!("panic"));
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warn);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let event = LogEvent::new(Uuid::nil(), Level::Info, "http request completed");
        let value = serde_json::to_value(&event).unwrap();
        let object = value.as_object().unwrap();

        for key in ["status", "method", "path", "latency", "ip"] {
            assert!(!object.contains_key(key), "{key} should be omitted");
        }
        for key in ["trace_id", "level", "message", "metadata", "sub_logs", "timestamp"] {
            assert!(object.contains_key(key), "{key} should be present");
        }
    }

    #[test]
    fn test_wire_field_names() {
        let mut event = LogEvent::new(Uuid::new_v4(), Level::Info, "done");
        event.status = Some(201);
        event.method = Some("POST".to_string());
        event.path = Some("/login".to_string());
        event.latency_ms = Some(12);
        event.client_ip = Some("10.0.0.1".to_string());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], json!(201));
        assert_eq!(value["latency"], json!(12));
        assert_eq!(value["ip"], json!("10.0.0.1"));
        assert_eq!(value["trace_id"], json!(event.trace_id.to_string()));
    }

    #[test]
    fn test_sub_log_omits_empty_metadata_and_error() {
        let entry = SubLogEntry {
            level: Level::Debug,
            message: "checking credentials".to_string(),
            metadata: Metadata::new(),
            error: None,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("metadata").is_none());
        assert!(value.get("error").is_none());
    }
}
