// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Structural redaction of captured request and response data.
//!
//! Redaction walks a JSON value tree and replaces the value of every key that
//! matches a [`RuleSet`] with [`REDACTION_SENTINEL`]. Matched subtrees are
//! discarded, not redacted field by field.
//!
//! # Matching
//!
//! Keys and rules are compared lower-cased. A rule matches a key when either one
//! contains the other, so the rule `token` matches `access_token` and the rule
//! `x-api-key` matches the key `api`.
//!
//! # Embedded JSON
//!
//! String values whose trimmed form starts with `{` or `[` are parsed. When they
//! parse, the embedded document is redacted and serialized back into the string
//! slot; when they don't, the string is kept as is.
//!
//! # Failure mode
//!
//! Redaction never fails. Bodies that are not JSON pass through byte for byte.

use serde_json::Value;
use std::collections::BTreeMap;

/// Replacement for any matched sensitive value.
pub const REDACTION_SENTINEL: &str = "[CLIENT_REDACTED]";

/// Header names redacted in addition to caller supplied ones.
pub const DEFAULT_HEADER_RULES: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

/// Body keys redacted in addition to caller supplied ones.
pub const DEFAULT_BODY_RULES: &[&str] = &["password", "secret", "token"];

/// Captured headers: header name to the list of its values.
pub type HeaderSnapshot = BTreeMap<String, Vec<String>>;

/// A deduplicated set of lower-cased key fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<String>,
}

impl RuleSet {
    /// Merges built-in defaults with caller overrides.
    ///
    /// Entries are trimmed and lower-cased, empty entries are dropped and
    /// duplicates are removed keeping the first occurrence. Entries written as
    /// JSON paths (`$.user.password`) are reduced to their last segment.
    pub fn merge<D, O>(defaults: &[D], overrides: &[O]) -> Self
    where
        D: AsRef<str>,
        O: AsRef<str>,
    {
        let mut rules: Vec<String> = Vec::with_capacity(defaults.len() + overrides.len());
        let entries = defaults
            .iter()
            .map(AsRef::as_ref)
            .chain(overrides.iter().map(AsRef::as_ref));
        for entry in entries {
            let Some(rule) = normalize_rule(entry) else {
                continue;
            };
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        Self { rules }
    }

    pub fn from_rules<R: AsRef<str>>(rules: &[R]) -> Self {
        Self::merge::<&str, R>(&[], rules)
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Case-insensitive substring match in either direction.
    ///
    /// An empty key never matches; it would otherwise be a substring of every rule.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return false;
        }
        self.rules
            .iter()
            .any(|rule| key.contains(rule.as_str()) || rule.contains(key.as_str()))
    }
}

fn normalize_rule(entry: &str) -> Option<String> {
    let mut rule = entry.trim();
    if let Some(path) = rule.strip_prefix("$.") {
        rule = path.rsplit('.').next().unwrap_or(path).trim();
    }
    if rule.is_empty() {
        None
    } else {
        Some(rule.to_lowercase())
    }
}

/// Returns a redacted copy of `value`.
pub fn redact(value: &Value, rules: &RuleSet) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(key, val)| {
                    let val = if rules.matches(key) {
                        Value::String(REDACTION_SENTINEL.to_string())
                    } else {
                        redact(val, rules)
                    };
                    (key.clone(), val)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| redact(item, rules)).collect()),
        Value::String(s) => Value::String(redact_embedded(s, rules)),
        scalar => scalar.clone(),
    }
}

/// Redacts JSON carried inside a string, keeping the string untouched when it
/// isn't JSON or nothing in it matched.
fn redact_embedded(s: &str, rules: &RuleSet) -> String {
    let trimmed = s.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return s.to_string();
    }
    let Ok(parsed) = serde_json::from_str::<Value>(s) else {
        return s.to_string();
    };
    let redacted = redact(&parsed, rules);
    if redacted == parsed {
        return s.to_string();
    }
    serde_json::to_string(&redacted).unwrap_or_else(|_| s.to_string())
}

/// Redacts a raw body.
///
/// Bodies that don't parse as JSON, and bodies in which nothing matched, are
/// returned unchanged.
pub fn redact_body(body: &[u8], rules: &RuleSet) -> Vec<u8> {
    let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
        return body.to_vec();
    };
    let redacted = redact(&parsed, rules);
    if redacted == parsed {
        return body.to_vec();
    }
    serde_json::to_vec(&redacted).unwrap_or_else(|_| body.to_vec())
}

/// Redacts a raw body into a value suitable for event metadata.
///
/// Unparseable bodies are carried as (lossy UTF-8) strings, unredacted.
pub fn redact_body_value(body: &[u8], rules: &RuleSet) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(parsed) => redact(&parsed, rules),
        Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
    }
}

/// Replaces the whole value list of every matching header with the sentinel.
///
/// Header values are never inspected.
pub fn redact_headers(headers: &HeaderSnapshot, rules: &RuleSet) -> HeaderSnapshot {
    headers
        .iter()
        .map(|(name, values)| {
            let values = if rules.matches(name) {
                vec![REDACTION_SENTINEL.to_string()]
            } else {
                values.clone()
            };
            (name.clone(), values)
        })
        .collect()
}

/// Captures an HTTP header map, grouping repeated headers.
///
/// Values that aren't visible ASCII are captured lossily.
pub fn snapshot_headers(headers: &reqwest::header::HeaderMap) -> HeaderSnapshot {
    let mut snapshot = HeaderSnapshot::new();
    for (name, value) in headers {
        snapshot
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    snapshot
}
