// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Network transport used by the delivery workers.
//!
//! [`HttpTransport`] POSTs a serialized event to the collector with
//! `Content-Type: application/json` and the `x-api-key` credential. Each attempt
//! is bounded by the configured request timeout.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::error;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Where and with which credential a job is delivered.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub endpoint: String,
    pub api_key: String,
}

impl std::fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one serialized payload and returns the collector's status code.
    async fn send(&self, target: &DeliveryTarget, body: Vec<u8>)
        -> Result<StatusCode, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        let client = match build_client(request_timeout) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build HTTP client: {e}, using reqwest defaults");
                reqwest::Client::new()
            }
        };
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn build_client(request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
}

fn headers(api_key: &str) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut key = HeaderValue::from_str(api_key)
        .map_err(|e| TransportError::InvalidRequest(format!("api key is not a valid header: {e}")))?;
    key.set_sensitive(true);
    headers.insert(API_KEY_HEADER, key);
    Ok(headers)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        target: &DeliveryTarget,
        body: Vec<u8>,
    ) -> Result<StatusCode, TransportError> {
        let response = self
            .client
            .post(&target.endpoint)
            .headers(headers(&target.api_key)?)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(response.status())
    }
}
