// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use kulascope::diagnostics::MemorySink;
use kulascope::{Config, Environment, Kulascope};
use std::time::Duration;

pub const TEST_API_KEY: &str = "ks_integration";
pub const LOGS_PATH: &str = "/kulascope/logs";

/// Config pointed at a mock collector, with fast retries and flushes.
pub fn collector_config(server_url: &str) -> Config {
    let mut config = Config::new(Environment::Staging, TEST_API_KEY);
    config.endpoint_override = Some(format!("{server_url}{LOGS_PATH}"));
    config.worker_count = 2;
    config.pipeline.backoff_base = Duration::from_millis(10);
    config.pipeline.request_timeout = Duration::from_secs(2);
    config.pipeline.flush_interval = Duration::from_millis(10);
    config
}

/// Starts over the real HTTP transport, capturing diagnostic lines in memory.
pub fn start(config: Config) -> (Kulascope, MemorySink) {
    let sink = MemorySink::new();
    let transport = std::sync::Arc::new(kulascope::delivery::HttpTransport::new(
        config.pipeline.request_timeout,
    ));
    let kulascope = Kulascope::start_with(config, transport, Box::new(sink.clone()))
        .expect("failed to start kulascope");
    (kulascope, sink)
}
