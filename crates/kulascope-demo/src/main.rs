// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::time::{Duration, Instant};

use kulascope::redact::HeaderSnapshot;
use kulascope::{Config, Kulascope, RequestLog, RequestSummary};
use serde_json::json;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("KULASCOPE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };

    let kulascope = match Kulascope::start(config) {
        Ok(kulascope) => kulascope,
        Err(e) => {
            error!("Unable to start kulascope: {e}");
            return;
        }
    };
    info!("Kulascope started for {}", kulascope.environment());

    let started = Instant::now();
    let log = kulascope.begin_request();
    let status = log.clone().scope(handle_login()).await;

    let mut summary = RequestSummary::new("POST", "/login", status, started);
    summary.client_ip = Some("127.0.0.1".to_string());
    summary.request_headers = Some(HeaderSnapshot::from([
        (
            "authorization".to_string(),
            vec!["Bearer demo-token".to_string()],
        ),
        ("cookie".to_string(), vec!["session=abc123".to_string()]),
        ("user-agent".to_string(), vec!["kulascope-demo".to_string()]),
    ]));
    summary.request_body =
        Some(json!({"email": "user@example.com", "password": "hunter2"}).to_string().into_bytes());
    summary.response_body =
        Some(json!({"user_id": "12345", "token": "jwt.demo.token"}).to_string().into_bytes());

    if let Err(e) = kulascope.finish_request(&log, summary).await {
        error!("Unable to queue request log: {e}");
    }
    info!("Request {} logged", log.trace_id());

    kulascope.shutdown().await;
}

/// Stands in for a framework handler that logs through the request in scope.
async fn handle_login() -> u16 {
    let log = RequestLog::current();
    log.info().str("email", "user@example.com").msg("User login attempt");
    log.debug()
        .str("email", "user@example.com")
        .int("attempts", 1)
        .msg("Checking credentials");

    tokio::time::sleep(Duration::from_millis(20)).await;

    if let Err(e) = "not-a-number".parse::<u32>() {
        log.warn()
            .err(&e)
            .str("field", "remember_me_days")
            .msg("Ignoring malformed login option");
    }

    log.info()
        .str("user_id", "12345")
        .bool("admin", false)
        .msg("User authenticated successfully");
    200
}
