// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{collector_config, start, LOGS_PATH, TEST_API_KEY};
use kulascope::redact::{HeaderSnapshot, REDACTION_SENTINEL};
use kulascope::RequestSummary;
use mockito::{Matcher, Server};
use serde_json::json;
use std::time::Instant;

#[tokio::test]
async fn request_event_reaches_collector() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", LOGS_PATH)
        .match_header("content-type", "application/json")
        .match_header("x-api-key", TEST_API_KEY)
        .match_body(Matcher::PartialJson(json!({
            "level": "info",
            "message": "http request completed",
            "method": "POST",
            "path": "/login",
            "status": 200,
            "ip": "192.0.2.10",
            "metadata": {
                "request_headers": {
                    "authorization": [REDACTION_SENTINEL],
                    "content-type": ["application/json"]
                },
                "request_body": {"email": "a@example.com", "password": REDACTION_SENTINEL}
            }
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let (kulascope, _sink) = start(collector_config(&server.url()));

    let log = kulascope.begin_request();
    log.info().str("email", "a@example.com").msg("User login attempt");

    let mut summary = RequestSummary::new("POST", "/login", 200, Instant::now());
    summary.client_ip = Some("192.0.2.10".to_string());
    summary.request_headers = Some(HeaderSnapshot::from([
        ("authorization".to_string(), vec!["Bearer abc".to_string()]),
        ("content-type".to_string(), vec!["application/json".to_string()]),
    ]));
    summary.request_body = Some(br#"{"email":"a@example.com","password":"hunter2"}"#.to_vec());

    kulascope
        .finish_request(&log, summary)
        .await
        .expect("failed to queue event");
    kulascope.shutdown().await;

    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_then_recorded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", LOGS_PATH)
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let mut config = collector_config(&server.url());
    config.pipeline.max_retries = 2;
    let (kulascope, sink) = start(config);

    let log = kulascope.begin_request();
    kulascope
        .finish_request(&log, RequestSummary::new("GET", "/health", 200, Instant::now()))
        .await
        .expect("failed to queue event");
    kulascope.shutdown().await;

    mock.assert_async().await;

    let failures: Vec<_> = sink
        .records()
        .into_iter()
        .filter(|r| r["message"] == json!("failed to send log after retries"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["level"], json!("error"));
    assert_eq!(failures[0]["trace_id"], json!(log.trace_id().to_string()));
    assert_eq!(failures[0]["attempts"], json!(3));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", LOGS_PATH)
        .with_status(400)
        .expect(1)
        .create_async()
        .await;

    let (kulascope, sink) = start(collector_config(&server.url()));

    let log = kulascope.begin_request();
    kulascope
        .finish_request(&log, RequestSummary::new("GET", "/", 200, Instant::now()))
        .await
        .expect("failed to queue event");
    kulascope.shutdown().await;

    mock.assert_async().await;
    assert!(sink
        .records()
        .iter()
        .all(|r| r["message"] != json!("failed to send log after retries")));
}
