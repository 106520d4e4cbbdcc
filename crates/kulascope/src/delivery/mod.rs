// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Shipping finished request events to the collector.
//!
//! Jobs are queued on a bounded channel and consumed by a fixed pool of
//! workers. Server errors and network failures are retried with exponential
//! backoff; client errors are terminal.

pub mod transport;
pub mod worker;

pub use transport::{DeliveryTarget, HttpTransport, Transport, TransportError, API_KEY_HEADER};
pub use worker::{
    classify, send_with_retry, AttemptOutcome, DeliveryError, DeliveryHandle, DeliveryJob,
    DeliveryPipeline, RetryPolicy,
};
