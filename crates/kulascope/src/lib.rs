// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! # Kulascope
//!
//! Request-scoped log capture and delivery for HTTP services.
//!
//! The crate is organised around four pieces that never block the request path:
//! - [`redact`]: scrubs sensitive keys from JSON bodies and header maps
//! - [`request_log`]: per-request, ordered buffer of sub-events sharing one trace id
//! - [`diagnostics`]: batched, drop-oldest writer for local diagnostic lines
//! - [`delivery`]: bounded job queue and worker pool shipping events to the collector
//!
//! [`service::Kulascope`] wires them together for a web-framework adapter.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod delivery;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod redact;
pub mod request_log;
pub mod service;

pub use config::{Config, Environment, PipelineSettings};
pub use error::ConfigError;
pub use event::{Level, LogEvent, Metadata, SubLogEntry};
pub use request_log::{EventBuilder, RequestLog};
pub use service::{Kulascope, RequestSummary};
