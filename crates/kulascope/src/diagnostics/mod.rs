// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

//! Local diagnostic log stream.
//!
//! - [`sink`]: JSON line formatting, line-level secret masking, in-memory sink
//! - [`writer`]: bounded drop-oldest queue and the batching writer task

pub mod sink;
pub mod writer;

pub use sink::{DiagnosticLogger, DiagnosticRecord, MemorySink, RedactingWriter};
pub use writer::{DeferredWrite, DiagnosticHandle, DiagnosticWriter};
