// Copyright 2025-Present Kulawise
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building or validating the SDK configuration.
///
/// All of them are fatal at startup and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing API key: set KULASCOPE_API_KEY in env")]
    MissingApiKey,

    #[error("invalid environment: {0} (must be 'staging' or 'production')")]
    InvalidEnvironment(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
