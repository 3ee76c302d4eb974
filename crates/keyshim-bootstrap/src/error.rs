// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for keyshim-bootstrap.
//!
//! Every stage of the bootstrap pipeline fails fast with one of the variants
//! below. The session turns them into non-2xx result envelopes, so each
//! variant knows the stage it belongs to and the HTTP status it maps to.

use std::time::Duration;

use thiserror::Error;

/// Bootstrap errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Fetching or staging an artifact failed.
    #[error("Provisioning failed for {artifact}: {reason}")]
    Provisioning {
        /// Artifact name (object key).
        artifact: String,
        /// What went wrong.
        reason: String,
    },

    /// Rendering the server configuration failed.
    #[error("Render error: {0}")]
    Render(#[from] crate::render::RenderError),

    /// The server executable could not be launched.
    #[error("Spawn failed for {executable}: {reason}")]
    Spawn {
        /// Path to the executable.
        executable: String,
        /// What went wrong.
        reason: String,
    },

    /// The server never answered its health endpoint.
    #[error("Server not ready after {attempts} probes in {elapsed:?}")]
    ReadinessTimeout {
        /// Number of probes sent.
        attempts: u32,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// The inbound method is not one the translator forwards.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The upstream server could not be reached after it was ready.
    #[error("Upstream connection error: {0}")]
    UpstreamConnection(String),

    /// The upstream server returned a non-empty body that is not JSON.
    #[error("Malformed upstream body (status {status}): {reason}")]
    MalformedUpstreamBody {
        /// Upstream HTTP status.
        status: u16,
        /// Parser error.
        reason: String,
    },

    /// The inbound path does not carry a stage segment and a sub-path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The inbound envelope could not be decoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Provisioning { .. } => "provision",
            Error::Render(_) => "render",
            Error::Spawn { .. } => "spawn",
            Error::ReadinessTimeout { .. } => "readiness",
            Error::UnsupportedMethod(_)
            | Error::InvalidPath(_)
            | Error::InvalidRequest(_) => "request",
            Error::UpstreamConnection(_) | Error::MalformedUpstreamBody { .. } => "upstream",
        }
    }

    /// HTTP status reported to the invoking platform.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidPath(_) | Error::InvalidRequest(_) => 400,
            Error::UnsupportedMethod(_) => 405,
            Error::UpstreamConnection(_) | Error::MalformedUpstreamBody { .. } => 502,
            Error::ReadinessTimeout { .. } => 503,
            Error::Config(_)
            | Error::Provisioning { .. }
            | Error::Render(_)
            | Error::Spawn { .. } => 500,
        }
    }
}

/// Result type using bootstrap Error.
pub type Result<T> = std::result::Result<T, Error>;
