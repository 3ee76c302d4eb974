// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! keyshim bootstrap - a secrets server inside a function runtime
//!
//! This crate runs a local secrets server (Vault by default) inside an
//! ephemeral function execution environment and proxies invocations to it.
//! On the first invocation in a fresh environment it stages the server
//! binary, renders its configuration, launches it and waits for it to
//! listen. Later invocations in the same environment reuse all of that.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       Function platform                              │
//! │             (runtime API: invocation/next, response)                 │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │ API Gateway proxy events
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   keyshim-bootstrap (This Crate)                     │
//! │  ┌────────────┐  ┌──────────┐  ┌────────────┐  ┌──────────────────┐  │
//! │  │ Artifact   │─►│ Config   │─►│  Process   │─►│ Readiness gate   │  │
//! │  │ provisioner│  │ renderer │  │ supervisor │  │ + translator     │  │
//! │  └────────────┘  └──────────┘  └────────────┘  └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!        │ GetObject                      │ spawn           │ HTTP (loopback)
//!        ▼                                ▼                 ▼
//! ┌──────────────┐               ┌──────────────────────────────────────┐
//! │  S3 bucket   │               │   Secrets server  127.0.0.1:8200     │
//! │ (vault, hcl) │               │   (staged under /tmp/bin)            │
//! └──────────────┘               └──────────────────────────────────────┘
//! ```
//!
//! # Server Process State Machine
//!
//! ```text
//!        spawn            health answered
//!   ──────────► STARTING ─────────────────► READY
//!                  │                          │
//!                  └────────────┬─────────────┘
//!                               │ exit observed on next invocation
//!                               ▼
//!                       EXITED / CRASHED ──► respawned by next start
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BUCKET_NAME` | Yes | - | Bucket holding the server executable |
//! | `KEY_ID` | No | - | Key identifier substituted into the template |
//! | `LAMBDA_TASK_ROOT` | No | binary's directory | Function code directory |
//! | `KEYSHIM_STAGING_DIR` | No | `/tmp/bin` | Writable staging directory |
//! | `KEYSHIM_EXECUTABLE` | No | `vault` | Executable object key |
//! | `KEYSHIM_TEMPLATE` | No | `vault.hcl` | Template file name / object key |
//! | `KEYSHIM_TEMPLATE_SOURCE` | No | `bundled` | `bundled` or `store` |
//! | `KEYSHIM_UPSTREAM_ADDR` | No | `127.0.0.1:8200` | Server listen address |
//! | `KEYSHIM_HEALTH_PATH` | No | `/v1/sys/seal-status` | Readiness probe path |
//! | `KEYSHIM_READINESS_POLL_MS` | No | `5000` | Probe interval |
//! | `KEYSHIM_READINESS_TIMEOUT_SECS` | No | `60` | Readiness bound |
//! | `KEYSHIM_REQUEST_TIMEOUT_SECS` | No | `30` | Upstream request bound |
//! | `KEYSHIM_STORE_ROOT` | No | - | Local directory store instead of S3 |
//! | `KEYSHIM_SERVER_ARGS` | No | `server` | Arguments before `-config=` |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`envelope`]: Invocation event and result envelopes
//! - [`error`]: Error types for every pipeline stage
//! - [`provision`]: Staging artifacts from the content store
//! - [`readiness`]: Health-endpoint polling
//! - [`render`]: Configuration template rendering
//! - [`runtime_api`]: Runtime API client and invocation loop
//! - [`session`]: Per-environment bootstrap pipeline
//! - [`store`]: Content store backends
//! - [`supervisor`]: Server process lifecycle
//! - [`translate`]: Envelope to HTTP translation

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Invocation event and result envelopes.
pub mod envelope;

/// Error types for bootstrap operations.
pub mod error;

/// Staging artifacts from the content store.
pub mod provision;

/// Health-endpoint polling.
pub mod readiness;

/// Configuration template rendering.
pub mod render;

/// Runtime API client and invocation loop.
pub mod runtime_api;

/// Per-environment bootstrap pipeline.
pub mod session;

/// Content store backends (S3, local directory).
pub mod store;

/// Server process lifecycle.
pub mod supervisor;

/// Envelope to HTTP translation.
pub mod translate;

pub use config::Config;
pub use error::Error;
pub use session::Session;
