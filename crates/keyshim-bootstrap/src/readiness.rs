// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness barrier for the local server.
//!
//! Polls the server's health endpoint at a fixed interval until it answers.
//! Any HTTP response counts, whatever its status: a sealed or standby server
//! answers with a non-2xx status but is listening. Transport errors mean
//! "not yet" and are retried until the timeout elapses.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::error::{Error, Result};

/// Outcome of a successful readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Probes sent, including the successful one
    pub attempts: u32,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Status returned by the health endpoint
    pub status: u16,
}

/// Polls a health endpoint until it responds.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    client: reqwest::Client,
}

impl ReadinessGate {
    /// Create a gate with its own loopback HTTP client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create a gate using an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Block until `health_url` answers or `timeout` elapses.
    ///
    /// Probes immediately, then every `poll_interval`. Each probe is bounded
    /// by the interval and by the deadline, so the call returns within
    /// `timeout` plus scheduling slack after at least
    /// `timeout / poll_interval` probes.
    pub async fn await_ready(
        &self,
        health_url: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ReadinessReport> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            // Each probe is bounded by its own slot.
            let probe_deadline = if poll_interval.is_zero() {
                deadline
            } else {
                std::cmp::min(Instant::now() + poll_interval, deadline)
            };
            let probe = self.client.get(health_url).send();
            match tokio::time::timeout_at(probe_deadline, probe).await {
                Ok(Ok(response)) => {
                    let report = ReadinessReport {
                        attempts,
                        elapsed: start.elapsed(),
                        status: response.status().as_u16(),
                    };
                    if attempts > 1 {
                        info!(
                            attempts,
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            status = report.status,
                            "Server is accepting connections"
                        );
                    } else {
                        debug!(status = report.status, "Server answered first probe");
                    }
                    return Ok(report);
                }
                Ok(Err(e)) => {
                    debug!(attempt = attempts, error = %e, "Server not ready yet");
                }
                Err(_) => {
                    debug!(attempt = attempts, "Readiness probe got no answer in time");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // Fixed schedule: probe n starts at start + n * poll_interval.
            let next = start + poll_interval * attempts;
            tokio::time::sleep_until(std::cmp::min(next, deadline)).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        let elapsed = start.elapsed();
        warn!(
            url = %health_url,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Server did not become ready"
        );
        Err(Error::ReadinessTimeout { attempts, elapsed })
    }
}
