// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client for the function platform's runtime API.
//!
//! The runtime long-polls `invocation/next`, hands each event to the
//! [`Session`], and posts the result envelope back. Invocations are
//! processed strictly one at a time.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::Session;

/// Runtime API version prefix.
pub const RUNTIME_API_VERSION: &str = "2018-06-01";

const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

/// Errors talking to the runtime API.
#[derive(Debug, Error)]
pub enum RuntimeApiError {
    /// `AWS_LAMBDA_RUNTIME_API` is not set.
    #[error("AWS_LAMBDA_RUNTIME_API is not set")]
    MissingEndpoint,

    /// The HTTP exchange failed.
    #[error("runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The next-invocation response carried no request id.
    #[error("invocation is missing the request id header")]
    MissingRequestId,

    /// The runtime API answered with an unexpected status.
    #[error("runtime API returned {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// One invocation fetched from the runtime API.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Platform request id
    pub request_id: String,
    /// Deadline in milliseconds since the epoch
    pub deadline_ms: Option<i64>,
    /// Raw event payload
    pub payload: Bytes,
}

impl Invocation {
    /// Time left before the platform aborts this invocation.
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = self.deadline_ms?;
        let left = deadline - Utc::now().timestamp_millis();
        Some(Duration::from_millis(left.max(0) as u64))
    }
}

/// Runtime API client.
#[derive(Debug, Clone)]
pub struct RuntimeApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl RuntimeApiClient {
    /// Create a client for the runtime API at `endpoint` (`host:port`).
    pub fn new(endpoint: &str) -> Result<Self, RuntimeApiError> {
        // No request timeout: `invocation/next` blocks until an event arrives.
        let client = reqwest::Client::builder().no_proxy().build()?;
        let endpoint = endpoint
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Ok(Self {
            client,
            base_url: format!("http://{endpoint}/{RUNTIME_API_VERSION}/runtime"),
        })
    }

    /// Create a client from `AWS_LAMBDA_RUNTIME_API`.
    pub fn from_env() -> Result<Self, RuntimeApiError> {
        let endpoint =
            std::env::var("AWS_LAMBDA_RUNTIME_API").map_err(|_| RuntimeApiError::MissingEndpoint)?;
        Self::new(&endpoint)
    }

    /// Wait for the next invocation.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeApiError> {
        let response = self
            .client
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?;
        let response = check_status(response).await?;

        let headers = response.headers();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeApiError::MissingRequestId)?;
        let deadline_ms = headers
            .get(DEADLINE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let payload = response.bytes().await?;

        debug!(request_id = %request_id, size = payload.len(), "Received invocation");
        Ok(Invocation {
            request_id,
            deadline_ms,
            payload,
        })
    }

    /// Post the result for `request_id`.
    pub async fn send_response<T: Serialize>(
        &self,
        request_id: &str,
        body: &T,
    ) -> Result<(), RuntimeApiError> {
        let response = self
            .client
            .post(format!("{}/invocation/{request_id}/response", self.base_url))
            .json(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Report that the invocation `request_id` failed.
    pub async fn send_invocation_error(
        &self,
        request_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeApiError> {
        let response = self
            .client
            .post(format!("{}/invocation/{request_id}/error", self.base_url))
            .header(ERROR_TYPE_HEADER, error_type)
            .json(&error_body(error_type, message))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Report a failure that prevented the runtime from starting.
    pub async fn send_init_error(
        &self,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeApiError> {
        let response = self
            .client
            .post(format!("{}/init/error", self.base_url))
            .header(ERROR_TYPE_HEADER, error_type)
            .json(&error_body(error_type, message))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

fn error_body(error_type: &str, message: &str) -> serde_json::Value {
    json!({
        "errorMessage": message,
        "errorType": error_type,
    })
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RuntimeApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(RuntimeApiError::Status { status, body })
}

/// Serve invocations until fetching the next one fails.
///
/// Failed invocations are reported through their result envelope and do not
/// stop the loop. A result the platform refuses (e.g., too large) is reported
/// as an invocation error instead; the session and its server stay up.
pub async fn run(client: &RuntimeApiClient, session: &mut Session) -> Result<(), RuntimeApiError> {
    info!("Waiting for invocations");
    loop {
        let invocation = client.next_invocation().await?;
        let response = session
            .handle_payload(&invocation.payload, invocation.remaining())
            .await;
        if let Err(err) = client
            .send_response(&invocation.request_id, &response)
            .await
        {
            warn!(
                request_id = %invocation.request_id,
                error = %err,
                "Platform rejected the invocation result"
            );
            if let Err(e) = client
                .send_invocation_error(
                    &invocation.request_id,
                    "Runtime.ResponseRejected",
                    &err.to_string(),
                )
                .await
            {
                warn!(
                    request_id = %invocation.request_id,
                    error = %e,
                    "Failed to report invocation error"
                );
            }
        }
    }
}
