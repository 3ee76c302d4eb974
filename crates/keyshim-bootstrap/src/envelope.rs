// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation envelopes.
//!
//! The platform delivers requests as API Gateway proxy events and expects a
//! proxy result back. These types convert between that envelope and the
//! translator's [`InboundRequest`] / [`ProxyResult`].
//!
//! `isBase64Encoded` in the result is always `false`: the body is always
//! JSON text produced by the translator or an error document.

use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};

/// Request as forwarded by the translator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    /// HTTP method as received (e.g., "GET")
    pub method: String,
    /// Path including the leading stage segment
    pub path: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Query string parameters
    pub query: HashMap<String, String>,
    /// Raw body bytes
    pub body: Option<Bytes>,
}

/// Upstream response after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResult {
    /// Upstream HTTP status
    pub status_code: u16,
    /// Normalized JSON body; `None` when the upstream body was empty
    pub body: Option<Bytes>,
    /// Whether `body` holds JSON
    pub content_is_json: bool,
}

/// API Gateway proxy event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayRequest {
    /// HTTP method
    pub http_method: String,
    /// Request path, starting with the stage segment
    pub path: String,
    /// Request headers (may be null)
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Query string parameters (may be null)
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    /// Request body
    #[serde(default)]
    pub body: Option<String>,
    /// Whether `body` is base64-encoded
    #[serde(default)]
    pub is_base64_encoded: Option<bool>,
}

impl ApiGatewayRequest {
    /// Decode the event into a translator request.
    pub fn into_inbound(self) -> Result<InboundRequest> {
        let body = match self.body {
            None => None,
            Some(body) if self.is_base64_encoded.unwrap_or(false) => {
                let decoded = BASE64
                    .decode(body.as_bytes())
                    .map_err(|e| Error::InvalidRequest(format!("body is not valid base64: {e}")))?;
                Some(Bytes::from(decoded))
            }
            Some(body) => Some(Bytes::from(body)),
        };

        Ok(InboundRequest {
            method: self.http_method,
            path: self.path,
            headers: self.headers.unwrap_or_default(),
            query: self.query_string_parameters.unwrap_or_default(),
            body,
        })
    }
}

/// API Gateway proxy result.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayResponse {
    /// HTTP status returned to the caller
    pub status_code: u16,
    /// Response headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// JSON body; absent when there is no content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Always `false`
    pub is_base64_encoded: bool,
}

impl From<ProxyResult> for ApiGatewayResponse {
    fn from(result: ProxyResult) -> Self {
        let mut headers = BTreeMap::new();
        if result.content_is_json {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        Self {
            status_code: result.status_code,
            headers,
            body: result
                .body
                .map(|body| String::from_utf8_lossy(&body).into_owned()),
            is_base64_encoded: false,
        }
    }
}

impl From<&Error> for ApiGatewayResponse {
    fn from(err: &Error) -> Self {
        let body = json!({
            "errors": [err.to_string()],
            "stage": err.stage(),
        });
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code: err.status_code(),
            headers,
            body: Some(body.to_string()),
            is_base64_encoded: false,
        }
    }
}
