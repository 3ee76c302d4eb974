// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request translation between the invocation envelope and the local server.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::{InboundRequest, ProxyResult};
use crate::error::{Error, Result};

/// Framing headers recomputed by the HTTP client from the forwarded body.
const FRAMING_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Remove the leading stage segment from an inbound path.
///
/// `/stage/v1/sys/status` becomes `/v1/sys/status`. Paths without a stage
/// segment followed by a non-empty sub-path are rejected.
pub fn strip_stage(path: &str) -> Result<&str> {
    let invalid = || Error::InvalidPath(path.to_string());
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    let (stage, sub_path) = rest.split_once('/').ok_or_else(invalid)?;
    if stage.is_empty() || sub_path.is_empty() {
        return Err(invalid());
    }
    Ok(&path[1 + stage.len()..])
}

/// Map an upstream status and body onto a [`ProxyResult`].
///
/// A non-empty body must be JSON; it is parsed and re-serialized. An empty
/// body yields a result without a body.
pub fn map_response(status: u16, body: &[u8]) -> Result<ProxyResult> {
    if body.is_empty() {
        return Ok(ProxyResult {
            status_code: status,
            body: None,
            content_is_json: false,
        });
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| Error::MalformedUpstreamBody {
            status,
            reason: e.to_string(),
        })?;
    let normalized = serde_json::to_vec(&value).map_err(|e| Error::MalformedUpstreamBody {
        status,
        reason: e.to_string(),
    })?;

    Ok(ProxyResult {
        status_code: status,
        body: Some(Bytes::from(normalized)),
        content_is_json: true,
    })
}

/// Forwards inbound requests to the local server.
#[derive(Debug, Clone)]
pub struct RequestTranslator {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl RequestTranslator {
    /// Create a translator targeting `base_url` (e.g., `http://127.0.0.1:8200`).
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// Upstream URL for an inbound path.
    pub fn upstream_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}{}", self.base_url, strip_stage(path)?))
    }

    /// Forward `inbound` to the local server and map the response.
    pub async fn translate(&self, inbound: &InboundRequest) -> Result<ProxyResult> {
        let url = self.upstream_url(&inbound.path)?;
        let method = match inbound.method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "PUT" => Method::PUT,
            "POST" => Method::POST,
            _ => return Err(Error::UnsupportedMethod(inbound.method.clone())),
        };

        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(forwarded_headers(inbound))
            .timeout(self.request_timeout);
        if !inbound.query.is_empty() {
            let mut pairs: Vec<(&String, &String)> = inbound.query.iter().collect();
            pairs.sort();
            request = request.query(&pairs);
        }
        if method != Method::GET {
            let body = inbound.body.clone().unwrap_or_default();
            request = request.body(body);
        }

        debug!(method = %method, url = %url, "Forwarding request");
        let response = request.send().await.map_err(|e| upstream_error(&url, e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| upstream_error(&url, e))?;
        debug!(status, size = body.len(), "Upstream responded");

        map_response(status, &body)
    }
}

fn forwarded_headers(inbound: &InboundRequest) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.headers.len());
    for (name, value) in &inbound.headers {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match parsed {
            Some((name, _)) if FRAMING_HEADERS.contains(&name.as_str()) => {}
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => warn!(header = %name, "Skipping header that is not valid HTTP"),
        }
    }
    headers
}

fn upstream_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::UpstreamConnection(format!("request to {url} timed out"))
    } else {
        Error::UpstreamConnection(format!("request to {url} failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_stage() {
        assert_eq!(strip_stage("/env42/v1/secret/foo").unwrap(), "/v1/secret/foo");
        assert_eq!(strip_stage("/stage/v1/sys/status").unwrap(), "/v1/sys/status");
        assert_eq!(strip_stage("/prod/v1/").unwrap(), "/v1/");
    }

    #[test]
    fn test_strip_stage_rejects_short_paths() {
        for path in ["/env42", "/env42/", "/", "", "env42/v1", "//v1"] {
            let err = strip_stage(path).unwrap_err();
            assert!(matches!(err, Error::InvalidPath(_)), "{path:?} should be rejected");
        }
    }

    #[test]
    fn test_map_empty_body() {
        let result = map_response(204, b"").unwrap();
        assert_eq!(result.status_code, 204);
        assert!(result.body.is_none());
        assert!(!result.content_is_json);
    }

    #[test]
    fn test_map_json_body() {
        let result = map_response(200, b"{ \"ok\" : true }").unwrap();

        let body = result.body.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, json!({"ok": true}));
        assert_eq!(&body[..], b"{\"ok\":true}");
    }

    #[test]
    fn test_map_preserves_key_order_and_numbers() {
        let raw = br#"{"z":1,"a":12345678901234567890123,"m":1.50,"n":null}"#;
        let result = map_response(200, raw).unwrap();

        assert_eq!(
            &result.body.unwrap()[..],
            br#"{"z":1,"a":12345678901234567890123,"m":1.50,"n":null}"#
        );
    }

    #[test]
    fn test_map_non_json_body() {
        let err = map_response(502, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, Error::MalformedUpstreamBody { status: 502, .. }));
    }

    #[test]
    fn test_forwarded_headers_drop_framing() {
        let mut inbound = InboundRequest::default();
        inbound
            .headers
            .insert("X-Vault-Token".to_string(), "s.abc".to_string());
        inbound
            .headers
            .insert("Content-Length".to_string(), "999".to_string());
        inbound
            .headers
            .insert("bad header".to_string(), "x".to_string());

        let headers = forwarded_headers(&inbound);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-vault-token").unwrap(), "s.abc");
    }
}
