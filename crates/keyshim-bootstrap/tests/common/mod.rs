// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for keyshim-bootstrap integration tests.
//!
//! Provides an in-memory content store, a fake secrets server and a
//! TestContext wiring them into a Session.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::body::Bytes as AxumBytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::{any, get};
use bytes::Bytes;
use serde_json::{Value, json};

use keyshim_bootstrap::config::{Config, TemplateSource};
use keyshim_bootstrap::envelope::ApiGatewayRequest;
use keyshim_bootstrap::session::Session;
use keyshim_bootstrap::store::{ContentStore, StoreError};

pub const BUCKET: &str = "secrets-bucket";

/// Executable that stays alive until signalled.
pub const SLEEPER_SCRIPT: &str = "#!/bin/sh\nexec sleep 30\n";

/// Executable that exits with a failure shortly after starting.
pub const SHORT_LIVED_SCRIPT: &str = "#!/bin/sh\nsleep 0.3\nexit 3\n";

/// Template used by most tests.
pub const TEMPLATE: &str = "storage \"s3\" {\n  bucket = \"BUCKET_NAME\"\n}\nseal \"awskms\" {\n  kms_key_id = \"KEY_ID\"\n}\n";

/// In-memory content store that counts fetches.
#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<(String, String), Bytes>,
    fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.into());
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

/// Reserve a loopback port nobody listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: AxumBytes) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "token": header("x-vault-token"),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Fake secrets server listening on `addr`.
pub async fn start_fake_server(addr: SocketAddr) -> tokio::task::JoinHandle<()> {
    let app = Router::new()
        .route(
            "/v1/sys/seal-status",
            get(|| async { Json(json!({"sealed": false, "initialized": true})) }),
        )
        .route("/v1/ok", get(|| async { Json(json!({"ok": true})) }))
        .route("/v1/empty", any(|| async { StatusCode::NO_CONTENT }))
        .route(
            "/v1/html",
            get(|| async { (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>") }),
        )
        .route(
            "/v1/sealed",
            get(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"errors": ["Vault is sealed"]})),
                )
            }),
        )
        .route(
            "/v1/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"late": true}))
            }),
        )
        .route("/v1/secret/{*path}", any(echo));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind fake server");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    })
}

/// Session wired to an in-memory store and a fake server.
pub struct TestContext {
    pub session: Session,
    pub store: Arc<MemoryStore>,
    pub config: Config,
    pub upstream: SocketAddr,
    server: Option<tokio::task::JoinHandle<()>>,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Context with a running fake server and a bundled template.
    pub async fn new() -> Self {
        Self::build(|config| config.with_key_id("alias/vault"), true).await
    }

    /// Context built from a customized configuration.
    ///
    /// `with_server` controls whether anything listens on the upstream address.
    pub async fn build(customize: impl FnOnce(Config) -> Config, with_server: bool) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let task_root = temp_dir.path().join("task");
        std::fs::create_dir_all(&task_root).expect("Failed to create task root");
        std::fs::write(task_root.join("vault.hcl"), TEMPLATE).expect("Failed to write template");

        let upstream = unused_addr();
        let config = Config::new(BUCKET)
            .with_task_root(&task_root)
            .with_staging_dir(temp_dir.path().join("bin"))
            .with_template("vault.hcl", TemplateSource::Bundled)
            .with_upstream_addr(upstream)
            .with_readiness(Duration::from_millis(50), Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(5));
        let config = customize(config);

        let store = Arc::new(
            MemoryStore::new()
                .with_object(BUCKET, "vault", SLEEPER_SCRIPT)
                .with_object(BUCKET, "remote.hcl", TEMPLATE),
        );

        let server = if with_server {
            Some(start_fake_server(upstream).await)
        } else {
            None
        };

        let session =
            Session::new(config.clone(), store.clone()).expect("Failed to create session");

        Self {
            session,
            store,
            config,
            upstream,
            server,
            _temp_dir: temp_dir,
        }
    }

    /// Place `script` at the staged executable path so it is not fetched.
    pub fn prestage_executable(&self, script: &str) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(&self.config.staging_dir).expect("Failed to create staging dir");
        let path = self.config.staging_dir.join(&self.config.executable_name);
        std::fs::write(&path, script).expect("Failed to write executable");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to set permissions");
    }

    pub fn task_root(&self) -> PathBuf {
        self.config.task_root.clone()
    }

    /// Stop the spawned server process and the fake upstream.
    pub async fn teardown(mut self) {
        self.session.shutdown().await;
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Build a proxy event.
pub fn event(method: &str, path: &str) -> ApiGatewayRequest {
    ApiGatewayRequest {
        http_method: method.to_string(),
        path: path.to_string(),
        ..Default::default()
    }
}

/// Parse a result body as JSON.
pub fn body_json(body: &Option<String>) -> Value {
    serde_json::from_str(body.as_deref().expect("response has no body"))
        .expect("response body is not JSON")
}
