// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content store backends.
//!
//! The executable (and optionally the configuration template) live in an
//! object store and are fetched by key. Only a read-only `get` is needed.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// Errors from content store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The caller is not allowed to read the object.
    #[error("access denied: {bucket}/{key}")]
    AccessDenied {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The store could not be reached or returned an unexpected failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to an object store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Backend identifier (e.g., "s3", "local").
    fn store_type(&self) -> &'static str;

    /// Fetch the full contents of `key` in `bucket`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;
}

/// S3-backed content store.
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Wrap an existing S3 client.
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential and region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(S3Client::new(&config))
    }
}

fn classify_get_error(bucket: &str, key: &str, err: SdkError<GetObjectError>) -> StoreError {
    if let SdkError::ServiceError(service) = &err {
        let inner = service.err();
        if inner.is_no_such_key() {
            return StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            };
        }
        match inner.code() {
            Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => {
                return StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
            Some("AccessDenied") | Some("Forbidden") => {
                return StoreError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Unavailable(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl ContentStore for S3Store {
    fn store_type(&self) -> &'static str {
        "s3"
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_get_error(bucket, key, e))?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to read S3 object body: {e}")))?;
        let bytes = body.into_bytes();
        debug!(bucket, key, size = bytes.len(), "Fetched object from S3");
        Ok(bytes)
    }
}

/// Content store backed by a local directory (`<root>/<bucket>/<key>`).
///
/// Used for local development and tests.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    fn store_type(&self) -> &'static str {
        "local"
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let Some(path) = self.object_path(bucket, key) else {
            return Err(StoreError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        };
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StoreError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => Err(StoreError::Unavailable(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }
}
