// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Artifact provisioning.
//!
//! Artifacts are fetched from the content store into the staging directory
//! exactly once per execution environment. A file already present at the
//! staging path is trusted as-is. Downloads land in a temp file in the
//! staging directory and are renamed into place only after permissions are
//! set; the final path either holds a complete artifact or nothing.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::ContentStore;

/// Permission bits for staged executables.
pub const EXECUTABLE_MODE: u32 = 0o755;
/// Permission bits for staged non-executable files.
pub const FILE_MODE: u32 = 0o644;

/// A file fetched from the content store into the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Object key, also the file name under the staging directory
    pub name: String,
    /// Source location as `<bucket>/<key>`
    pub source: String,
    /// Path of the staged file
    pub local_path: PathBuf,
    /// Permission bits applied to the staged file
    pub permissions: u32,
}

/// Fetches artifacts into the staging directory.
pub struct ArtifactProvisioner {
    store: Arc<dyn ContentStore>,
    bucket: String,
    staging_dir: PathBuf,
}

impl ArtifactProvisioner {
    /// Create a provisioner reading from `bucket` and writing under `staging_dir`.
    pub fn new(
        store: Arc<dyn ContentStore>,
        bucket: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            staging_dir: staging_dir.into(),
        }
    }

    /// The staging directory.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Path an artifact is (or will be) staged at.
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.staging_dir.join(name)
    }

    /// Make sure `name` is present in the staging directory.
    ///
    /// Returns immediately when the file already exists. Otherwise fetches it
    /// from the store, applies `permissions` and moves it into place. Nothing
    /// is retried here.
    pub async fn ensure(&self, name: &str, permissions: u32) -> Result<Artifact> {
        let artifact = Artifact {
            name: name.to_string(),
            source: format!("{}/{}", self.bucket, name),
            local_path: self.local_path(name),
            permissions,
        };

        if !is_safe_name(name) {
            return Err(provisioning_error(name, "artifact name must be a plain file name"));
        }
        if tokio::fs::try_exists(&artifact.local_path)
            .await
            .unwrap_or(false)
        {
            debug!(artifact = %name, path = %artifact.local_path.display(), "Artifact already staged");
            return Ok(artifact);
        }

        let start = Instant::now();
        if !tokio::fs::try_exists(&self.staging_dir).await.unwrap_or(false) {
            info!(dir = %self.staging_dir.display(), "Creating staging directory");
        }
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| provisioning_error(name, format!("create staging directory: {e}")))?;

        info!(artifact = %name, bucket = %self.bucket, "Fetching artifact");
        let data = self
            .store
            .get(&self.bucket, name)
            .await
            .map_err(|e| provisioning_error(name, e.to_string()))?;

        let staging_dir = self.staging_dir.clone();
        let target = artifact.local_path.clone();
        let size = data.len();
        tokio::task::spawn_blocking(move || stage_file(&staging_dir, &target, &data, permissions))
            .await
            .map_err(|e| provisioning_error(name, format!("staging task failed: {e}")))?
            .map_err(|e| provisioning_error(name, format!("write staged file: {e}")))?;

        info!(
            artifact = %name,
            path = %artifact.local_path.display(),
            size,
            mode = %format!("{permissions:o}"),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Artifact ready"
        );
        Ok(artifact)
    }
}

/// Write `data` to a temp file next to `target`, set its mode and rename it over `target`.
fn stage_file(staging_dir: &Path, target: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(staging_dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

fn provisioning_error(name: &str, reason: impl Into<String>) -> Error {
    Error::Provisioning {
        artifact: name.to_string(),
        reason: reason.into(),
    }
}
