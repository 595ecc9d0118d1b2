// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable persistence of patch descriptors.
//!
//! Each descriptor is written once, under a filename unique per request
//! (`patchplane_core::patch_filename`), as pretty-printed JSON. Patches are
//! immutable once persisted; retention is unbounded here, left to external
//! cleanup.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Context as _;
use chrono::Utc;
use patchplane_core::{patch_filename, PatchDescriptor};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Persists and loads [`PatchDescriptor`]s under a configured directory.
pub struct PatchStore {
    patches_dir: PathBuf,
}

impl PatchStore {
    /// Construct a store rooted at `patches_dir`. The directory is not
    /// created until the first [`PatchStore::save`] call.
    #[must_use]
    pub fn new(patches_dir: impl Into<PathBuf>) -> Self {
        Self {
            patches_dir: patches_dir.into(),
        }
    }

    /// Root directory patches are written under.
    #[must_use]
    pub fn patches_dir(&self) -> &Path {
        &self.patches_dir
    }

    /// Persist `descriptor`, creating the patches directory if missing.
    /// Returns the full path written.
    ///
    /// # Errors
    ///
    /// Propagates directory-creation, serialization, and write failures.
    /// Per the ingest pipeline's contract, a failure here is fatal to the
    /// originating request.
    pub async fn save(&self, descriptor: &PatchDescriptor) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.patches_dir)
            .await
            .with_context(|| format!("create patches dir {}", self.patches_dir.display()))?;

        let filename = patch_filename(&descriptor.id, Utc::now());
        let path = self.patches_dir.join(filename);

        let bytes = serde_json::to_vec_pretty(descriptor).context("serialize patch descriptor")?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("write patch file {}", path.display()))?;

        tracing::info!(path = %path.display(), patch_id = %descriptor.id, "patch persisted");
        Ok(path)
    }

    /// Load every `*.json` patch descriptor under the store's directory.
    /// Files that fail to parse are skipped and logged, not fatal to the
    /// scan.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be read (e.g.
    /// does not exist).
    pub async fn load_all(&self) -> anyhow::Result<Vec<PatchDescriptor>> {
        let mut entries = fs::read_dir(&self.patches_dir)
            .await
            .with_context(|| format!("read patches dir {}", self.patches_dir.display()))?;

        let mut descriptors = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("iterate patches dir")? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = ?err, "failed to read patch file");
                    continue;
                }
            };
            match serde_json::from_slice::<PatchDescriptor>(&bytes) {
                Ok(d) => descriptors.push(d),
                Err(err) => {
                    tracing::error!(path = %path.display(), error = ?err, "failed to parse patch file");
                }
            }
        }
        Ok(descriptors)
    }
}
