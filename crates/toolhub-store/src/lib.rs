//! Durable state for toolhub.
//!
//! Everything lives under one data root:
//! ```text
//! {root}/
//!   manifests/{tool_id}.json
//!   artifacts/backend/{category}/{tool_id}.wasm
//!   artifacts/frontend/{category}/{tool_id}.{ext}
//!   cache/                       precompiled backends
//! ```

pub mod artifact;
pub mod error;
pub mod registry;

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

pub use artifact::{ArtifactStore, sha256_hex};
pub use error::StoreError;
pub use registry::ManifestRegistry;

/// Suffix of in-flight writes. Files carrying it are never valid state and
/// are removed on the next boot.
pub const TMP_SUFFIX: &str = ".tmp";

/// The directories under a data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default data root: `~/.toolhub/`
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".toolhub")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }
}

/// Write a file so that readers see either the old content or the new
/// content, never a mix: write a sibling temp file, fsync, rename.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}
