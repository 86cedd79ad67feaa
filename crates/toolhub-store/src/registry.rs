use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use toolhub_core::manifest::is_valid_tool_id;
use toolhub_core::{ToolManifest, ToolStatus};

use crate::error::StoreError;
use crate::{TMP_SUFFIX, write_atomic};

/// Durable table of tool manifests, the single source of truth for which
/// tools exist and which are active.
///
/// One pretty-printed JSON file per tool:
/// ```text
/// {base_dir}/
///   {tool_id}.json
/// ```
///
/// Files are replaced atomically (temp file + rename). The in-memory index
/// is loaded once by [`ManifestRegistry::open`]; every mutation writes the
/// file first and only then updates the index, while holding the write lock,
/// so the two never disagree.
pub struct ManifestRegistry {
    base_dir: PathBuf,
    manifests: RwLock<BTreeMap<String, ToolManifest>>,
}

impl ManifestRegistry {
    /// Open (or create) the registry directory and load every manifest.
    ///
    /// Unreadable files are logged and skipped rather than failing the boot;
    /// their artifacts are then treated as orphans.
    pub async fn open(base_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&base_dir).await?;

        let mut manifests = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                tokio::fs::remove_file(&path).await?;
                continue;
            }
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match load_manifest(&path).await {
                Ok(manifest) if is_valid_tool_id(&manifest.id) => {
                    manifests.insert(manifest.id.clone(), manifest);
                }
                Ok(manifest) => {
                    tracing::warn!(id = %manifest.id, path = %path.display(), "Skipping manifest with invalid id");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable manifest");
                }
            }
        }

        tracing::info!(count = manifests.len(), dir = %base_dir.display(), "Manifest registry opened");
        Ok(Self {
            base_dir,
            manifests: RwLock::new(manifests),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Persist a new manifest. Its id must not be taken.
    pub async fn create(&self, manifest: ToolManifest) -> Result<ToolManifest, StoreError> {
        if !is_valid_tool_id(&manifest.id) {
            return Err(StoreError::InvalidToolId(manifest.id));
        }
        let mut guard = self.manifests.write().await;
        if guard.contains_key(&manifest.id) {
            return Err(StoreError::AlreadyExists(manifest.id));
        }
        self.persist(&manifest).await?;
        guard.insert(manifest.id.clone(), manifest.clone());
        tracing::info!(tool_id = %manifest.id, name = %manifest.name, kind = %manifest.kind, "Manifest created");
        Ok(manifest)
    }

    pub async fn get(&self, id: &str) -> Option<ToolManifest> {
        self.manifests.read().await.get(id).cloned()
    }

    pub async fn require(&self, id: &str) -> Result<ToolManifest, StoreError> {
        self.get(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// All manifests, oldest first.
    pub async fn list(&self) -> Vec<ToolManifest> {
        let mut all: Vec<ToolManifest> = self.manifests.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Manifests whose status is `active`; what the mount manager replays at boot.
    pub async fn list_active(&self) -> Vec<ToolManifest> {
        self.list()
            .await
            .into_iter()
            .filter(ToolManifest::is_active)
            .collect()
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.manifests.read().await.keys().cloned().collect()
    }

    /// Apply a mutation, bump `updated_at`, persist and return the result.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<ToolManifest, StoreError>
    where
        F: FnOnce(&mut ToolManifest),
    {
        let mut guard = self.manifests.write().await;
        let current = guard
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut updated = current.clone();
        mutate(&mut updated);
        // The id is the key on disk and in the mount table; it never changes.
        updated.id = id.to_string();
        updated.touch();
        self.persist(&updated).await?;
        guard.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Set the status and the recorded error in one write.
    pub async fn set_status(
        &self,
        id: &str,
        status: ToolStatus,
        last_error: Option<String>,
    ) -> Result<ToolManifest, StoreError> {
        let updated = self
            .update(id, |m| {
                m.status = status;
                m.last_error = last_error;
            })
            .await?;
        tracing::info!(tool_id = %id, %status, error = ?updated.last_error, "Tool status changed");
        Ok(updated)
    }

    /// Remove a manifest. Returns whether it existed; deleting twice is fine.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if !is_valid_tool_id(id) {
            return Ok(false);
        }
        let mut guard = self.manifests.write().await;
        match tokio::fs::remove_file(self.manifest_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let existed = guard.remove(id).is_some();
        if existed {
            tracing::info!(tool_id = %id, "Manifest deleted");
        }
        Ok(existed)
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    async fn persist(&self, manifest: &ToolManifest) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.manifest_path(&manifest.id), &json).await
    }
}

async fn load_manifest(path: &Path) -> Result<ToolManifest, StoreError> {
    let content = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&content)?)
}
