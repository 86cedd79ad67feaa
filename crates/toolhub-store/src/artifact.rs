use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use toolhub_core::manifest::{category_slug, is_valid_tool_id};
use toolhub_core::{ArtifactKind, ArtifactRef, ToolManifest};

use crate::error::StoreError;
use crate::{TMP_SUFFIX, write_atomic};

/// Disk-backed store for uploaded tool artifacts.
///
/// Layout under `base_dir`:
/// ```text
/// {base_dir}/
///   backend/{category}/{tool_id}.wasm
///   frontend/{category}/{tool_id}.{html|js|jsx|...}
/// ```
///
/// Paths are a pure function of `(kind, category, tool_id, extension)`, and
/// the filename stem is always the generated tool id, never the display name,
/// so two tools can never collide.
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the per-kind buckets.
    pub async fn init(&self) -> Result<(), StoreError> {
        for kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
            tokio::fs::create_dir_all(self.base_dir.join(kind.bucket())).await?;
        }
        Ok(())
    }

    /// Deterministic location of an artifact.
    pub fn path_for(
        &self,
        tool_id: &str,
        category: &str,
        kind: ArtifactKind,
        extension: &str,
    ) -> Result<PathBuf, StoreError> {
        if !is_valid_tool_id(tool_id) {
            return Err(StoreError::InvalidToolId(tool_id.to_string()));
        }
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::OutsideStore(format!(
                "refusing artifact extension `{extension}`"
            )));
        }
        Ok(self
            .base_dir
            .join(kind.bucket())
            .join(category_slug(category))
            .join(format!("{tool_id}.{ext}")))
    }

    /// Write an artifact and describe it for the manifest.
    ///
    /// The bytes land in a temporary file that is renamed into place, so a
    /// reader (the mount manager in particular) never sees a partial file.
    pub async fn store(
        &self,
        tool_id: &str,
        category: &str,
        kind: ArtifactKind,
        filename: &str,
        content: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        let extension = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = self.path_for(tool_id, category, kind, &extension)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, content).await?;

        tracing::info!(
            tool_id,
            %kind,
            path = %path.display(),
            bytes = content.len(),
            "Artifact stored"
        );

        Ok(ArtifactRef {
            path,
            filename: display_filename(filename),
            sha256: sha256_hex(content),
            size: content.len() as u64,
        })
    }

    /// Read an artifact back, byte for byte.
    pub async fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        self.ensure_inside(&artifact.path)?;
        Ok(tokio::fs::read(&artifact.path).await?)
    }

    /// Read one of a tool's artifacts via the path its manifest recorded.
    pub async fn read_for(
        &self,
        manifest: &ToolManifest,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, StoreError> {
        let missing = |detail: String| StoreError::MissingArtifact {
            tool_id: manifest.id.clone(),
            kind,
            detail,
        };
        let artifact = manifest
            .artifact(kind)
            .ok_or_else(|| missing("no artifact uploaded".into()))?;
        match self.read(artifact).await {
            Err(StoreError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(missing(format!("{} does not exist", artifact.path.display())))
            }
            other => other,
        }
    }

    /// Delete one artifact file. A file that is already gone counts as deleted.
    pub async fn remove_file(&self, artifact: &ArtifactRef) -> Result<(), StoreError> {
        self.ensure_inside(&artifact.path)?;
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => {
                tracing::debug!(path = %artifact.path.display(), "Artifact removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every artifact a manifest references. Idempotent.
    pub async fn remove(&self, manifest: &ToolManifest) -> Result<(), StoreError> {
        for kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
            if let Some(artifact) = manifest.artifact(kind) {
                self.remove_file(artifact).await?;
            }
        }
        tracing::info!(tool_id = %manifest.id, "Tool artifacts removed");
        Ok(())
    }

    /// Move a tool's artifacts to the paths a new category implies.
    ///
    /// Returns the updated references; the caller records them in the
    /// manifest. Old files are only removed once the new copy is in place.
    pub async fn relocate(
        &self,
        manifest: &ToolManifest,
        new_category: &str,
    ) -> Result<Vec<(ArtifactKind, ArtifactRef)>, StoreError> {
        let mut moved = Vec::new();
        for kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
            let Some(old) = manifest.artifact(kind) else {
                continue;
            };
            let ext = old.extension().unwrap_or_default();
            let new_path = self.path_for(&manifest.id, new_category, kind, &ext)?;
            if new_path == old.path {
                continue;
            }
            let content = self.read_for(manifest, kind).await?;
            let new_ref = self
                .store(&manifest.id, new_category, kind, &old.filename, &content)
                .await?;
            self.remove_file(old).await?;
            moved.push((kind, new_ref));
        }
        Ok(moved)
    }

    /// Delete artifact files whose tool id has no manifest, plus leftover
    /// temporary files from interrupted writes. Returns what was removed.
    pub async fn sweep_orphans(&self, known_ids: &HashSet<String>) -> Result<Vec<PathBuf>, StoreError> {
        let mut removed = Vec::new();
        for kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
            let bucket = self.base_dir.join(kind.bucket());
            if !bucket.exists() {
                continue;
            }
            let mut categories = tokio::fs::read_dir(&bucket).await?;
            while let Some(category) = categories.next_entry().await? {
                if !category.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = tokio::fs::read_dir(category.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    let path = entry.path();
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let stem = name.split('.').next().unwrap_or_default();
                    if name.ends_with(TMP_SUFFIX) || !known_ids.contains(stem) {
                        tokio::fs::remove_file(&path).await?;
                        tracing::warn!(path = %path.display(), "Removed orphaned artifact");
                        removed.push(path);
                    }
                }
            }
        }
        Ok(removed)
    }

    fn ensure_inside(&self, path: &Path) -> Result<(), StoreError> {
        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.base_dir) {
            return Err(StoreError::OutsideStore(path.display().to_string()));
        }
        Ok(())
    }
}

/// SHA-256 hex of some bytes.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Strip any directory part a client may have sent along with the filename.
fn display_filename(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toolhub_core::{ToolKind, ToolMetadata};

    async fn store() -> (TempDir, ArtifactStore) {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().join("artifacts"));
        store.init().await.unwrap();
        (tmp, store)
    }

    fn manifest(category: &str) -> ToolManifest {
        let mut meta = ToolMetadata::named("Echo");
        meta.category = category.into();
        ToolManifest::new(meta, ToolKind::Dual)
    }

    #[tokio::test]
    async fn store_then_read_is_byte_identical() {
        let (_tmp, store) = store().await;
        let m = manifest("Text Tools");
        let content = b"\0asm\x01\x00\x00\x00binary\xff".to_vec();

        let artifact = store
            .store(&m.id, &m.category, ArtifactKind::Backend, "echo.wasm", &content)
            .await
            .unwrap();

        assert_eq!(
            artifact.path,
            store
                .base_dir()
                .join("backend/text-tools")
                .join(format!("{}.wasm", m.id))
        );
        assert_eq!(artifact.size, content.len() as u64);
        assert_eq!(artifact.sha256, sha256_hex(&content));
        assert_eq!(store.read(&artifact).await.unwrap(), content);
    }

    #[tokio::test]
    async fn same_display_name_never_collides() {
        let (_tmp, store) = store().await;
        let a = manifest("math");
        let b = manifest("math");
        let ra = store
            .store(&a.id, "math", ArtifactKind::Frontend, "calc.html", b"<p>a</p>")
            .await
            .unwrap();
        let rb = store
            .store(&b.id, "math", ArtifactKind::Frontend, "calc.html", b"<p>b</p>")
            .await
            .unwrap();
        assert_ne!(ra.path, rb.path);
        assert_eq!(store.read(&ra).await.unwrap(), b"<p>a</p>");
        assert_eq!(store.read(&rb).await.unwrap(), b"<p>b</p>");
    }

    #[tokio::test]
    async fn rejects_bad_ids_and_extensions() {
        let (_tmp, store) = store().await;
        let err = store
            .store("../../etc", "x", ArtifactKind::Backend, "a.wasm", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidToolId(_)));

        let m = manifest("x");
        let err = store
            .store(&m.id, "x", ArtifactKind::Backend, "noext", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OutsideStore(_)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_tmp, store) = store().await;
        let mut m = manifest("x");
        let artifact = store
            .store(&m.id, "x", ArtifactKind::Backend, "a.wasm", b"x")
            .await
            .unwrap();
        m.set_artifact(ArtifactKind::Backend, artifact.clone());

        store.remove(&m).await.unwrap();
        assert!(!artifact.path.exists());
        store.remove(&m).await.unwrap();
    }

    #[tokio::test]
    async fn read_for_reports_missing_artifacts() {
        let (_tmp, store) = store().await;
        let mut m = manifest("x");
        let err = store.read_for(&m, ArtifactKind::Frontend).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingArtifact { .. }));

        let artifact = store
            .store(&m.id, "x", ArtifactKind::Frontend, "index.html", b"<p/>")
            .await
            .unwrap();
        m.set_artifact(ArtifactKind::Frontend, artifact.clone());
        tokio::fs::remove_file(&artifact.path).await.unwrap();
        let err = store.read_for(&m, ArtifactKind::Frontend).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn relocate_moves_files_to_new_category() {
        let (_tmp, store) = store().await;
        let mut m = manifest("old");
        let artifact = store
            .store(&m.id, "old", ArtifactKind::Frontend, "index.html", b"<p>hi</p>")
            .await
            .unwrap();
        m.set_artifact(ArtifactKind::Frontend, artifact.clone());

        let moved = store.relocate(&m, "New Home").await.unwrap();
        assert_eq!(moved.len(), 1);
        let (kind, new_ref) = &moved[0];
        assert_eq!(*kind, ArtifactKind::Frontend);
        assert!(new_ref.path.to_string_lossy().contains("new-home"));
        assert_eq!(new_ref.filename, "index.html");
        assert!(!artifact.path.exists());
        assert_eq!(store.read(new_ref).await.unwrap(), b"<p>hi</p>");
    }

    #[tokio::test]
    async fn sweep_removes_orphans_only() {
        let (_tmp, store) = store().await;
        let kept = manifest("x");
        let orphan = manifest("x");
        let kept_ref = store
            .store(&kept.id, "x", ArtifactKind::Backend, "a.wasm", b"x")
            .await
            .unwrap();
        let orphan_ref = store
            .store(&orphan.id, "x", ArtifactKind::Frontend, "a.html", b"<p/>")
            .await
            .unwrap();

        let known: HashSet<String> = [kept.id.clone()].into_iter().collect();
        let removed = store.sweep_orphans(&known).await.unwrap();

        assert_eq!(removed, vec![orphan_ref.path.clone()]);
        assert!(kept_ref.path.exists());
        assert!(!orphan_ref.path.exists());
    }

    #[test]
    fn strips_client_directories_from_filenames() {
        assert_eq!(display_filename("C:\\Users\\me\\tool.wasm"), "tool.wasm");
        assert_eq!(display_filename("../x/index.html"), "index.html");
    }
}
