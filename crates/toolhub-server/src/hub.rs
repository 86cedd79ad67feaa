use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use toolhub_core::manifest::{category_slug, is_valid_tool_id};
use toolhub_core::{
    ArtifactKind, ArtifactRef, BackendInspector, FrontendType, MetadataPatch, ToolKind,
    ToolManifest, ToolMetadata, ToolStatus, ValidationReport, Validator,
};
use toolhub_runtime::{
    BackendLoader, MountInfo, MountManager, MountReport, MountSettings, ToolGuard, ToolRequest,
};
use toolhub_store::{ArtifactStore, DataLayout, ManifestRegistry, StoreError};

use crate::bridge::{self, Bridge, BridgeError, ToolContext};
use crate::error::HubError;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Artifact files attached to an upload or re-upload.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFiles {
    pub backend: Option<UploadedFile>,
    pub frontend: Option<UploadedFile>,
}

impl ArtifactFiles {
    pub fn get(&self, kind: ArtifactKind) -> Option<&UploadedFile> {
        match kind {
            ArtifactKind::Backend => self.backend.as_ref(),
            ArtifactKind::Frontend => self.frontend.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_none() && self.frontend.is_none()
    }

    fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &UploadedFile)> {
        [ArtifactKind::Backend, ArtifactKind::Frontend]
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|file| (kind, file)))
    }
}

/// A new tool as submitted by the uploader.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub metadata: ToolMetadata,
    /// Inferred from the attached files when absent.
    pub kind: Option<ToolKind>,
    pub files: ArtifactFiles,
}

/// Everything the hub needs to open its state.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub data_dir: PathBuf,
    pub mount: MountSettings,
    pub recognized_exports: Vec<String>,
    pub runtime_scripts: Vec<String>,
}

/// A manifest together with its live mount, if any.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolView {
    #[serde(flatten)]
    pub manifest: ToolManifest,
    pub mount: Option<MountInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubCounts {
    pub tools: usize,
    pub active: usize,
    pub failed: usize,
    pub mounted: usize,
}

/// A stored artifact ready to be served as a download.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub artifact: ArtifactRef,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

/// The lifecycle service: the only writer of the registry and the artifact
/// store, and the only caller of mount/unmount outside boot.
///
/// Every operation on an existing tool runs under that tool's lifecycle lock.
pub struct ToolHub {
    registry: Arc<ManifestRegistry>,
    artifacts: Arc<ArtifactStore>,
    validator: Validator,
    mounts: MountManager,
    bridge: Bridge,
}

impl ToolHub {
    /// Open the data directory, drop orphaned artifacts and wire the mount
    /// manager to `loader`. Nothing is mounted yet; call [`ToolHub::mount_all`].
    pub async fn open<L>(options: HubOptions, loader: Arc<L>) -> Result<Self, HubError>
    where
        L: BackendLoader + 'static,
    {
        let layout = DataLayout::new(options.data_dir);
        let registry = Arc::new(ManifestRegistry::open(layout.manifests_dir()).await?);
        let artifacts = Arc::new(ArtifactStore::new(layout.artifacts_dir()));
        artifacts.init().await?;

        let orphans = artifacts.sweep_orphans(&registry.ids().await).await?;
        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "Removed orphaned artifacts");
        }

        let inspector: Arc<dyn BackendInspector> = loader.clone();
        let validator =
            Validator::new(inspector).with_recognized_exports(options.recognized_exports);
        let bridge = Bridge::new(
            options.runtime_scripts,
            validator.recognized_exports().to_vec(),
        );
        let mounts = MountManager::new(
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            loader,
            options.mount,
        );

        tracing::info!(root = %layout.root().display(), "Tool hub opened");
        Ok(Self {
            registry,
            artifacts,
            validator,
            mounts,
            bridge,
        })
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Rebuild the mount table from every active manifest.
    pub async fn mount_all(&self) -> MountReport {
        self.mounts.mount_all().await
    }

    pub async fn mounted(&self) -> Vec<MountInfo> {
        self.mounts.mounted().await
    }

    pub async fn counts(&self) -> HubCounts {
        let all = self.registry.list().await;
        HubCounts {
            tools: all.len(),
            active: all.iter().filter(|m| m.status == ToolStatus::Active).count(),
            failed: all.iter().filter(|m| m.status == ToolStatus::Failed).count(),
            mounted: self.mounts.mounted().await.len(),
        }
    }

    /// Register a new tool.
    ///
    /// The manifest and its artifacts are persisted even when validation
    /// fails: the tool is then saved as `failed` and the error carries the
    /// stored manifest. Valid tools are activated, which mounts their backend.
    pub async fn upload(&self, request: UploadRequest) -> Result<ToolManifest, HubError> {
        let kind = upload_kind(request.kind, &request.files)?;
        if request.metadata.name.trim().is_empty() {
            return Err(HubError::BadRequest("tool name must not be empty".into()));
        }

        let mut manifest = ToolManifest::new(request.metadata, kind);
        let guard = self.mounts.lock(&manifest.id).await;
        tracing::info!(tool_id = %manifest.id, name = %manifest.name, %kind, "Tool upload received");

        let mut reports = Vec::new();
        let mut rejection = None;
        for (artifact_kind, file) in request.files.iter() {
            match self
                .validator
                .validate(artifact_kind, &file.content, &file.filename)
                .await
            {
                Ok(report) => reports.push(report),
                Err(e) => {
                    rejection.get_or_insert(e);
                }
            }
        }

        let mut stored: Vec<ArtifactRef> = Vec::new();
        for (artifact_kind, file) in request.files.iter() {
            let result = self
                .artifacts
                .store(
                    &manifest.id,
                    &manifest.category,
                    artifact_kind,
                    &file.filename,
                    &file.content,
                )
                .await;
            match result {
                Ok(artifact) => {
                    stored.push(artifact.clone());
                    manifest.set_artifact(artifact_kind, artifact);
                }
                Err(e) => {
                    self.discard(&stored).await;
                    return Err(e.into());
                }
            }
        }

        apply_reports(&mut manifest, &reports);
        if let Some(error) = &rejection {
            manifest.status = ToolStatus::Failed;
            manifest.last_error = Some(error.to_string());
        }
        let manifest = match self.registry.create(manifest).await {
            Ok(m) => m,
            Err(e) => {
                self.discard(&stored).await;
                return Err(e.into());
            }
        };

        if let Some(error) = rejection {
            tracing::info!(tool_id = %manifest.id, reason = %error, "Tool stored as failed");
            return Err(HubError::Validation {
                error,
                manifest: Some(Box::new(manifest)),
            });
        }

        self.activate(&guard, manifest).await
    }

    pub async fn list(&self, status: Option<ToolStatus>) -> Vec<ToolManifest> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|m| status.is_none_or(|s| m.status == s))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<ToolView, HubError> {
        let manifest = self.require(id).await?;
        let mount = self.mounts.mount_info(id).await;
        Ok(ToolView { manifest, mount })
    }

    /// Edit metadata. A category change moves the artifacts to match.
    pub async fn edit(&self, id: &str, patch: MetadataPatch) -> Result<ToolManifest, HubError> {
        if patch.is_empty() {
            return Err(HubError::BadRequest("no metadata fields to update".into()));
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(HubError::BadRequest("tool name must not be empty".into()));
        }

        let _guard = self.lock_existing(id).await?;
        let manifest = self.require(id).await?;

        let moved = match &patch.category {
            Some(category) if category_slug(category) != category_slug(&manifest.category) => {
                self.artifacts.relocate(&manifest, category).await?
            }
            _ => Vec::new(),
        };

        let updated = self
            .registry
            .update(id, |m| {
                m.apply(&patch);
                for (kind, artifact) in moved {
                    m.set_artifact(kind, artifact);
                }
            })
            .await?;
        tracing::info!(tool_id = %id, "Tool metadata updated");
        Ok(updated)
    }

    /// Replace one or both artifacts of an existing tool.
    ///
    /// New files are validated before anything changes; a rejected file
    /// leaves the tool exactly as it was. Tools that are not disabled are
    /// re-activated with the new artifacts.
    pub async fn replace_artifacts(
        &self,
        id: &str,
        files: ArtifactFiles,
    ) -> Result<ToolManifest, HubError> {
        if files.is_empty() {
            return Err(HubError::BadRequest(
                "re-upload contains no `backend` or `frontend` file".into(),
            ));
        }

        let guard = self.lock_existing(id).await?;
        let manifest = self.require(id).await?;
        for (artifact_kind, _) in files.iter() {
            if !manifest.kind.requires(artifact_kind) {
                return Err(HubError::BadRequest(format!(
                    "a {} tool does not take a {artifact_kind} artifact",
                    manifest.kind
                )));
            }
        }

        let mut reports = Vec::new();
        for (artifact_kind, file) in files.iter() {
            let report = self
                .validator
                .validate(artifact_kind, &file.content, &file.filename)
                .await
                .map_err(|error| HubError::Validation {
                    error,
                    manifest: Some(Box::new(manifest.clone())),
                })?;
            reports.push(report);
        }
        for artifact_kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
            if manifest.kind.requires(artifact_kind) && files.get(artifact_kind).is_none() {
                reports.push(self.validate_stored(&manifest, artifact_kind).await?);
            }
        }

        let mut replaced = Vec::new();
        for (artifact_kind, file) in files.iter() {
            let artifact = self
                .artifacts
                .store(id, &manifest.category, artifact_kind, &file.filename, &file.content)
                .await?;
            if let Some(old) = manifest.artifact(artifact_kind)
                && old.path != artifact.path
            {
                self.artifacts.remove_file(old).await?;
            }
            replaced.push((artifact_kind, artifact));
        }

        let updated = self
            .registry
            .update(id, |m| {
                for (kind, artifact) in replaced {
                    m.set_artifact(kind, artifact);
                }
                apply_reports(m, &reports);
            })
            .await?;
        tracing::info!(tool_id = %id, "Tool artifacts replaced");

        if updated.status == ToolStatus::Disabled {
            return Ok(updated);
        }
        self.activate(&guard, updated).await
    }

    /// Flip between active and not active. Enabling a `failed` tool
    /// re-validates its stored artifacts first.
    pub async fn toggle(&self, id: &str) -> Result<ToolManifest, HubError> {
        let guard = self.lock_existing(id).await?;
        let manifest = self.require(id).await?;
        match manifest.status {
            ToolStatus::Active => {
                self.mounts.unmount(&guard).await;
                let disabled = self
                    .registry
                    .set_status(id, ToolStatus::Disabled, None)
                    .await?;
                tracing::info!(tool_id = %id, "Tool disabled");
                Ok(disabled)
            }
            ToolStatus::Disabled => self.activate(&guard, manifest).await,
            ToolStatus::Failed => {
                let revalidated = self.revalidate(manifest).await?;
                self.activate(&guard, revalidated).await
            }
        }
    }

    /// Re-mount an active tool, or retry a failed one.
    pub async fn reload(&self, id: &str) -> Result<ToolManifest, HubError> {
        let guard = self.lock_existing(id).await?;
        let manifest = self.require(id).await?;
        match manifest.status {
            ToolStatus::Disabled => Err(HubError::Conflict(format!(
                "tool {id} is disabled; enable it before reloading"
            ))),
            ToolStatus::Failed => {
                let revalidated = self.revalidate(manifest).await?;
                self.activate(&guard, revalidated).await
            }
            ToolStatus::Active => {
                if manifest.needs_mount() {
                    self.mount(&guard).await?;
                }
                Ok(self.require(id).await?)
            }
        }
    }

    /// Remove a tool: unmount, forget the manifest, delete its files.
    /// Returns whether it existed; deleting twice is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool, HubError> {
        if !is_valid_tool_id(id) {
            return Ok(false);
        }
        let guard = self.mounts.lock(id).await;
        self.mounts.unmount(&guard).await;

        let manifest = self.registry.get(id).await;
        self.registry.delete(id).await?;
        if let Some(manifest) = &manifest {
            // A file left behind here is removed as an orphan at next boot.
            if let Err(e) = self.artifacts.remove(manifest).await {
                tracing::warn!(tool_id = %id, error = %e, "Failed to remove tool artifacts");
            }
            tracing::info!(tool_id = %id, name = %manifest.name, "Tool deleted");
        }
        self.mounts.forget(guard).await;
        Ok(manifest.is_some())
    }

    /// The raw bytes of one artifact, as uploaded.
    pub async fn artifact_file(&self, id: &str, kind: ArtifactKind) -> Result<ArtifactFile, HubError> {
        let manifest = self.require(id).await?;
        let artifact = manifest.artifact(kind).cloned().ok_or_else(|| {
            HubError::Bridge(BridgeError::Missing(format!("tool {id} has no {kind} artifact")))
        })?;
        let content = self
            .artifacts
            .read_for(&manifest, kind)
            .await
            .map_err(|e| match e {
                StoreError::MissingArtifact { .. } => {
                    HubError::Bridge(BridgeError::Missing(e.to_string()))
                }
                other => other.into(),
            })?;
        let content_type = match kind {
            ArtifactKind::Backend => "application/wasm",
            ArtifactKind::Frontend => FrontendType::from_filename(&artifact.filename)
                .map(FrontendType::content_type)
                .unwrap_or("application/octet-stream"),
        };
        Ok(ArtifactFile {
            artifact,
            content_type,
            content,
        })
    }

    /// The frontend document, with the tool context injected.
    pub async fn frontend_document(&self, id: &str) -> Result<String, HubError> {
        let manifest = self.require_runnable(id).await?;
        let resolved = bridge::resolve_frontend(&self.artifacts, &manifest).await?;
        let ctx = ToolContext::for_manifest(&manifest);
        Ok(self.bridge.render_document(&manifest, &resolved, &ctx)?)
    }

    /// The execution page that frames the frontend document.
    pub async fn host_page(&self, id: &str) -> Result<String, HubError> {
        let manifest = self.require_runnable(id).await?;
        if manifest.artifact(ArtifactKind::Frontend).is_none() {
            return Err(BridgeError::Missing(format!("tool {id} has no frontend")).into());
        }
        Ok(self.bridge.host_page(&manifest))
    }

    /// Route a request under `/tools/{id}` into the mounted backend.
    pub async fn dispatch(&self, id: &str, request: ToolRequest) -> Result<String, HubError> {
        Ok(self.mounts.dispatch(id, request).await?)
    }

    async fn require(&self, id: &str) -> Result<ToolManifest, HubError> {
        if !is_valid_tool_id(id) {
            return Err(HubError::NotFound(id.to_string()));
        }
        Ok(self.registry.require(id).await?)
    }

    async fn require_runnable(&self, id: &str) -> Result<ToolManifest, HubError> {
        let manifest = self.require(id).await?;
        if !manifest.is_active() {
            return Err(HubError::Conflict(format!(
                "tool {id} is {}; only active tools can run",
                manifest.status
            )));
        }
        Ok(manifest)
    }

    async fn lock_existing(&self, id: &str) -> Result<ToolGuard, HubError> {
        if !is_valid_tool_id(id) {
            return Err(HubError::NotFound(id.to_string()));
        }
        Ok(self.mounts.lock(id).await)
    }

    /// Make a valid tool active, mounting its backend when it has one.
    async fn activate(&self, guard: &ToolGuard, manifest: ToolManifest) -> Result<ToolManifest, HubError> {
        let missing = manifest.missing_artifacts();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(HubError::Conflict(format!(
                "cannot activate {} tool {}: missing {} artifact",
                manifest.kind,
                manifest.id,
                names.join(" and ")
            )));
        }

        if manifest.needs_mount() {
            self.mount(guard).await?;
        }
        match self
            .registry
            .set_status(&manifest.id, ToolStatus::Active, None)
            .await
        {
            Ok(active) => {
                tracing::info!(tool_id = %active.id, kind = %active.kind, "Tool activated");
                Ok(active)
            }
            Err(e) => {
                self.mounts.unmount(guard).await;
                Err(e.into())
            }
        }
    }

    async fn mount(&self, guard: &ToolGuard) -> Result<(), HubError> {
        match self.mounts.mount(guard).await {
            Ok(_) => Ok(()),
            Err(error) => {
                let manifest = self.registry.get(guard.tool_id()).await.map(Box::new);
                Err(HubError::Mount { error, manifest })
            }
        }
    }

    /// Validate every stored artifact again and refresh the manifest's
    /// routes, dependencies and warnings. A rejection marks the tool failed.
    async fn revalidate(&self, manifest: ToolManifest) -> Result<ToolManifest, HubError> {
        let mut reports = Vec::new();
        for kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
            if !manifest.kind.requires(kind) {
                continue;
            }
            match self.validate_stored(&manifest, kind).await {
                Ok(report) => reports.push(report),
                Err(HubError::Validation { error, .. }) => {
                    let failed = self
                        .registry
                        .set_status(&manifest.id, ToolStatus::Failed, Some(error.to_string()))
                        .await?;
                    return Err(HubError::Validation {
                        error,
                        manifest: Some(Box::new(failed)),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self
            .registry
            .update(&manifest.id, |m| apply_reports(m, &reports))
            .await?)
    }

    async fn validate_stored(
        &self,
        manifest: &ToolManifest,
        kind: ArtifactKind,
    ) -> Result<ValidationReport, HubError> {
        let filename = manifest
            .artifact(kind)
            .map(|a| a.filename.clone())
            .ok_or_else(|| HubError::Conflict(format!("tool {} has no {kind} artifact", manifest.id)))?;
        let content = self
            .artifacts
            .read_for(manifest, kind)
            .await
            .map_err(|e| match e {
                StoreError::MissingArtifact { .. } => HubError::Conflict(e.to_string()),
                other => other.into(),
            })?;
        self.validator
            .validate(kind, &content, &filename)
            .await
            .map_err(|error| HubError::Validation {
                error,
                manifest: None,
            })
    }

    async fn discard(&self, stored: &[ArtifactRef]) {
        for artifact in stored {
            if let Err(e) = self.artifacts.remove_file(artifact).await {
                tracing::warn!(path = %artifact.path.display(), error = %e, "Failed to discard artifact");
            }
        }
    }
}

/// Resolve the kind of a new tool and check it against the attached files.
fn upload_kind(declared: Option<ToolKind>, files: &ArtifactFiles) -> Result<ToolKind, HubError> {
    let kind = match declared {
        Some(kind) => kind,
        None => match (&files.backend, &files.frontend) {
            (Some(_), Some(_)) => ToolKind::Dual,
            (Some(_), None) => ToolKind::Backend,
            (None, Some(_)) => ToolKind::Frontend,
            (None, None) => {
                return Err(HubError::BadRequest(
                    "upload contains no `backend` or `frontend` file".into(),
                ));
            }
        },
    };
    for artifact_kind in [ArtifactKind::Backend, ArtifactKind::Frontend] {
        let present = files.get(artifact_kind).is_some();
        if kind.requires(artifact_kind) && !present {
            return Err(HubError::Conflict(format!(
                "a {kind} tool requires a {artifact_kind} artifact"
            )));
        }
        if !kind.requires(artifact_kind) && present {
            return Err(HubError::BadRequest(format!(
                "a {kind} tool does not take a {artifact_kind} artifact"
            )));
        }
    }
    Ok(kind)
}

fn apply_reports(manifest: &mut ToolManifest, reports: &[ValidationReport]) {
    let mut dependencies: Vec<String> = Vec::new();
    let mut warnings = Vec::new();
    for report in reports {
        if report.kind == ArtifactKind::Backend {
            manifest.routes = report.routes.clone();
        }
        for dep in &report.dependencies {
            if !dependencies.contains(dep) {
                dependencies.push(dep.clone());
            }
        }
        warnings.extend(report.warnings.iter().cloned());
    }
    manifest.dependencies = dependencies;
    manifest.warnings = warnings;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toolhub_runtime::{DispatchError, StubArtifact, StubLoader};

    const PAGE: &str = "<html><body><script>fetch(toolhub.baseUrl + '/echo')</script></body></html>";

    async fn hub() -> (TempDir, ToolHub) {
        let tmp = TempDir::new().unwrap();
        let options = HubOptions {
            data_dir: tmp.path().to_path_buf(),
            mount: MountSettings::default(),
            recognized_exports: Vec::new(),
            runtime_scripts: Vec::new(),
        };
        let hub = ToolHub::open(options, Arc::new(StubLoader::new())).await.unwrap();
        (tmp, hub)
    }

    fn dual(name: &str) -> UploadRequest {
        UploadRequest {
            metadata: ToolMetadata::named(name),
            kind: None,
            files: ArtifactFiles {
                backend: Some(UploadedFile::new(
                    "echo.wasm",
                    StubArtifact::echo(&["POST /echo"]).to_bytes(),
                )),
                frontend: Some(UploadedFile::new("index.html", PAGE)),
            },
        }
    }

    #[test]
    fn kind_is_inferred_and_checked() {
        let both = ArtifactFiles {
            backend: Some(UploadedFile::new("a.wasm", "x")),
            frontend: Some(UploadedFile::new("a.html", "x")),
        };
        assert_eq!(upload_kind(None, &both).unwrap(), ToolKind::Dual);
        assert!(matches!(
            upload_kind(Some(ToolKind::Backend), &both),
            Err(HubError::BadRequest(_))
        ));

        let backend_only = ArtifactFiles {
            backend: Some(UploadedFile::new("a.wasm", "x")),
            frontend: None,
        };
        assert!(matches!(
            upload_kind(Some(ToolKind::Dual), &backend_only),
            Err(HubError::Conflict(_))
        ));
        assert!(matches!(
            upload_kind(None, &ArtifactFiles::default()),
            Err(HubError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn upload_activates_and_mounts() {
        let (_tmp, hub) = hub().await;
        let manifest = hub.upload(dual("Echo")).await.unwrap();
        assert_eq!(manifest.status, ToolStatus::Active);
        assert_eq!(manifest.kind, ToolKind::Dual);
        assert_eq!(manifest.routes.len(), 1);

        let view = hub.get(&manifest.id).await.unwrap();
        assert!(view.mount.is_some());
        let out = hub
            .dispatch(&manifest.id, ToolRequest::new("POST", "/echo", "{\"a\":1}"))
            .await
            .unwrap();
        assert!(out.contains("\"a\":1"));
    }

    #[tokio::test]
    async fn invalid_upload_is_stored_as_failed() {
        let (_tmp, hub) = hub().await;
        let mut request = dual("Broken");
        request.files.backend = Some(UploadedFile::new("b.wasm", br#"{"routes":["GET /"]}"#.to_vec()));

        let err = hub.upload(request).await.unwrap_err();
        let HubError::Validation { error, manifest } = err else {
            panic!("expected a validation error");
        };
        assert!(error.to_string().starts_with("no application object found"));
        let manifest = manifest.unwrap();
        assert_eq!(manifest.status, ToolStatus::Failed);
        assert!(manifest.backend_artifact.is_some());
        assert_eq!(hub.list(Some(ToolStatus::Failed)).await.len(), 1);
        assert!(hub.mounted().await.is_empty());
    }

    #[tokio::test]
    async fn toggle_round_trip() {
        let (_tmp, hub) = hub().await;
        let m = hub.upload(dual("Echo")).await.unwrap();

        let off = hub.toggle(&m.id).await.unwrap();
        assert_eq!(off.status, ToolStatus::Disabled);
        assert!(hub.mounted().await.is_empty());
        assert!(matches!(
            hub.frontend_document(&m.id).await,
            Err(HubError::Conflict(_))
        ));

        let on = hub.toggle(&m.id).await.unwrap();
        assert_eq!(on.status, ToolStatus::Active);
        assert_eq!(hub.mounted().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_tool_recovers_after_reupload() {
        let (_tmp, hub) = hub().await;
        let mut request = dual("Fixme");
        request.files.backend = Some(UploadedFile::new("b.wasm", b"garbage".to_vec()));
        let Err(HubError::Validation { manifest: Some(failed), .. }) = hub.upload(request).await else {
            panic!("expected a stored failure");
        };

        let fixed = hub
            .replace_artifacts(
                &failed.id,
                ArtifactFiles {
                    backend: Some(UploadedFile::new(
                        "b.wasm",
                        StubArtifact::echo(&["GET /ok"]).to_bytes(),
                    )),
                    frontend: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(fixed.status, ToolStatus::Active);
        assert_eq!(fixed.last_error, None);
        assert!(hub
            .dispatch(&fixed.id, ToolRequest::new("GET", "/ok", ""))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rejected_reupload_changes_nothing() {
        let (_tmp, hub) = hub().await;
        let m = hub.upload(dual("Echo")).await.unwrap();
        let err = hub
            .replace_artifacts(
                &m.id,
                ArtifactFiles {
                    backend: None,
                    frontend: Some(UploadedFile::new("index.html", "just text")),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation { .. }));

        let current = hub.get(&m.id).await.unwrap().manifest;
        assert_eq!(current.status, ToolStatus::Active);
        assert_eq!(current.frontend_artifact, m.frontend_artifact);
    }

    #[tokio::test]
    async fn edit_category_relocates_artifacts() {
        let (_tmp, hub) = hub().await;
        let m = hub.upload(dual("Echo")).await.unwrap();
        let patch = MetadataPatch {
            category: Some("Text Tools".into()),
            ..Default::default()
        };
        let edited = hub.edit(&m.id, patch).await.unwrap();
        let path = &edited.frontend_artifact.as_ref().unwrap().path;
        assert!(path.to_string_lossy().contains("text-tools"));
        assert!(path.exists());
        assert!(!m.frontend_artifact.as_ref().unwrap().path.exists());
        assert!(hub.frontend_document(&m.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_cascades_and_is_idempotent() {
        let (_tmp, hub) = hub().await;
        let m = hub.upload(dual("Echo")).await.unwrap();
        let backend_path = m.backend_artifact.as_ref().unwrap().path.clone();

        assert!(hub.delete(&m.id).await.unwrap());
        assert!(!backend_path.exists());
        assert!(hub.mounted().await.is_empty());
        assert!(matches!(hub.get(&m.id).await, Err(HubError::NotFound(_))));
        assert!(!hub.delete(&m.id).await.unwrap());
        assert!(!hub.delete("not-an-id").await.unwrap());
    }

    #[tokio::test]
    async fn toggle_during_rebuild_leaves_tool_unreachable() {
        let (_tmp, hub) = hub().await;
        let mut slow = dual("Slow");
        slow.files.backend = Some(UploadedFile::new(
            "slow.wasm",
            StubArtifact::echo(&["POST /echo"])
                .with_load_delay(std::time::Duration::from_millis(200))
                .to_bytes(),
        ));
        hub.upload(slow).await.unwrap();
        let b = hub.upload(dual("Echo")).await.unwrap();

        let disable = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            hub.toggle(&b.id).await.unwrap()
        };
        let (_, toggled) = tokio::join!(hub.mount_all(), disable);

        assert_eq!(toggled.status, ToolStatus::Disabled);
        let view = hub.get(&b.id).await.unwrap();
        assert_eq!(view.manifest.status, ToolStatus::Disabled);
        assert!(view.mount.is_none());
        assert!(matches!(
            hub.dispatch(&b.id, ToolRequest::new("POST", "/echo", "{}")).await,
            Err(HubError::Dispatch(DispatchError::NotMounted(_)))
        ));
    }
}
