use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use toolhub_core::manifest::mount_prefix;
use toolhub_core::{ArtifactKind, RouteMatch, RouteSpec, RouteTable, ToolStatus};
use toolhub_store::{ArtifactStore, ManifestRegistry};

use crate::backend::{BackendLoader, ToolBackend, ToolRequest};
use crate::error::{DispatchError, MountError, MountReport};

#[derive(Debug, Clone)]
pub struct MountSettings {
    pub load_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_millis(5_000),
            call_timeout: Duration::from_millis(10_000),
        }
    }
}

/// A live backend attached under `/tools/{tool_id}`.
pub struct MountRecord {
    pub tool_id: String,
    pub routes: RouteTable,
    pub mounted_at: DateTime<Utc>,
    backend: Arc<dyn ToolBackend>,
}

/// Serializable view of a [`MountRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountInfo {
    pub tool_id: String,
    pub prefix: String,
    pub routes: Vec<RouteSpec>,
    pub mounted_at: DateTime<Utc>,
}

impl From<&MountRecord> for MountInfo {
    fn from(record: &MountRecord) -> Self {
        Self {
            tool_id: record.tool_id.clone(),
            prefix: mount_prefix(&record.tool_id),
            routes: record.routes.routes().to_vec(),
            mounted_at: record.mounted_at,
        }
    }
}

/// Proof that the caller holds a tool's lifecycle lock.
///
/// Every mount, unmount and lifecycle change of one tool happens while a
/// `ToolGuard` for it is alive, so those operations never interleave.
pub struct ToolGuard {
    tool_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ToolGuard {
    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }
}

/// Attaches active backends under their per-tool namespace and routes
/// requests into them.
///
/// The mount table is a derived index: [`MountManager::mount_all`] rebuilds
/// every entry of it from the registry, and nothing else reads it except
/// [`MountManager::dispatch`].
pub struct MountManager {
    registry: Arc<ManifestRegistry>,
    artifacts: Arc<ArtifactStore>,
    loader: Arc<dyn BackendLoader>,
    settings: MountSettings,
    table: RwLock<HashMap<String, Arc<MountRecord>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MountManager {
    pub fn new(
        registry: Arc<ManifestRegistry>,
        artifacts: Arc<ArtifactStore>,
        loader: Arc<dyn BackendLoader>,
        settings: MountSettings,
    ) -> Self {
        Self {
            registry,
            artifacts,
            loader,
            settings,
            table: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lifecycle lock of one tool.
    pub async fn lock(&self, tool_id: &str) -> ToolGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(tool_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        ToolGuard {
            tool_id: tool_id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Drop the lock entry of a deleted tool.
    pub async fn forget(&self, guard: ToolGuard) {
        let mut locks = self.locks.lock().await;
        locks.remove(&guard.tool_id);
    }

    /// Rebuild every entry of the table from the registry, one tool at a
    /// time. A failing tool is flipped to `failed` and reported; the others
    /// are unaffected.
    ///
    /// Each tool is re-read while its lifecycle lock is held, so a tool that
    /// was disabled or deleted after the active list was taken is dropped
    /// from the table instead of mounted.
    pub async fn mount_all(&self) -> MountReport {
        let active: Vec<String> = self
            .registry
            .list_active()
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();
        let stale: Vec<String> = self
            .table
            .read()
            .await
            .keys()
            .filter(|id| !active.contains(id))
            .cloned()
            .collect();

        for tool_id in stale {
            let _guard = self.lock(&tool_id).await;
            if !self.should_mount(&tool_id).await && self.remove_record(&tool_id).await {
                tracing::debug!(tool_id, "Dropped stale mount");
            }
        }

        let mut report = MountReport::default();
        for tool_id in active {
            let guard = self.lock(&tool_id).await;
            if !self.should_mount(&tool_id).await {
                self.remove_record(&tool_id).await;
                report.skipped.push(tool_id);
                continue;
            }
            match self.mount(&guard).await {
                Ok(_) => report.mounted.push(tool_id),
                Err(e) => report.errors.push(e),
            }
        }

        tracing::info!(
            mounted = report.mounted.len(),
            skipped = report.skipped.len(),
            failed = report.errors.len(),
            "Mount table rebuilt"
        );
        report
    }

    /// Whether the registry currently wants this tool mounted.
    async fn should_mount(&self, tool_id: &str) -> bool {
        self.registry
            .get(tool_id)
            .await
            .is_some_and(|m| m.is_active() && m.needs_mount())
    }

    /// Mount (or re-mount) one tool from its manifest.
    ///
    /// On failure the tool ends up unmounted, its manifest is set to
    /// `failed` with the reason, and the error is returned.
    pub async fn mount(&self, guard: &ToolGuard) -> Result<Arc<MountRecord>, MountError> {
        let tool_id = guard.tool_id();
        self.remove_record(tool_id).await;

        match self.load_record(tool_id).await {
            Ok(record) => {
                let record = Arc::new(record);
                self.table
                    .write()
                    .await
                    .insert(tool_id.to_string(), Arc::clone(&record));
                tracing::info!(
                    tool_id,
                    prefix = %mount_prefix(tool_id),
                    routes = record.routes.len(),
                    "Backend mounted"
                );
                Ok(record)
            }
            Err(error) => {
                tracing::warn!(tool_id, reason = %error.reason, "Mount failed");
                if let Err(e) = self
                    .registry
                    .set_status(tool_id, ToolStatus::Failed, Some(error.reason.clone()))
                    .await
                {
                    tracing::error!(tool_id, error = %e, "Failed to record mount failure");
                }
                Err(error)
            }
        }
    }

    async fn load_record(&self, tool_id: &str) -> Result<MountRecord, MountError> {
        let fail = |reason: String| MountError::new(tool_id, reason);

        let manifest = self
            .registry
            .require(tool_id)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !manifest.kind.requires_backend() {
            return Err(fail(format!("{} tools have no backend to mount", manifest.kind)));
        }

        let bytes = self
            .artifacts
            .read_for(&manifest, ArtifactKind::Backend)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let timeout = self.settings.load_timeout;
        let backend = match tokio::time::timeout(timeout, self.loader.load(tool_id, &bytes)).await {
            Ok(Ok(backend)) => backend,
            Ok(Err(e)) => return Err(fail(e.to_string())),
            Err(_) => {
                return Err(fail(format!(
                    "backend load timed out after {} ms",
                    timeout.as_millis()
                )));
            }
        };

        let routes = backend.routes().clone();
        if routes.is_empty() {
            return Err(fail("application object has no routes".into()));
        }

        Ok(MountRecord {
            tool_id: tool_id.to_string(),
            routes,
            mounted_at: Utc::now(),
            backend,
        })
    }

    /// Detach a tool. Returns whether it was mounted.
    pub async fn unmount(&self, guard: &ToolGuard) -> bool {
        let removed = self.remove_record(guard.tool_id()).await;
        if removed {
            tracing::info!(tool_id = guard.tool_id(), "Backend unmounted");
        }
        removed
    }

    async fn remove_record(&self, tool_id: &str) -> bool {
        self.table.write().await.remove(tool_id).is_some()
    }

    /// Route a request into a mounted tool.
    pub async fn dispatch(
        &self,
        tool_id: &str,
        request: ToolRequest,
    ) -> Result<String, DispatchError> {
        let record = self
            .table
            .read()
            .await
            .get(tool_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotMounted(mount_prefix(tool_id)))?;

        match record.routes.resolve(&request.method, &request.path) {
            RouteMatch::NotFound => {
                return Err(DispatchError::NoRoute {
                    method: request.method,
                    path: request.path,
                });
            }
            RouteMatch::MethodNotAllowed(allowed) => {
                return Err(DispatchError::MethodNotAllowed {
                    method: request.method,
                    path: request.path,
                    allowed,
                });
            }
            RouteMatch::Found(route) => {
                tracing::debug!(tool_id, %route, path = %request.path, "Dispatching");
            }
        }

        let timeout = self.settings.call_timeout;
        match tokio::time::timeout(timeout, record.backend.handle(&request)).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => {
                tracing::warn!(tool_id, method = %request.method, path = %request.path, error = %e, "Tool call failed");
                Err(DispatchError::Backend(e))
            }
            Err(_) => {
                tracing::warn!(tool_id, method = %request.method, path = %request.path, "Tool call timed out");
                Err(DispatchError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    pub async fn is_mounted(&self, tool_id: &str) -> bool {
        self.table.read().await.contains_key(tool_id)
    }

    pub async fn mount_info(&self, tool_id: &str) -> Option<MountInfo> {
        self.table
            .read()
            .await
            .get(tool_id)
            .map(|record| MountInfo::from(record.as_ref()))
    }

    /// Everything currently mounted, ordered by tool id.
    pub async fn mounted(&self) -> Vec<MountInfo> {
        let mut all: Vec<MountInfo> = self
            .table
            .read()
            .await
            .values()
            .map(|record| MountInfo::from(record.as_ref()))
            .collect();
        all.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        all
    }
}
