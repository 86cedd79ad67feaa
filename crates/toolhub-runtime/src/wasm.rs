// Ported from microsoft/wassette (MIT License, with toolhub-specific modifications)
// Copyright (c) Microsoft Corporation.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use wasmtime::component::types::ComponentItem;
use wasmtime::component::{Component, InstancePre, Val};
use wasmtime::{Engine, Store};

use toolhub_core::{BackendContract, BackendInspector, RouteTable, ValidationError};
use toolhub_store::sha256_hex;

use crate::backend::{BackendLoader, ToolBackend, ToolRequest};
use crate::error::RuntimeError;
use crate::runtime_context::RuntimeContext;
use crate::wasistate::{DEFAULT_MEMORY_LIMIT, WasiState};

const PRECOMPILED_EXT: &str = "cwasm";

/// Export holding the request entry point (the application object).
pub const HANDLE_EXPORT: &str = "handle";
/// Export returning the route declarations.
pub const ROUTES_EXPORT: &str = "routes";

/// Resource budgets applied to every store.
#[derive(Debug, Clone)]
pub struct WasmLimits {
    /// Wall-clock budget for instantiating and asking for routes.
    pub inspect_budget: Duration,
    /// Wall-clock budget for one `handle` call.
    pub call_budget: Duration,
    pub memory_limit: usize,
}

impl Default for WasmLimits {
    fn default() -> Self {
        Self {
            inspect_budget: Duration::from_secs(5),
            call_budget: Duration::from_secs(10),
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// Runs backends as WebAssembly components exporting the
/// `toolhub:tool/backend` world.
///
/// Compiled components are cached on disk, keyed by the SHA-256 of the
/// source bytes, so remounting an unchanged artifact skips compilation.
pub struct WasmLoader {
    runtime: Arc<RuntimeContext>,
    cache: Option<PrecompileCache>,
    limits: WasmLimits,
}

impl WasmLoader {
    pub fn new(cache_dir: Option<PathBuf>, limits: WasmLimits) -> anyhow::Result<Self> {
        let runtime = Arc::new(RuntimeContext::new()?);
        let cache = match cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                Some(PrecompileCache { base_dir: dir })
            }
            None => None,
        };
        Ok(Self {
            runtime,
            cache,
            limits,
        })
    }

    async fn compile(&self, bytes: &[u8]) -> Result<Component, RuntimeError> {
        let engine = self.runtime.engine.clone();
        let cache = self.cache.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || match &cache {
            Some(cache) => cache.load_or_compile(&engine, &bytes),
            None => compile_component(&engine, &bytes),
        })
        .await
        .map_err(|e| RuntimeError::CompilationFailed(format!("compile task failed: {e}")))?
    }

    /// Compile, check the exports and pre-link a component.
    async fn prepare(&self, bytes: &[u8]) -> Result<Prepared, RuntimeError> {
        let component = self.compile(bytes).await?;
        check_exports(&self.runtime.engine, &component)?;
        let imports = import_names(&self.runtime.engine, &component);
        let instance_pre = self
            .runtime
            .linker
            .instantiate_pre(&component)
            .map_err(|e| RuntimeError::InstantiationFailed(format!("{e:#}")))?;
        let routes = self.call_routes(&instance_pre).await?;
        Ok(Prepared {
            instance_pre,
            routes,
            imports,
        })
    }

    async fn call_routes(
        &self,
        instance_pre: &InstancePre<WasiState>,
    ) -> Result<Vec<String>, RuntimeError> {
        let mut store = new_store(
            &self.runtime.engine,
            self.limits.memory_limit,
            self.limits.inspect_budget,
        );
        let instance = instance_pre
            .instantiate_async(&mut store)
            .await
            .map_err(|e| RuntimeError::InstantiationFailed(format!("{e:#}")))?;
        let func = instance
            .get_func(&mut store, ROUTES_EXPORT)
            .ok_or_else(|| ValidationError::NoRoutes(format!("no `{ROUTES_EXPORT}` export")))?;

        let mut results = vec![Val::Bool(false)];
        func.call_async(&mut store, &[], &mut results)
            .await
            .map_err(|e| RuntimeError::InvocationFailed(format!("{ROUTES_EXPORT}: {e:#}")))?;
        func.post_return_async(&mut store)
            .await
            .map_err(|e| RuntimeError::InvocationFailed(format!("{ROUTES_EXPORT} post_return: {e:#}")))?;

        decode_routes(results)
    }
}

struct Prepared {
    instance_pre: InstancePre<WasiState>,
    routes: Vec<String>,
    imports: Vec<String>,
}

impl BackendInspector for WasmLoader {
    fn inspect<'a>(
        &'a self,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<BackendContract, ValidationError>> + Send + 'a>> {
        Box::pin(async move {
            let prepared = self.prepare(bytes).await.map_err(into_validation_error)?;
            Ok(BackendContract {
                routes: prepared.routes,
                dependencies: prepared.imports,
            })
        })
    }
}

impl BackendLoader for WasmLoader {
    fn load<'a>(
        &'a self,
        tool_id: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ToolBackend>, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            let prepared = self.prepare(bytes).await?;
            if prepared.routes.is_empty() {
                return Err(ValidationError::NoRoutes(format!("`{ROUTES_EXPORT}` returned an empty list")).into());
            }
            let routes = RouteTable::parse(&prepared.routes)?;
            tracing::debug!(tool_id, routes = routes.len(), "Backend component prepared");
            let backend: Arc<dyn ToolBackend> = Arc::new(WasmBackend {
                tool_id: tool_id.to_string(),
                engine: self.runtime.engine.clone(),
                instance_pre: prepared.instance_pre,
                routes,
                limits: self.limits.clone(),
            });
            Ok(backend)
        })
    }
}

/// A mounted component. Each request gets a fresh store and instance.
struct WasmBackend {
    tool_id: String,
    engine: Engine,
    instance_pre: InstancePre<WasiState>,
    routes: RouteTable,
    limits: WasmLimits,
}

impl ToolBackend for WasmBackend {
    fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn handle<'a>(
        &'a self,
        request: &'a ToolRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            let tool_id = self.tool_id.as_str();
            let mut store = new_store(&self.engine, self.limits.memory_limit, self.limits.call_budget);

            let instance = self
                .instance_pre
                .instantiate_async(&mut store)
                .await
                .map_err(|e| RuntimeError::InstantiationFailed(format!("{tool_id}: {e:#}")))?;
            let func = instance.get_func(&mut store, HANDLE_EXPORT).ok_or_else(|| {
                RuntimeError::InvocationFailed(format!("{tool_id}: no `{HANDLE_EXPORT}` export"))
            })?;

            let params = [
                Val::String(request.method.clone()),
                Val::String(request.path.clone()),
                Val::String(request.body.clone()),
            ];
            let mut results = vec![Val::Bool(false)];
            func.call_async(&mut store, &params, &mut results)
                .await
                .map_err(|e| RuntimeError::InvocationFailed(format!("{tool_id}: {e:#}")))?;
            func.post_return_async(&mut store)
                .await
                .map_err(|e| RuntimeError::InvocationFailed(format!("{tool_id} post_return: {e:#}")))?;

            extract_handle_result(tool_id, results)
        })
    }
}

fn new_store(engine: &Engine, memory_limit: usize, budget: Duration) -> Store<WasiState> {
    let mut store = Store::new(engine, WasiState::sandboxed(memory_limit));
    store.limiter(|state| &mut state.limits);
    store.set_epoch_deadline(RuntimeContext::ticks_for(budget));
    store.epoch_deadline_trap();
    store
}

fn compile_component(engine: &Engine, bytes: &[u8]) -> Result<Component, RuntimeError> {
    Component::from_binary(engine, bytes).map_err(|e| {
        ValidationError::InvalidBackend(format!("not a WebAssembly component: {e:#}")).into()
    })
}

fn check_exports(engine: &Engine, component: &Component) -> Result<(), ValidationError> {
    let ty = component.component_type();
    let has_func = |wanted: &str| {
        ty.exports(engine)
            .any(|(name, item)| name == wanted && matches!(item, ComponentItem::ComponentFunc(_)))
    };
    if !has_func(HANDLE_EXPORT) {
        return Err(ValidationError::NoApplicationObject(format!(
            "component does not export a `{HANDLE_EXPORT}` function"
        )));
    }
    if !has_func(ROUTES_EXPORT) {
        return Err(ValidationError::NoRoutes(format!(
            "component does not export a `{ROUTES_EXPORT}` function"
        )));
    }
    Ok(())
}

fn import_names(engine: &Engine, component: &Component) -> Vec<String> {
    component
        .component_type()
        .imports(engine)
        .map(|(name, _)| name.to_string())
        .collect()
}

fn into_validation_error(err: RuntimeError) -> ValidationError {
    match err {
        RuntimeError::Contract(v) => v,
        RuntimeError::Route(e) => e.into(),
        other => ValidationError::InvalidBackend(other.to_string()),
    }
}

/// Decode the `list<string>` returned by `routes`.
fn decode_routes(results: Vec<Val>) -> Result<Vec<String>, RuntimeError> {
    match results.into_iter().next() {
        Some(Val::List(items)) => items
            .into_iter()
            .map(|item| match item {
                Val::String(s) => Ok(s),
                other => Err(RuntimeError::InvocationFailed(format!(
                    "{ROUTES_EXPORT}: expected a string entry, got {other:?}"
                ))),
            })
            .collect(),
        Some(other) => Err(RuntimeError::InvocationFailed(format!(
            "{ROUTES_EXPORT}: expected list<string>, got {other:?}"
        ))),
        None => Err(RuntimeError::InvocationFailed(format!(
            "{ROUTES_EXPORT}: component returned no values"
        ))),
    }
}

/// Extract the string value from the `result<string, string>` of `handle`.
fn extract_handle_result(tool_id: &str, results: Vec<Val>) -> Result<String, RuntimeError> {
    match results.into_iter().next() {
        Some(Val::Result(Ok(Some(boxed)))) => match *boxed {
            Val::String(s) => Ok(s),
            other => Err(RuntimeError::InvocationFailed(format!(
                "{tool_id}: expected string in Ok variant, got {other:?}"
            ))),
        },
        Some(Val::Result(Err(Some(boxed)))) => match *boxed {
            Val::String(e) => Err(RuntimeError::ToolError(e)),
            other => Err(RuntimeError::ToolError(format!("{other:?}"))),
        },
        Some(Val::Result(Ok(None))) => Ok(String::new()),
        Some(Val::Result(Err(None))) => Err(RuntimeError::ToolError("(no error detail)".into())),
        Some(other) => Err(RuntimeError::InvocationFailed(format!(
            "{tool_id}: unexpected return value: {other:?}"
        ))),
        None => Err(RuntimeError::InvocationFailed(format!(
            "{tool_id}: component returned no values"
        ))),
    }
}

/// Disk cache of serialized (precompiled) components.
///
/// Layout under `base_dir`:
/// ```text
/// {base_dir}/
///   {sha256}.cwasm
/// ```
#[derive(Clone)]
struct PrecompileCache {
    base_dir: PathBuf,
}

impl PrecompileCache {
    fn path_for(&self, hash: &str) -> PathBuf {
        self.base_dir.join(format!("{hash}.{PRECOMPILED_EXT}"))
    }

    fn load_or_compile(&self, engine: &Engine, bytes: &[u8]) -> Result<Component, RuntimeError> {
        let hash = sha256_hex(bytes);
        let cwasm_path = self.path_for(&hash);

        if cwasm_path.exists() {
            match load_precompiled(&cwasm_path, engine) {
                Ok(component) => {
                    tracing::debug!(hash, "Loaded from precompiled cache");
                    return Ok(component);
                }
                Err(e) => tracing::debug!(hash, error = %e, "Precompiled cache invalid, recompiling"),
            }
        }

        let component = compile_component(engine, bytes)?;

        match component.serialize() {
            Ok(serialized) => match self.write_entry(&cwasm_path, &serialized) {
                Ok(()) => tracing::debug!(hash, "Saved precompiled cache"),
                Err(e) => tracing::warn!(hash, error = %e, "Failed to write precompiled cache"),
            },
            Err(e) => tracing::warn!(hash, error = %e, "Failed to serialize component"),
        }

        Ok(component)
    }

    /// Write a cache entry under a unique temporary name and rename it into
    /// place, so concurrent loads of the same component never see a
    /// partial file.
    fn write_entry(&self, path: &Path, serialized: &[u8]) -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        tmp.write_all(serialized)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn load_precompiled(path: &Path, engine: &Engine) -> anyhow::Result<Component> {
    // SAFETY: cwasm files in the cache directory are only ever written by
    // `PrecompileCache::write_entry` (complete file renamed into place) with an
    // engine of this same Wasmtime version, and are keyed by the hash of
    // their source. Wasmtime itself
    // rejects files built with an incompatible engine configuration.
    unsafe { Component::deserialize_file(engine, path) }
}
