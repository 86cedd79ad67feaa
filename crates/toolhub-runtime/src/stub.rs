use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolhub_core::{BackendContract, BackendInspector, RouteTable, ValidationError};

use crate::backend::{BackendLoader, ToolBackend, ToolRequest};
use crate::error::RuntimeError;

/// What a stub backend does with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StubBehavior {
    /// Answer `{"echo": <body>}`.
    Echo,
    /// Answer with the tool id, method and path that reached the backend.
    Whoami,
    /// Answer with a fixed body.
    Reply { body: String },
    /// Report a tool-level failure.
    Fail { message: String },
    /// Never answer.
    Hang,
}

/// A deterministic stand-in for a backend component: a small JSON document
/// carrying the same contract a component exports.
///
/// ```json
/// {"handle": {"kind": "echo"}, "routes": ["POST /echo"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<StubBehavior>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    /// Simulated load cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_delay_ms: Option<u64>,
}

impl StubArtifact {
    pub fn new(behavior: StubBehavior, routes: &[&str]) -> Self {
        Self {
            handle: Some(behavior),
            routes: routes.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn echo(routes: &[&str]) -> Self {
        Self::new(StubBehavior::Echo, routes)
    }

    pub fn whoami(routes: &[&str]) -> Self {
        Self::new(StubBehavior::Whoami, routes)
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    fn parse(bytes: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::InvalidBackend(format!("not a stub backend: {e}")))
    }

    fn behavior(&self) -> Result<&StubBehavior, ValidationError> {
        self.handle.as_ref().ok_or_else(|| {
            ValidationError::NoApplicationObject("stub artifact has no `handle` entry".into())
        })
    }
}

/// Loader that interprets [`StubArtifact`] documents instead of running
/// WebAssembly. Used for tests and for hosts without a Wasm toolchain.
#[derive(Default)]
pub struct StubLoader {
    loads: AtomicUsize,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many successful loads have happened so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl BackendInspector for StubLoader {
    fn inspect<'a>(
        &'a self,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<BackendContract, ValidationError>> + Send + 'a>> {
        Box::pin(async move {
            let artifact = StubArtifact::parse(bytes)?;
            artifact.behavior()?;
            Ok(BackendContract {
                routes: artifact.routes,
                dependencies: artifact.imports,
            })
        })
    }
}

impl BackendLoader for StubLoader {
    fn load<'a>(
        &'a self,
        tool_id: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ToolBackend>, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            let artifact = StubArtifact::parse(bytes)?;
            if let Some(ms) = artifact.load_delay_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            let behavior = artifact.behavior()?.clone();
            if artifact.routes.is_empty() {
                return Err(ValidationError::NoRoutes("stub artifact declares no routes".into()).into());
            }
            let routes = RouteTable::parse(&artifact.routes)?;
            self.loads.fetch_add(1, Ordering::Relaxed);

            let backend: Arc<dyn ToolBackend> = Arc::new(StubBackend {
                tool_id: tool_id.to_string(),
                routes,
                behavior,
            });
            Ok(backend)
        })
    }
}

struct StubBackend {
    tool_id: String,
    routes: RouteTable,
    behavior: StubBehavior,
}

impl ToolBackend for StubBackend {
    fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn handle<'a>(
        &'a self,
        request: &'a ToolRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            match &self.behavior {
                StubBehavior::Echo => {
                    let body = serde_json::from_str::<serde_json::Value>(&request.body)
                        .unwrap_or_else(|_| serde_json::Value::String(request.body.clone()));
                    Ok(serde_json::json!({ "echo": body }).to_string())
                }
                StubBehavior::Whoami => Ok(serde_json::json!({
                    "toolId": self.tool_id,
                    "method": request.method,
                    "path": request.path,
                })
                .to_string()),
                StubBehavior::Reply { body } => Ok(body.clone()),
                StubBehavior::Fail { message } => Err(RuntimeError::ToolError(message.clone())),
                StubBehavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(String::new())
                }
            }
        })
    }
}
