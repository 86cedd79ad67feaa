use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use toolhub_core::{BackendInspector, RouteTable};

use crate::error::RuntimeError;

/// One request forwarded into a tool, relative to its mount prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolRequest {
    pub method: String,
    /// Always starts with `/`; the `/tools/{id}` prefix is already stripped.
    pub path: String,
    pub body: String,
}

impl ToolRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: toolhub_core::route::normalize_path(&path.into()),
            body: body.into(),
        }
    }
}

/// A loaded backend: its route table plus the entry point requests go through.
pub trait ToolBackend: Send + Sync {
    fn routes(&self) -> &RouteTable;

    /// Handle a request. `Ok` is the response body, `Err(ToolError)` a
    /// failure the tool reported itself.
    fn handle<'a>(
        &'a self,
        request: &'a ToolRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, RuntimeError>> + Send + 'a>>;
}

/// Turns backend artifact bytes into a callable [`ToolBackend`].
///
/// Every loader can also inspect artifacts, so the validator and the mount
/// manager always agree on what a valid backend is.
pub trait BackendLoader: BackendInspector {
    fn load<'a>(
        &'a self,
        tool_id: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ToolBackend>, RuntimeError>> + Send + 'a>>;
}
