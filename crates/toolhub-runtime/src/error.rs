use serde::{Deserialize, Serialize};
use thiserror::Error;
use toolhub_core::{RouteError, ValidationError};
use toolhub_store::StoreError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("compilation failed: {0}")]
    CompilationFailed(String),

    #[error("instantiation failed: {0}")]
    InstantiationFailed(String),

    #[error("invocation failed: {0}")]
    InvocationFailed(String),

    /// The tool ran and reported a failure of its own.
    #[error("tool returned error: {0}")]
    ToolError(String),

    #[error("{0}")]
    Contract(#[from] ValidationError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One tool that could not be mounted, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{tool_id}: {reason}")]
pub struct MountError {
    pub tool_id: String,
    pub reason: String,
}

impl MountError {
    pub fn new(tool_id: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            tool_id: tool_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Outcome of replaying every active manifest into the mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountReport {
    pub mounted: Vec<String>,
    /// Listed as active but with nothing to mount: frontend-only, or no
    /// longer active once the tool's lock was held.
    pub skipped: Vec<String>,
    pub errors: Vec<MountError>,
}

/// Why a dispatched request did not produce a tool response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no tool is mounted at {0}")]
    NotMounted(String),

    #[error("no route matches {method} {path}")]
    NoRoute { method: String, path: String },

    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<String>,
    },

    #[error("tool did not answer within {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Backend(RuntimeError),
}
