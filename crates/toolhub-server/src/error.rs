use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use toolhub_core::{ToolManifest, ValidationError};
use toolhub_runtime::{DispatchError, MountError, RuntimeError};
use toolhub_store::StoreError;

use crate::bridge::BridgeError;

/// Every way a hub operation can be refused, mapped to HTTP at the edge.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    BadRequest(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{error}")]
    Validation {
        error: ValidationError,
        /// The manifest as persisted (status `failed`), when one was saved.
        manifest: Option<Box<ToolManifest>>,
    },

    #[error("{}", error.reason)]
    Mount {
        error: MountError,
        manifest: Option<Box<ToolManifest>>,
    },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for HubError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => HubError::NotFound(id),
            other => HubError::Store(other),
        }
    }
}

impl HubError {
    pub fn status(&self) -> StatusCode {
        match self {
            HubError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Conflict(_) => StatusCode::CONFLICT,
            HubError::Validation { .. } | HubError::Mount { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            HubError::Bridge(BridgeError::Missing(_)) => StatusCode::NOT_FOUND,
            HubError::Bridge(BridgeError::Unreadable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            HubError::Dispatch(e) => match e {
                DispatchError::NotMounted(_) | DispatchError::NoRoute { .. } => {
                    StatusCode::NOT_FOUND
                }
                DispatchError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
                DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                DispatchError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            HubError::Store(StoreError::InvalidToolId(_)) => StatusCode::NOT_FOUND,
            HubError::Store(StoreError::AlreadyExists(_)) => StatusCode::CONFLICT,
            HubError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error kind in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::BadRequest(_) => "bad_request",
            HubError::NotFound(_) => "not_found",
            HubError::Conflict(_) => "conflict",
            HubError::Validation { .. } => "validation_error",
            HubError::Mount { .. } => "mount_error",
            HubError::Bridge(_) => "resolution_error",
            HubError::Dispatch(e) => match e {
                DispatchError::NotMounted(_) => "not_mounted",
                DispatchError::NoRoute { .. } => "route_not_found",
                DispatchError::MethodNotAllowed { .. } => "method_not_allowed",
                DispatchError::Timeout(_) => "tool_timeout",
                DispatchError::Backend(RuntimeError::ToolError(_)) => "tool_error",
                DispatchError::Backend(_) => "tool_failure",
            },
            HubError::Store(StoreError::InvalidToolId(_)) => "not_found",
            HubError::Store(_) => "storage_error",
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        }

        let mut body = json!({
            "error": self.kind(),
            "reason": self.to_string(),
        });
        match &self {
            HubError::Validation { error, manifest } => {
                body["code"] = json!(error.code());
                if let Some(m) = manifest {
                    body["manifest"] = json!(m);
                }
            }
            HubError::Mount { error, manifest } => {
                body["toolId"] = json!(error.tool_id);
                if let Some(m) = manifest {
                    body["manifest"] = json!(m);
                }
            }
            HubError::Dispatch(DispatchError::MethodNotAllowed { allowed, .. }) => {
                body["allowed"] = json!(allowed);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if let HubError::Dispatch(DispatchError::MethodNotAllowed { allowed, .. }) = &self
            && let Ok(value) = HeaderValue::from_str(&allowed.join(", "))
        {
            response.headers_mut().insert(header::ALLOW, value);
        }
        response
    }
}
