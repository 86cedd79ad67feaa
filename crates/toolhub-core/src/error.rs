use thiserror::Error;

use crate::manifest::ArtifactKind;

/// Why an uploaded artifact was rejected.
///
/// The `Display` text is shown to the uploader verbatim, so every variant
/// carries the specific reason rather than a bare "failed".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no application object found: {0}")]
    NoApplicationObject(String),

    #[error("application object has no routes: {0}")]
    NoRoutes(String),

    #[error("invalid route declaration: {0}")]
    InvalidRoute(String),

    #[error("invalid backend artifact: {0}")]
    InvalidBackend(String),

    #[error("invalid frontend artifact: {0}")]
    InvalidFrontend(String),

    #[error("unsupported {kind} artifact `{filename}`: expected one of {expected}")]
    UnsupportedExtension {
        kind: ArtifactKind,
        filename: String,
        expected: String,
    },

    #[error("{0} artifact is empty")]
    Empty(ArtifactKind),
}

impl ValidationError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NoApplicationObject(_) => "no_application_object",
            ValidationError::NoRoutes(_) => "no_routes",
            ValidationError::InvalidRoute(_) => "invalid_route",
            ValidationError::InvalidBackend(_) => "invalid_backend",
            ValidationError::InvalidFrontend(_) => "invalid_frontend",
            ValidationError::UnsupportedExtension { .. } => "unsupported_extension",
            ValidationError::Empty(_) => "empty_artifact",
        }
    }
}

/// A route declaration that cannot be attached under a tool's prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("malformed route `{entry}`: {reason}")]
    Malformed { entry: String, reason: String },

    #[error("route conflict: `{first}` and `{second}` match the same requests")]
    Conflict { first: String, second: String },
}

impl From<RouteError> for ValidationError {
    fn from(err: RouteError) -> Self {
        ValidationError::InvalidRoute(err.to_string())
    }
}
