use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid tool id: {0}")]
    InvalidToolId(String),

    #[error("tool already exists: {0}")]
    AlreadyExists(String),

    #[error("{kind} artifact for tool {tool_id} is missing: {detail}")]
    MissingArtifact {
        tool_id: String,
        kind: toolhub_core::ArtifactKind,
        detail: String,
    },

    #[error("artifact path escapes the store: {0}")]
    OutsideStore(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
