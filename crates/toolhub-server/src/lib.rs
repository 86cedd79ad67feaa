//! HTTP surface, frontend bridge and lifecycle service of toolhub.
//!
//! [`ToolHub`] owns the registry, the artifact store and the mount manager
//! and runs every lifecycle operation (upload, toggle, edit, re-upload,
//! reload, delete). [`api::router`] exposes it over HTTP.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod hub;

pub use config::{BackendEngine, ConfigError, HubConfig};
pub use error::HubError;
pub use hub::{ArtifactFiles, HubOptions, ToolHub, ToolView, UploadRequest, UploadedFile};
