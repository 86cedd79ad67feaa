//! Core model for toolhub.
//!
//! A *tool* is an uploaded pair of artifacts: a backend (a sandboxed
//! component whose routes are mounted under `/tools/{id}`) and/or a frontend
//! (an HTML document or UI component module rendered in a sandboxed frame).
//! This crate holds the durable [`ToolManifest`] record, the route table
//! rules shared by validation and mounting, and the [`Validator`] that gates
//! activation.

pub mod error;
pub mod manifest;
pub mod route;
pub mod scan;
pub mod validator;

pub use error::{RouteError, ValidationError};
pub use manifest::{
    ArtifactKind, ArtifactRef, MetadataPatch, ToolKind, ToolManifest, ToolMetadata, ToolStatus,
};
pub use route::{RouteMatch, RouteSpec, RouteTable};
pub use validator::{BackendContract, BackendInspector, FrontendType, ValidationReport, Validator};
