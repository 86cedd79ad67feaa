// toolhub-runtime: sandboxed backend runtime for toolhub
//
// The Wasmtime layer is ported from microsoft/wassette (MIT License).
// Copyright (c) Microsoft Corporation.

//! Sandboxed backend runtime and mount manager.
//!
//! A backend is loaded through a [`BackendLoader`] into a [`ToolBackend`]
//! and attached by the [`MountManager`] under `/tools/{id}`. Production
//! backends are WebAssembly components run by [`WasmLoader`]; [`StubLoader`]
//! implements the same contract with plain JSON documents.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolhub_runtime::{MountManager, MountSettings, WasmLimits, WasmLoader};
//! use toolhub_store::{ArtifactStore, DataLayout, ManifestRegistry};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let layout = DataLayout::new(DataLayout::default_root());
//! let registry = Arc::new(ManifestRegistry::open(layout.manifests_dir()).await?);
//! let artifacts = Arc::new(ArtifactStore::new(layout.artifacts_dir()));
//! let loader = Arc::new(WasmLoader::new(Some(layout.cache_dir()), WasmLimits::default())?);
//!
//! let mounts = MountManager::new(registry, artifacts, loader, MountSettings::default());
//! let report = mounts.mount_all().await;
//! println!("{} mounted, {} failed", report.mounted.len(), report.errors.len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod mount;
pub mod runtime_context;
pub mod stub;
pub mod wasistate;
pub mod wasm;

pub use backend::{BackendLoader, ToolBackend, ToolRequest};
pub use error::{DispatchError, MountError, MountReport, RuntimeError};
pub use mount::{MountInfo, MountManager, MountSettings, ToolGuard};
pub use stub::{StubArtifact, StubBehavior, StubLoader};
pub use wasm::{WasmLimits, WasmLoader};
