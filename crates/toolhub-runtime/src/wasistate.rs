// Ported from microsoft/wassette (MIT License)
// Copyright (c) Microsoft Corporation.

use wasmtime::component::ResourceTable;
use wasmtime::{StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder, WasiCtxView, WasiView};
use wasmtime_wasi_http::{WasiHttpCtx, WasiHttpView};

/// Default linear-memory cap for one backend instance.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Per-invocation sandbox state.
///
/// A fresh `WasiState` is created for each inspection and each request, so
/// backends keep no state between calls.
///
/// Deny-default posture:
/// - no filesystem preopens
/// - no host environment variables or arguments
/// - stdio is not inherited
/// - network only through WASI HTTP
/// - linear memory capped by [`StoreLimits`]
pub struct WasiState {
    ctx: WasiCtx,
    table: ResourceTable,
    http: WasiHttpCtx,
    pub limits: StoreLimits,
}

impl WasiView for WasiState {
    fn ctx(&mut self) -> WasiCtxView<'_> {
        WasiCtxView {
            ctx: &mut self.ctx,
            table: &mut self.table,
        }
    }
}

impl WasiHttpView for WasiState {
    fn ctx(&mut self) -> &mut WasiHttpCtx {
        &mut self.http
    }
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }
}

impl WasiState {
    /// Build the sandbox for one backend instance.
    pub fn sandboxed(memory_limit: usize) -> Self {
        let ctx = WasiCtxBuilder::new().build();
        let limits = StoreLimitsBuilder::new().memory_size(memory_limit).build();

        Self {
            ctx,
            table: ResourceTable::new(),
            http: WasiHttpCtx::new(),
            limits,
        }
    }
}

impl Default for WasiState {
    fn default() -> Self {
        Self::sandboxed(DEFAULT_MEMORY_LIMIT)
    }
}
