// Ported from microsoft/wassette (MIT License)
// Copyright (c) Microsoft Corporation.

use std::time::Duration;

use anyhow::Result;
use wasmtime::component::Linker;
use wasmtime::{Config, Engine};

use crate::wasistate::WasiState;

/// Interval at which the engine epoch advances.
pub const EPOCH_TICK: Duration = Duration::from_millis(100);

/// Shared Wasmtime engine and linker.
///
/// `RuntimeContext` is constructed once and shared across all backend loads
/// and invocations. The engine is thread-safe; the linker is pre-configured
/// with WASI p2 and WASI HTTP host functions.
///
/// Epoch interruption is enabled and a background thread advances the epoch
/// every [`EPOCH_TICK`], so every store can be given a deadline. The thread
/// holds only a weak engine handle and exits once the engine is dropped.
pub struct RuntimeContext {
    pub engine: Engine,
    pub linker: Linker<WasiState>,
}

impl RuntimeContext {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_component_model(true);
        config.async_support(true);
        config.epoch_interruption(true);

        let engine = Engine::new(&config)?;
        let mut linker: Linker<WasiState> = Linker::new(&engine);

        wasmtime_wasi::p2::add_to_linker_async(&mut linker)?;
        wasmtime_wasi_http::add_only_http_to_linker_async(&mut linker)?;

        spawn_epoch_ticker(&engine)?;

        tracing::debug!("RuntimeContext initialized (component-model + async + epochs + WASI p2 + HTTP)");

        Ok(Self { engine, linker })
    }

    /// Number of epoch ticks that fit in `budget`, at least one.
    pub fn ticks_for(budget: Duration) -> u64 {
        let ticks = budget.as_millis() / EPOCH_TICK.as_millis();
        u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
    }
}

fn spawn_epoch_ticker(engine: &Engine) -> Result<()> {
    let weak = engine.weak();
    std::thread::Builder::new()
        .name("toolhub-epoch".into())
        .spawn(move || {
            loop {
                std::thread::sleep(EPOCH_TICK);
                match weak.upgrade() {
                    Some(engine) => engine.increment_epoch(),
                    None => break,
                }
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_round_down_but_never_to_zero() {
        assert_eq!(RuntimeContext::ticks_for(Duration::from_millis(10_000)), 100);
        assert_eq!(RuntimeContext::ticks_for(Duration::from_millis(250)), 2);
        assert_eq!(RuntimeContext::ticks_for(Duration::from_millis(5)), 1);
    }

    #[test]
    fn context_builds() {
        let ctx = RuntimeContext::new().unwrap();
        let _ = ctx.engine.clone();
    }
}
