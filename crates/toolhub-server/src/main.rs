use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use toolhub_core::{ArtifactKind, BackendInspector, Validator};
use toolhub_runtime::{BackendLoader, StubLoader, WasmLoader};
use toolhub_server::config::{BackendEngine, HubConfig};
use toolhub_server::hub::{HubOptions, ToolHub};
use toolhub_server::api;
use toolhub_store::DataLayout;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "toolhub",
    version,
    about = "toolhub: upload, validate and mount sandboxed tools"
)]
struct Cli {
    /// Path to toolhub.toml (default: ./toolhub.toml, then ~/.config/toolhub/toolhub.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount every active tool and serve the HTTP API
    Serve {
        /// Listen address, overrides [server].listen
        #[arg(long)]
        listen: Option<String>,

        /// Data directory, overrides [storage].root
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate an artifact offline and print the report as JSON
    Check {
        /// Artifact file to validate
        file: PathBuf,

        /// Artifact slot (default: backend for .wasm files, frontend otherwise)
        #[arg(long, value_parser = ["backend", "frontend"])]
        kind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let (config, source) = HubConfig::discover(cli.config.as_deref())?;
    match &source {
        Some(path) => tracing::info!(config = %path.display(), "Loaded configuration"),
        None => tracing::info!("No toolhub.toml found, using defaults"),
    }

    match cli.command {
        Command::Serve { listen, data_dir } => {
            let mut config = config;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.storage.root = Some(data_dir);
            }
            let layout = DataLayout::new(config.storage.root_dir());
            match config.runtime.engine {
                BackendEngine::Wasm => {
                    let loader = WasmLoader::new(
                        Some(layout.cache_dir()),
                        config.runtime.wasm_limits(),
                    )
                    .context("failed to initialize the Wasm runtime")?;
                    serve(config, layout, Arc::new(loader)).await
                }
                BackendEngine::Stub => {
                    tracing::warn!("Running with the stub engine; backends are JSON stubs");
                    serve(config, layout, Arc::new(StubLoader::new())).await
                }
            }
        }
        Command::Check { file, kind } => {
            let inspector: Arc<dyn BackendInspector> = match config.runtime.engine {
                BackendEngine::Wasm => Arc::new(
                    WasmLoader::new(None, config.runtime.wasm_limits())
                        .context("failed to initialize the Wasm runtime")?,
                ),
                BackendEngine::Stub => Arc::new(StubLoader::new()),
            };
            let validator = Validator::new(inspector)
                .with_recognized_exports(config.frontend.recognized_exports.clone());
            check(&validator, &file, kind.as_deref()).await
        }
    }
}

fn init_logging(json: bool) {
    // Default to info; TOOLHUB_LOG overrides.
    let filter = EnvFilter::try_from_env("TOOLHUB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn serve<L>(config: HubConfig, layout: DataLayout, loader: Arc<L>) -> Result<()>
where
    L: BackendLoader + 'static,
{
    let options = HubOptions {
        data_dir: layout.root().to_path_buf(),
        mount: config.runtime.mount_settings(),
        recognized_exports: config.frontend.recognized_exports.clone(),
        runtime_scripts: config.frontend.runtime_scripts.clone(),
    };
    let hub = ToolHub::open(options, loader)
        .await
        .with_context(|| format!("failed to open data directory {}", layout.root().display()))?;
    let hub = Arc::new(hub);

    let report = hub.mount_all().await;
    for error in &report.errors {
        tracing::warn!(tool_id = %error.tool_id, reason = %error.reason, "Tool failed to mount at boot");
    }

    let router = api::router(Arc::clone(&hub), &config.server);
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    tracing::info!(
        listen = %config.server.listen,
        data_dir = %layout.root().display(),
        mounted = report.mounted.len(),
        failed = report.errors.len(),
        "toolhub listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("toolhub shutting down");
    Ok(())
}

async fn check(validator: &Validator, file: &Path, kind: Option<&str>) -> Result<()> {
    let content = std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = match kind {
        Some("backend") => ArtifactKind::Backend,
        Some(_) => ArtifactKind::Frontend,
        None if filename.to_ascii_lowercase().ends_with(".wasm") => ArtifactKind::Backend,
        None => ArtifactKind::Frontend,
    };

    match validator.validate(kind, &content, &filename).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            let body = serde_json::json!({
                "error": e.code(),
                "reason": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            bail!("{filename} rejected: {e}")
        }
    }
}
