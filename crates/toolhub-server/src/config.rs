use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use toolhub_core::validator::DEFAULT_RECOGNIZED_EXPORTS;
use toolhub_runtime::{MountSettings, WasmLimits};
use toolhub_store::DataLayout;

pub const CONFIG_FILE_NAME: &str = "toolhub.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default)]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_permissive: false,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8765".into()
}
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Data root; `~/` is expanded. Defaults to `~/.toolhub`.
    pub root: Option<PathBuf>,
}

impl StorageConfig {
    pub fn root_dir(&self) -> PathBuf {
        match &self.root {
            Some(root) => expand_home(root),
            None => DataLayout::default_root(),
        }
    }
}

/// Which loader executes backend artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendEngine {
    /// WebAssembly components through Wasmtime.
    #[default]
    Wasm,
    /// JSON stub backends; no real code runs.
    Stub,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: BackendEngine,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: BackendEngine::default(),
            load_timeout_ms: default_load_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

fn default_load_timeout_ms() -> u64 {
    5_000
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_memory_limit_mb() -> usize {
    64
}

impl RuntimeConfig {
    pub fn mount_settings(&self) -> MountSettings {
        MountSettings {
            load_timeout: Duration::from_millis(self.load_timeout_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn wasm_limits(&self) -> WasmLimits {
        WasmLimits {
            inspect_budget: Duration::from_millis(self.load_timeout_ms),
            call_budget: Duration::from_millis(self.call_timeout_ms),
            memory_limit: self.memory_limit_mb * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    /// Scripts loaded before a script-module frontend is evaluated.
    #[serde(default = "default_runtime_scripts")]
    pub runtime_scripts: Vec<String>,
    /// Component export names, in the order they are tried.
    #[serde(default = "default_recognized_exports")]
    pub recognized_exports: Vec<String>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            runtime_scripts: default_runtime_scripts(),
            recognized_exports: default_recognized_exports(),
        }
    }
}

fn default_runtime_scripts() -> Vec<String> {
    vec![
        "https://unpkg.com/react@18/umd/react.production.min.js".into(),
        "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js".into(),
        "https://unpkg.com/@babel/standalone@7/babel.min.js".into(),
    ]
}
fn default_recognized_exports() -> Vec<String> {
    DEFAULT_RECOGNIZED_EXPORTS.iter().map(|s| s.to_string()).collect()
}

impl HubConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config: an explicit path (which must exist), else
    /// `./toolhub.toml`, else `~/.config/toolhub/toolhub.toml`, else the
    /// built-in defaults. Returns the file that was used, if any.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in candidate_paths() {
            if candidate.exists() {
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("toolhub").join(CONFIG_FILE_NAME));
    }
    paths
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}
