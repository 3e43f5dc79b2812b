/// Configuration module for embedserve.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedder::EmbedderError;
use crate::embedder::download::HF_ENDPOINT;

// ── Default value functions ──────────────────────────────────────────

fn default_bind_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_endpoint() -> String {
    HF_ENDPOINT.to_string()
}

fn default_threads() -> usize {
    4
}

fn default_context_size() -> u32 {
    2048
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Relative model, output and vocabulary paths resolve against this.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub huggingface: HuggingFaceConfig,

    #[serde(default)]
    pub onnx: OnnxConfig,

    #[serde(default)]
    pub gguf: GgufConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HuggingFaceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Used when a preload request carries no `ApiKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OnnxConfig {
    #[serde(default = "default_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_threads")]
    pub inter_threads: usize,

    /// Pad every input to the maximum sequence length (static-shape graphs).
    #[serde(default)]
    pub pad_to_max_length: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GgufConfig {
    #[serde(default)]
    pub gpu_layers: u32,

    #[serde(default = "default_context_size")]
    pub context_size: u32,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            model_dir: default_model_dir(),
            log_level: default_log_level(),
            huggingface: HuggingFaceConfig::default(),
            onnx: OnnxConfig::default(),
            gguf: GgufConfig::default(),
        }
    }
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
        }
    }
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            intra_threads: default_threads(),
            inter_threads: default_threads(),
            pad_to_max_length: false,
        }
    }
}

impl Default for GgufConfig {
    fn default() -> Self {
        Self {
            gpu_layers: 0,
            context_size: default_context_size(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. Invalid JSON is logged and also
    /// yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {}: {e}", path.display());
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.bind_address.trim().is_empty(),
            "bind_address must not be empty"
        );
        anyhow::ensure!(
            self.huggingface.endpoint.starts_with("http://")
                || self.huggingface.endpoint.starts_with("https://"),
            "huggingface.endpoint must be an http(s) URL"
        );
        anyhow::ensure!(
            self.onnx.intra_threads > 0,
            "onnx.intra_threads must be positive"
        );
        anyhow::ensure!(
            self.onnx.inter_threads > 0,
            "onnx.inter_threads must be positive"
        );
        anyhow::ensure!(
            self.gguf.context_size > 0,
            "gguf.context_size must be positive"
        );
        Ok(())
    }

    /// Resolve a caller-supplied path against `model_dir`.
    ///
    /// Only relative paths that stay below `model_dir` are accepted; an
    /// absolute path or a `..` component is a `ModelLoad` error.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, EmbedderError> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(EmbedderError::ModelLoad(format!(
                "{path} escapes the model directory"
            )));
        }
        Ok(self.model_dir.join(relative))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
