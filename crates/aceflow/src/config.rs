//! Configuration management for the aceflow CLI.
//!
//! Configuration is loaded with precedence:
//! 1. Command line flags (`--config`, `--data-dir`) and their env vars
//! 2. Config file (`--config`/`ACEFLOW_CONFIG`, else `config.toml` in the
//!    `--data-dir` directory, else in the platform data dir)
//! 3. Default values

use aceflow_core::{AceflowConfig, FlowConfig, GateTuning, MemoryConfig, PersistenceConfig};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which embedder backs memory recall
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Deterministic local keyword hashing
    #[default]
    Keyword,
    /// fastembed model (needs the `embeddings` feature)
    Fastembed,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for aceflow data (platform data dir when unset)
    pub data_dir: Option<PathBuf>,

    /// JSON/YAML decision gate definitions
    pub gates_path: Option<PathBuf>,

    pub embedder: EmbedderKind,

    pub memory: MemoryConfig,
    pub gates: GateTuning,
    pub flow: FlowConfig,
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load from `path`, or from `config.toml` in the data directory
    pub fn load(path: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        match (path, data_dir) {
            (Some(path), _) => Self::load_from(path),
            (None, Some(data_dir)) => Self::load_from(&data_dir.join("config.toml")),
            (None, None) => Self::load_from(&default_data_dir().join("config.toml")),
        }
    }

    /// Load a TOML file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Core configuration, with `data_dir` overriding the file
    pub fn core(&self, data_dir: Option<PathBuf>) -> AceflowConfig {
        let data_dir = data_dir
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(default_data_dir);

        let mut config = AceflowConfig::new(data_dir)
            .with_memory(self.memory.clone())
            .with_gate_tuning(self.gates.clone())
            .with_flow(self.flow.clone())
            .with_persistence(self.persistence.clone());
        if let Some(path) = &self.gates_path {
            config = config.with_gates_path(path);
        }
        config
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "aceflow", "aceflow") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".aceflow")
    }
}
