//! Command execution.
//!
//! Each command produces a response envelope; `main` prints it and maps
//! `success` onto the exit code.

use aceflow_core::{
    AceflowError, Embedder, GateConfig, KeywordEmbedder, Response, StateContinuityManager,
    dispatch_json,
};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, EmbedderKind};

/// Run one contract operation with an optional JSON parameter object
pub fn call(manager: &StateContinuityManager, operation: &str, params: Option<&str>) -> Result<Response> {
    let mut request = json!({ "operation": operation });
    if let Some(params) = params {
        let raw = if params == "-" {
            read_stdin()?
        } else {
            params.to_string()
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => request["params"] = value,
            Err(e) => {
                let error = AceflowError::validation(format!("params are not valid JSON: {}", e));
                return Ok(Response::failure(&error));
            }
        }
    }

    Ok(dispatch_json(manager, &request.to_string()))
}

/// Run a complete request read from a file or stdin
pub fn request(manager: &StateContinuityManager, file: Option<&Path>) -> Result<Response> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {}", path.display()))?,
        None => read_stdin()?,
    };
    Ok(dispatch_json(manager, &raw))
}

/// Load and validate a gate definition file
pub fn validate_gates(path: &Path) -> Response {
    match GateConfig::from_path(path) {
        Ok(config) => {
            let gates: Vec<_> = config
                .gates
                .iter()
                .map(|(id, gate)| json!({
                    "gate_id": id,
                    "criteria": gate.criteria.len(),
                    "base_threshold": gate.base_threshold(),
                }))
                .collect();
            Response::ok(json!({ "gates": gates, "stage_gates": config.stage_gates }))
        }
        Err(e) => Response::failure(&e),
    }
}

/// Open the core with the configured embedder
pub fn open_manager(config: &Config, data_dir: Option<std::path::PathBuf>) -> Result<StateContinuityManager> {
    let core = config.core(data_dir);
    let embedder = build_embedder(config.embedder)?;
    info!(data_dir = ?core.data_dir, embedder = embedder.name(), "Opening AceFlow data");

    StateContinuityManager::open(&core, embedder)
        .with_context(|| format!("Failed to open AceFlow data in {}", core.data_dir.display()))
}

fn build_embedder(kind: EmbedderKind) -> Result<Arc<dyn Embedder>> {
    match kind {
        EmbedderKind::Keyword => Ok(Arc::new(KeywordEmbedder::default())),
        #[cfg(feature = "embeddings")]
        EmbedderKind::Fastembed => {
            let embedder = aceflow_core::FastEmbedder::new().context("Failed to load embedding model")?;
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "embeddings"))]
        EmbedderKind::Fastembed => {
            anyhow::bail!("embedder = \"fastembed\" needs a build with the `embeddings` feature")
        }
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read stdin")?;
    Ok(buffer)
}
