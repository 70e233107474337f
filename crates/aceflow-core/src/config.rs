//! Core Configuration
//!
//! Every tunable constant of the core lives here as a named, overridable
//! field. Defaults carry the hand-tuned values of the workflow assistant;
//! they are starting points for calibration, not derived quantities.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Core configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AceflowConfig {
    /// Base directory for state files and the memory database
    pub data_dir: PathBuf,

    /// Optional JSON/YAML gate definition file (built-in gates when unset)
    pub gates_path: Option<PathBuf>,

    /// Memory configuration
    pub memory: MemoryConfig,

    /// Decision gate tuning
    pub gates: GateTuning,

    /// Flow controller configuration
    pub flow: FlowConfig,

    /// Persistence configuration
    pub persistence: PersistenceConfig,
}

impl Default for AceflowConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".aceflow"),
            gates_path: None,
            memory: MemoryConfig::default(),
            gates: GateTuning::default(),
            flow: FlowConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Memory retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Recency half-life in days (default: 30)
    pub half_life_days: f64,

    /// Lower clamp for the recency weight (default: 0.1)
    pub min_recency_weight: f64,

    /// Score given to keyword-matched memories without embeddings (default: 0.5)
    pub keyword_fallback_score: f64,

    /// Default number of recall results (default: 10)
    pub default_top_k: usize,

    /// Memories at or above this importance survive cleanup (default: 0.3)
    pub cleanup_importance_floor: f64,

    /// Default importance for new memories (default: 0.5)
    pub default_importance: f64,

    /// Similarity at which memories are merged as near-duplicates (default: 0.8)
    pub merge_similarity_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            min_recency_weight: 0.1,
            keyword_fallback_score: 0.5,
            default_top_k: 10,
            cleanup_importance_floor: 0.3,
            default_importance: 0.5,
            merge_similarity_threshold: 0.8,
        }
    }
}

/// Adaptive threshold tuning shared by all gates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateTuning {
    /// Distance below the threshold that still yields WARN (default: 0.1)
    pub warn_margin: f64,

    /// Learning rate for threshold adjustment (default: 0.05)
    pub learning_rate: f64,

    /// Number of recent evaluations in the pass rate (default: 20)
    pub history_window: usize,

    /// Pass rate the threshold steers towards (default: 0.7)
    pub target_pass_rate: f64,

    /// Gap below a criterion threshold that is reported as a risk (default: 0.2)
    pub risk_gap: f64,
}

impl Default for GateTuning {
    fn default() -> Self {
        Self {
            warn_margin: 0.1,
            learning_rate: 0.05,
            history_window: 20,
            target_pass_rate: 0.7,
            risk_gap: 0.2,
        }
    }
}

/// Flow controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Weight of the lexicon heuristic (default: 0.5)
    pub keyword_weight: f64,

    /// Weight of similar past tasks (default: 0.3)
    pub history_weight: f64,

    /// Weight of explicit context hints (default: 0.2)
    pub context_weight: f64,

    /// Composite scores below this are low complexity (default: 0.35)
    pub low_cut: f64,

    /// Composite scores below this are medium complexity (default: 0.65)
    pub high_cut: f64,

    /// Minimum similarity for a past task to count (default: 0.3)
    pub history_min_similarity: f64,

    /// Number of past tasks consulted (default: 5)
    pub history_top_k: usize,

    /// Below this confidence the adaptive `smart` mode is recommended (default: 0.35)
    pub smart_confidence_floor: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.5,
            history_weight: 0.3,
            context_weight: 0.2,
            low_cut: 0.35,
            high_cut: 0.65,
            history_min_similarity: 0.3,
            history_top_k: 5,
            smart_confidence_floor: 0.35,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Retries after the first failed attempt (default: 3)
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds (default: 50)
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay in milliseconds (default: 1000)
    pub max_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

impl AceflowConfig {
    /// Create a config rooted at the given data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the gate definition file
    pub fn with_gates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.gates_path = Some(path.into());
        self
    }

    /// Set memory configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set gate tuning
    pub fn with_gate_tuning(mut self, gates: GateTuning) -> Self {
        self.gates = gates;
        self
    }

    /// Set flow configuration
    pub fn with_flow(mut self, flow: FlowConfig) -> Self {
        self.flow = flow;
        self
    }

    /// Set persistence configuration
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    /// Directory holding one JSON file per project
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// SQLite database for memories and gate history
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("aceflow.db")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingDataDir);
        }

        let m = &self.memory;
        if !(m.half_life_days.is_finite() && m.half_life_days > 0.0) {
            return Err(invalid("memory.half_life_days", "must be greater than 0"));
        }
        unit_interval("memory.min_recency_weight", m.min_recency_weight)?;
        unit_interval("memory.keyword_fallback_score", m.keyword_fallback_score)?;
        unit_interval("memory.cleanup_importance_floor", m.cleanup_importance_floor)?;
        unit_interval("memory.default_importance", m.default_importance)?;
        unit_interval("memory.merge_similarity_threshold", m.merge_similarity_threshold)?;
        if m.default_top_k == 0 {
            return Err(invalid("memory.default_top_k", "must be greater than 0"));
        }

        let g = &self.gates;
        unit_interval("gates.warn_margin", g.warn_margin)?;
        unit_interval("gates.learning_rate", g.learning_rate)?;
        unit_interval("gates.target_pass_rate", g.target_pass_rate)?;
        unit_interval("gates.risk_gap", g.risk_gap)?;
        if g.history_window == 0 {
            return Err(invalid("gates.history_window", "must be greater than 0"));
        }

        let f = &self.flow;
        for (field, weight) in [
            ("flow.keyword_weight", f.keyword_weight),
            ("flow.history_weight", f.history_weight),
            ("flow.context_weight", f.context_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if f.keyword_weight + f.history_weight + f.context_weight <= 0.0 {
            return Err(invalid("flow", "component weights must not sum to zero"));
        }
        unit_interval("flow.low_cut", f.low_cut)?;
        unit_interval("flow.high_cut", f.high_cut)?;
        if f.low_cut >= f.high_cut {
            return Err(invalid("flow.low_cut", "must be below flow.high_cut"));
        }
        unit_interval("flow.history_min_similarity", f.history_min_similarity)?;
        unit_interval("flow.smart_confidence_floor", f.smart_confidence_floor)?;

        if self.persistence.initial_backoff_ms > self.persistence.max_backoff_ms {
            return Err(invalid(
                "persistence.initial_backoff_ms",
                "must not exceed persistence.max_backoff_ms",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, "must be between 0 and 1"))
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("data_dir is required")]
    MissingDataDir,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AceflowConfig::default();
        assert_eq!(config.memory.half_life_days, 30.0);
        assert_eq!(config.gates.history_window, 20);
        assert_eq!(config.persistence.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AceflowConfig::new("/tmp/aceflow")
            .with_gates_path("/tmp/gates.yaml")
            .with_gate_tuning(GateTuning {
                warn_margin: 0.2,
                ..Default::default()
            });

        assert_eq!(config.data_dir, PathBuf::from("/tmp/aceflow"));
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/aceflow/state"));
        assert_eq!(config.gates_path, Some(PathBuf::from("/tmp/gates.yaml")));
        assert_eq!(config.gates.warn_margin, 0.2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AceflowConfig::default();
        config.memory.half_life_days = 0.0;
        assert!(config.validate().is_err());

        let mut config = AceflowConfig::default();
        config.flow.low_cut = 0.7;
        assert!(config.validate().is_err());

        let mut config = AceflowConfig::default();
        config.gates.learning_rate = 1.5;
        assert!(config.validate().is_err());

        let config = AceflowConfig::new("");
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingDataDir)
        ));
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: AceflowConfig =
            serde_json::from_str(r#"{"memory": {"half_life_days": 7.0}}"#).unwrap();
        assert_eq!(config.memory.half_life_days, 7.0);
        assert_eq!(config.memory.default_top_k, 10);
        assert_eq!(config.gates.target_pass_rate, 0.7);
    }
}
