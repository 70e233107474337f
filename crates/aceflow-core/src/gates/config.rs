//! Decision Gate Configuration
//!
//! Gate definitions load from JSON or YAML and are validated before any
//! evaluator sees them. Without a file the built-in DG1 (readiness before
//! development) and DG2 (quality after development) gates apply.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::state::WorkflowMode;
use crate::{AceflowError, AceflowResult};

/// One weighted criterion of a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionDefinition {
    pub name: String,
    pub weight: f64,
    pub base_threshold: f64,
}

impl CriterionDefinition {
    pub fn new(name: impl Into<String>, weight: f64, base_threshold: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            base_threshold,
        }
    }
}

/// A gate's criteria and optional explicit pass threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub criteria: Vec<CriterionDefinition>,
    /// Gate-level base threshold; the weighted mean of criterion thresholds when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_threshold: Option<f64>,
}

impl GateDefinition {
    /// Base threshold of the whole gate
    pub fn base_threshold(&self) -> f64 {
        if let Some(threshold) = self.pass_threshold {
            return threshold;
        }
        let total_weight: f64 = self.criteria.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        self.criteria
            .iter()
            .map(|c| c.weight * c.base_threshold)
            .sum::<f64>()
            / total_weight
    }
}

/// Complete gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    pub gates: BTreeMap<String, GateDefinition>,
    /// Exit gate of each stage; stages without an entry have no gate
    #[serde(default)]
    pub stage_gates: BTreeMap<String, String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl GateConfig {
    /// Built-in DG1/DG2 gates placed before and after development
    pub fn builtin() -> Self {
        let mut gates = BTreeMap::new();
        gates.insert(
            "DG1".to_string(),
            GateDefinition {
                description: Some("Readiness check before development starts".into()),
                criteria: vec![
                    CriterionDefinition::new("requirements_completeness", 1.0, 0.7),
                    CriterionDefinition::new("design_accuracy", 1.0, 0.7),
                    CriterionDefinition::new("feasibility_assessment", 1.0, 0.7),
                    CriterionDefinition::new("team_readiness", 1.0, 0.7),
                ],
                pass_threshold: Some(0.8),
            },
        );
        gates.insert(
            "DG2".to_string(),
            GateDefinition {
                description: Some("Quality check before development work is accepted".into()),
                criteria: vec![
                    CriterionDefinition::new("completion_quality", 1.0, 0.7),
                    CriterionDefinition::new("deliverable_accuracy", 1.0, 0.7),
                    CriterionDefinition::new("quality_assurance", 1.0, 0.7),
                    CriterionDefinition::new("progress_alignment", 1.0, 0.7),
                ],
                pass_threshold: Some(0.8),
            },
        );

        let stage_gates = [
            ("P", "DG1"),
            ("D", "DG2"),
            ("P2", "DG1"),
            ("D2", "DG2"),
            ("S3", "DG1"),
            ("S4", "DG2"),
        ]
        .into_iter()
        .map(|(stage, gate)| (stage.to_string(), gate.to_string()))
        .collect();

        Self { gates, stage_gates }
    }

    /// Load from a file; `.yaml`/`.yml` parse as YAML, everything else as JSON
    pub fn from_path(path: &Path) -> AceflowResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml");

        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Parse and validate JSON
    pub fn from_json_str(content: &str) -> AceflowResult<Self> {
        let config: GateConfig = serde_json::from_str(content).map_err(|e| {
            AceflowError::validation(format!("invalid gate configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML
    pub fn from_yaml_str(content: &str) -> AceflowResult<Self> {
        let config: GateConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed gate definitions
    pub fn validate(&self) -> AceflowResult<()> {
        if self.gates.is_empty() {
            return Err(AceflowError::validation("gate configuration defines no gates"));
        }

        for (gate_id, gate) in &self.gates {
            if gate_id.trim().is_empty() {
                return Err(AceflowError::validation("gate id cannot be empty"));
            }
            if gate.criteria.is_empty() {
                return Err(AceflowError::validation(format!(
                    "gate '{}' has no criteria",
                    gate_id
                )));
            }

            let mut seen = BTreeSet::new();
            let mut total_weight = 0.0;
            for criterion in &gate.criteria {
                if criterion.name.trim().is_empty() {
                    return Err(AceflowError::validation(format!(
                        "gate '{}' has a criterion without a name",
                        gate_id
                    )));
                }
                if !seen.insert(criterion.name.as_str()) {
                    return Err(AceflowError::validation(format!(
                        "gate '{}' lists criterion '{}' twice",
                        gate_id, criterion.name
                    )));
                }
                if !criterion.weight.is_finite() || criterion.weight < 0.0 {
                    return Err(AceflowError::validation(format!(
                        "gate '{}' criterion '{}' has invalid weight {}",
                        gate_id, criterion.name, criterion.weight
                    )));
                }
                check_threshold(gate_id, &criterion.name, criterion.base_threshold)?;
                total_weight += criterion.weight;
            }

            if total_weight <= 0.0 {
                return Err(AceflowError::validation(format!(
                    "gate '{}' criterion weights sum to zero",
                    gate_id
                )));
            }
            if let Some(threshold) = gate.pass_threshold {
                check_threshold(gate_id, "pass_threshold", threshold)?;
            }
        }

        for (stage, gate_id) in &self.stage_gates {
            if !WorkflowMode::is_known_stage(stage) {
                return Err(AceflowError::validation(format!(
                    "stage_gates references unknown stage '{}'",
                    stage
                )));
            }
            if !self.gates.contains_key(gate_id) {
                return Err(AceflowError::validation(format!(
                    "stage '{}' maps to unknown gate '{}'",
                    stage, gate_id
                )));
            }
        }

        Ok(())
    }
}

fn check_threshold(gate_id: &str, name: &str, value: f64) -> AceflowResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AceflowError::validation(format!(
            "gate '{}' {} threshold {} is outside [0, 1]",
            gate_id, name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_config_is_valid() {
        let config = GateConfig::builtin();
        config.validate().unwrap();
        assert_eq!(config.gates["DG1"].criteria.len(), 4);
        assert_eq!(config.stage_gates["P2"], "DG1");
        assert_eq!(config.gates["DG2"].base_threshold(), 0.8);
    }

    #[test]
    fn test_base_threshold_defaults_to_weighted_mean() {
        let gate = GateDefinition {
            description: None,
            criteria: vec![
                CriterionDefinition::new("a", 3.0, 0.8),
                CriterionDefinition::new("b", 1.0, 0.4),
            ],
            pass_threshold: None,
        };
        assert!((gate.base_threshold() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
gates:
  DG1:
    criteria:
      - name: DG1-criterion
        weight: 1.0
        base_threshold: 0.8
stage_gates:
  P1: DG1
"#;
        let config = GateConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.gates["DG1"].base_threshold(), 0.8);
        assert_eq!(config.stage_gates["P1"], "DG1");
    }

    #[test]
    fn test_from_path_picks_format_by_extension() {
        let temp = tempdir().unwrap();
        let json_path = temp.path().join("gates.json");
        std::fs::write(
            &json_path,
            r#"{"gates": {"QA": {"criteria": [{"name": "coverage", "weight": 1, "base_threshold": 0.6}]}}}"#,
        )
        .unwrap();
        let config = GateConfig::from_path(&json_path).unwrap();
        assert!(config.gates.contains_key("QA"));
        assert!(config.stage_gates.is_empty());

        let yaml_path = temp.path().join("gates.yml");
        std::fs::write(
            &yaml_path,
            "gates:\n  QA:\n    criteria:\n      - {name: coverage, weight: 1, base_threshold: 0.6}\n",
        )
        .unwrap();
        assert_eq!(GateConfig::from_path(&yaml_path).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        let cases = [
            // negative weight
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": -1, "base_threshold": 0.5}]}}}"#,
            // weights sum to zero
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": 0, "base_threshold": 0.5}]}}}"#,
            // threshold out of range
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": 1, "base_threshold": 1.5}]}}}"#,
            // empty criteria
            r#"{"gates": {"G": {"criteria": []}}}"#,
            // duplicate criterion
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": 1, "base_threshold": 0.5}, {"name": "a", "weight": 1, "base_threshold": 0.5}]}}}"#,
            // unknown gate reference
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": 1, "base_threshold": 0.5}]}}, "stage_gates": {"P1": "H"}}"#,
            // unknown stage
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": 1, "base_threshold": 0.5}]}}, "stage_gates": {"Z9": "G"}}"#,
            // pass threshold out of range
            r#"{"gates": {"G": {"criteria": [{"name": "a", "weight": 1, "base_threshold": 0.5}], "pass_threshold": -0.1}}}"#,
        ];

        for case in cases {
            let err = GateConfig::from_json_str(case).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::ValidationError, "{}", case);
        }
    }
}
