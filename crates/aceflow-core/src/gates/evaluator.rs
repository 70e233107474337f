//! Decision Gate Evaluator
//!
//! Scores weighted criteria against a gate's adaptive threshold. Every
//! evaluation is appended to the gate's history, and the threshold then
//! drifts towards the target pass rate:
//!
//! `adaptive = clamp(base + learning_rate * (pass_rate - target_pass_rate), 0, 1)`
//!
//! where `pass_rate` counts PASS outcomes over the last `history_window`
//! evaluations.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::config::{GateConfig, GateDefinition};
use crate::config::GateTuning;
use crate::db::Database;
use crate::retry::RetryPolicy;
use crate::utils::now_utc;
use crate::{AceflowError, AceflowResult};

/// Evaluation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Warn,
    Fail,
}

impl GateOutcome {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PASS" => Some(Self::Pass),
            "WARN" => Some(Self::Warn),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one gate evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub gate_id: String,
    pub outcome: GateOutcome,
    pub score: f64,
    /// Adaptive threshold in force when the evaluation ran
    pub threshold_used: f64,
    /// Criteria whose signal fell below their own base threshold
    pub unmet_criteria: Vec<String>,
    pub recommendations: Vec<String>,
    pub risk_factors: Vec<String>,
    pub criterion_scores: BTreeMap<String, f64>,
    pub evaluated_at: DateTime<Utc>,
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub outcome: GateOutcome,
    pub threshold: f64,
}

/// Aggregate statistics for a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    pub gate_id: String,
    pub evaluations: usize,
    pub passes: usize,
    pub warnings: usize,
    pub failures: usize,
    pub base_threshold: f64,
    pub adaptive_threshold: f64,
    /// PASS rate over the recent window
    pub recent_pass_rate: Option<f64>,
}

/// Mutable per-gate state
struct GateState {
    definition: GateDefinition,
    base_threshold: f64,
    adaptive_threshold: f64,
    history: Vec<GateHistoryEntry>,
}

/// Evaluates decision gates and keeps their audit history
pub struct DecisionGateEvaluator {
    gates: BTreeMap<String, Mutex<GateState>>,
    stage_gates: BTreeMap<String, String>,
    tuning: GateTuning,
    db: Option<Arc<Database>>,
    retry: RetryPolicy,
}

impl DecisionGateEvaluator {
    /// Create an evaluator with in-memory history
    pub fn new(config: GateConfig, tuning: GateTuning) -> AceflowResult<Self> {
        config.validate()?;

        let gates = config
            .gates
            .into_iter()
            .map(|(gate_id, definition)| {
                let base_threshold = definition.base_threshold();
                let state = GateState {
                    definition,
                    base_threshold,
                    adaptive_threshold: base_threshold,
                    history: Vec::new(),
                };
                (gate_id, Mutex::new(state))
            })
            .collect();

        Ok(Self {
            gates,
            stage_gates: config.stage_gates,
            tuning,
            db: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Mirror history to SQLite, reloading what is already stored
    pub fn with_database(mut self, db: Arc<Database>) -> AceflowResult<Self> {
        for (gate_id, gate) in &self.gates {
            let history = load_history(&db, gate_id)?;
            if history.is_empty() {
                continue;
            }

            let mut state = gate.lock().map_err(|_| AceflowError::LockPoisoned)?;
            state.history = history;
            state.adaptive_threshold = adapted_threshold(&state, &self.tuning);
            info!(
                gate_id = %gate_id,
                evaluations = state.history.len(),
                adaptive_threshold = state.adaptive_threshold,
                "Restored gate history"
            );
        }

        self.db = Some(db);
        Ok(self)
    }

    /// Override the retry policy for persistence failures
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Configured gate ids
    pub fn gate_ids(&self) -> Vec<String> {
        self.gates.keys().cloned().collect()
    }

    /// Exit gate of a stage, if it has one
    pub fn gate_for_stage(&self, stage: &str) -> Option<&str> {
        self.stage_gates.get(stage).map(String::as_str)
    }

    /// Evaluate a gate against criterion signals in `[0, 1]`
    ///
    /// Missing signals count as 0. Signals for names the gate does not
    /// define are ignored.
    pub fn evaluate(
        &self,
        gate_id: &str,
        signals: &BTreeMap<String, f64>,
    ) -> AceflowResult<GateEvaluation> {
        for (name, value) in signals {
            if !value.is_finite() || !(0.0..=1.0).contains(value) {
                return Err(AceflowError::validation(format!(
                    "signal '{}' must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }

        let mut state = self.gate(gate_id)?;
        let threshold = state.adaptive_threshold;

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut criterion_scores = BTreeMap::new();
        let mut unmet_criteria = Vec::new();
        let mut recommendations = Vec::new();
        let mut risk_factors = Vec::new();

        for criterion in &state.definition.criteria {
            let value = signals.get(&criterion.name).copied().unwrap_or(0.0);
            weighted += criterion.weight * value;
            total_weight += criterion.weight;
            criterion_scores.insert(criterion.name.clone(), value);

            if value < criterion.base_threshold {
                let gap = criterion.base_threshold - value;
                unmet_criteria.push(criterion.name.clone());
                recommendations.push(format!(
                    "Raise {} from {:.2} to at least {:.2}",
                    criterion.name, value, criterion.base_threshold
                ));
                if gap > self.tuning.risk_gap {
                    risk_factors.push(format!(
                        "{} is {:.2} below its threshold",
                        criterion.name, gap
                    ));
                }
            }
        }

        let score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        let outcome = if score >= threshold {
            GateOutcome::Pass
        } else if score >= threshold - self.tuning.warn_margin {
            GateOutcome::Warn
        } else {
            GateOutcome::Fail
        };

        let entry = GateHistoryEntry {
            timestamp: now_utc(),
            score,
            outcome,
            threshold,
        };
        if let Some(ref db) = self.db {
            self.retry
                .run("record_gate_evaluation", || insert_history(db, gate_id, &entry))?;
        }

        let evaluated_at = entry.timestamp;
        state.history.push(entry);
        let adapted = adapted_threshold(&state, &self.tuning);
        if (adapted - state.adaptive_threshold).abs() > f64::EPSILON {
            info!(
                gate_id,
                from = state.adaptive_threshold,
                to = adapted,
                "Adaptive threshold changed"
            );
        }
        state.adaptive_threshold = adapted;

        debug!(gate_id, %outcome, score, threshold, "Evaluated gate");

        Ok(GateEvaluation {
            gate_id: gate_id.to_string(),
            outcome,
            score,
            threshold_used: threshold,
            unmet_criteria,
            recommendations,
            risk_factors,
            criterion_scores,
            evaluated_at,
        })
    }

    /// Full evaluation history of a gate, oldest first
    pub fn history(&self, gate_id: &str) -> AceflowResult<Vec<GateHistoryEntry>> {
        Ok(self.gate(gate_id)?.history.clone())
    }

    /// Current threshold of a gate
    pub fn adaptive_threshold(&self, gate_id: &str) -> AceflowResult<f64> {
        Ok(self.gate(gate_id)?.adaptive_threshold)
    }

    /// Outcome counts and thresholds of a gate
    pub fn gate_stats(&self, gate_id: &str) -> AceflowResult<GateStats> {
        let state = self.gate(gate_id)?;
        let count = |outcome: GateOutcome| state.history.iter().filter(|e| e.outcome == outcome).count();

        Ok(GateStats {
            gate_id: gate_id.to_string(),
            evaluations: state.history.len(),
            passes: count(GateOutcome::Pass),
            warnings: count(GateOutcome::Warn),
            failures: count(GateOutcome::Fail),
            base_threshold: state.base_threshold,
            adaptive_threshold: state.adaptive_threshold,
            recent_pass_rate: recent_pass_rate(&state.history, self.tuning.history_window),
        })
    }

    fn gate(&self, gate_id: &str) -> AceflowResult<MutexGuard<'_, GateState>> {
        self.gates
            .get(gate_id)
            .ok_or_else(|| AceflowError::not_found("Gate", gate_id))?
            .lock()
            .map_err(|_| AceflowError::LockPoisoned)
    }
}

fn recent_pass_rate(history: &[GateHistoryEntry], window: usize) -> Option<f64> {
    let recent = &history[history.len().saturating_sub(window)..];
    if recent.is_empty() {
        return None;
    }
    let passes = recent.iter().filter(|e| e.outcome == GateOutcome::Pass).count();
    Some(passes as f64 / recent.len() as f64)
}

fn adapted_threshold(state: &GateState, tuning: &GateTuning) -> f64 {
    match recent_pass_rate(&state.history, tuning.history_window) {
        Some(rate) => (state.base_threshold
            + tuning.learning_rate * (rate - tuning.target_pass_rate))
            .clamp(0.0, 1.0),
        None => state.base_threshold,
    }
}

fn insert_history(db: &Database, gate_id: &str, entry: &GateHistoryEntry) -> AceflowResult<()> {
    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO gate_evaluations (gate_id, score, outcome, threshold, evaluated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            gate_id,
            entry.score,
            entry.outcome.as_str(),
            entry.threshold,
            entry.timestamp.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn load_history(db: &Database, gate_id: &str) -> AceflowResult<Vec<GateHistoryEntry>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT score, outcome, threshold, evaluated_at FROM gate_evaluations
         WHERE gate_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![gate_id], |row| {
        Ok((
            row.get::<_, f64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut history = Vec::new();
    for row in rows {
        let (score, outcome, threshold, evaluated_at) = row?;
        let outcome = GateOutcome::from_str(&outcome).ok_or_else(|| {
            AceflowError::persistence(format!("invalid stored gate outcome: {}", outcome))
        })?;
        history.push(GateHistoryEntry {
            timestamp: DateTime::from_timestamp_millis(evaluated_at).unwrap_or_default(),
            score,
            outcome,
            threshold,
        });
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::config::CriterionDefinition;

    fn single_criterion_config() -> GateConfig {
        let mut gates = BTreeMap::new();
        gates.insert(
            "DG1".to_string(),
            GateDefinition {
                description: None,
                criteria: vec![CriterionDefinition::new("DG1-criterion", 1.0, 0.8)],
                pass_threshold: None,
            },
        );
        GateConfig {
            gates,
            stage_gates: BTreeMap::new(),
        }
    }

    fn signals(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_warn_within_margin() {
        let evaluator =
            DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default()).unwrap();
        let result = evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", 0.75)]))
            .unwrap();

        assert_eq!(result.outcome, GateOutcome::Warn);
        assert_eq!(result.unmet_criteria, vec!["DG1-criterion".to_string()]);
        assert_eq!(result.threshold_used, 0.8);
        assert_eq!(result.recommendations.len(), 1);
        assert!(result.risk_factors.is_empty());
    }

    #[test]
    fn test_pass_and_fail() {
        let evaluator =
            DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default()).unwrap();

        let pass = evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", 0.95)]))
            .unwrap();
        assert_eq!(pass.outcome, GateOutcome::Pass);
        assert!(pass.unmet_criteria.is_empty());

        let fail = evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", 0.3)]))
            .unwrap();
        assert_eq!(fail.outcome, GateOutcome::Fail);
        assert_eq!(fail.risk_factors.len(), 1);
    }

    #[test]
    fn test_missing_signal_counts_as_zero() {
        let evaluator =
            DecisionGateEvaluator::new(GateConfig::builtin(), GateTuning::default()).unwrap();
        let result = evaluator
            .evaluate(
                "DG2",
                &signals(&[
                    ("completion_quality", 1.0),
                    ("deliverable_accuracy", 1.0),
                    ("quality_assurance", 1.0),
                ]),
            )
            .unwrap();

        assert!((result.score - 0.75).abs() < 1e-9);
        assert_eq!(result.unmet_criteria, vec!["progress_alignment".to_string()]);
        assert_eq!(result.outcome, GateOutcome::Warn);
    }

    #[test]
    fn test_rejects_bad_signals_and_unknown_gate() {
        let evaluator =
            DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default()).unwrap();
        let err = evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", 1.2)]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);

        let err = evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", f64::NAN)]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);

        assert!(evaluator.evaluate("DG9", &BTreeMap::new()).unwrap_err().is_not_found());
        // Rejected calls leave no history
        assert!(evaluator.history("DG1").unwrap().is_empty());
    }

    #[test]
    fn test_history_records_every_outcome() {
        let evaluator =
            DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default()).unwrap();
        for value in [0.9, 0.75, 0.1] {
            evaluator
                .evaluate("DG1", &signals(&[("DG1-criterion", value)]))
                .unwrap();
        }

        let history = evaluator.history("DG1").unwrap();
        let outcomes: Vec<GateOutcome> = history.iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![GateOutcome::Pass, GateOutcome::Warn, GateOutcome::Fail]);

        let stats = evaluator.gate_stats("DG1").unwrap();
        assert_eq!(stats.evaluations, 3);
        assert_eq!((stats.passes, stats.warnings, stats.failures), (1, 1, 1));
    }

    #[test]
    fn test_threshold_adapts_towards_target() {
        let evaluator =
            DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default()).unwrap();

        // All PASS: rate 1.0 -> 0.8 + 0.05 * 0.3
        evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", 1.0)]))
            .unwrap();
        let raised = evaluator.adaptive_threshold("DG1").unwrap();
        assert!((raised - 0.815).abs() < 1e-9);

        // PASS then FAIL: rate 0.5 -> 0.8 - 0.05 * 0.2
        evaluator
            .evaluate("DG1", &signals(&[("DG1-criterion", 0.0)]))
            .unwrap();
        let lowered = evaluator.adaptive_threshold("DG1").unwrap();
        assert!((lowered - 0.79).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_uses_recent_window_and_stays_clamped() {
        let tuning = GateTuning {
            history_window: 2,
            learning_rate: 1.0,
            ..Default::default()
        };
        let mut config = single_criterion_config();
        config.gates.get_mut("DG1").unwrap().pass_threshold = Some(0.95);
        let evaluator = DecisionGateEvaluator::new(config, tuning).unwrap();

        for _ in 0..3 {
            evaluator
                .evaluate("DG1", &signals(&[("DG1-criterion", 1.0)]))
                .unwrap();
        }
        // 0.95 + 1.0 * (1.0 - 0.7) clamps to 1.0
        assert_eq!(evaluator.adaptive_threshold("DG1").unwrap(), 1.0);

        for _ in 0..2 {
            evaluator
                .evaluate("DG1", &signals(&[("DG1-criterion", 0.0)]))
                .unwrap();
        }
        // Window of two FAILs: 0.95 - 0.7
        assert!((evaluator.adaptive_threshold("DG1").unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_history_survives_restart_with_database() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let first = DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default())
            .unwrap()
            .with_database(db.clone())
            .unwrap();
        first
            .evaluate("DG1", &signals(&[("DG1-criterion", 1.0)]))
            .unwrap();
        first
            .evaluate("DG1", &signals(&[("DG1-criterion", 0.5)]))
            .unwrap();

        let second = DecisionGateEvaluator::new(single_criterion_config(), GateTuning::default())
            .unwrap()
            .with_database(db)
            .unwrap();
        let history = second.history("DG1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outcome, GateOutcome::Fail);
        assert_eq!(
            second.adaptive_threshold("DG1").unwrap(),
            first.adaptive_threshold("DG1").unwrap()
        );
    }

    #[test]
    fn test_gate_for_stage() {
        let evaluator =
            DecisionGateEvaluator::new(GateConfig::builtin(), GateTuning::default()).unwrap();
        assert_eq!(evaluator.gate_for_stage("D2"), Some("DG2"));
        assert_eq!(evaluator.gate_for_stage("P1"), None);
        assert_eq!(evaluator.gate_ids(), vec!["DG1".to_string(), "DG2".to_string()]);
    }
}
