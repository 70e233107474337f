//! Decision Gates
//!
//! Weighted quality criteria checked before stage transitions, with
//! thresholds that adapt to the observed pass rate.

mod config;
mod evaluator;

pub use config::{CriterionDefinition, GateConfig, GateDefinition};
pub use evaluator::{
    DecisionGateEvaluator, GateEvaluation, GateHistoryEntry, GateOutcome, GateStats,
};
