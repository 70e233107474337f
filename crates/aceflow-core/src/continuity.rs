//! State Continuity Manager
//!
//! Ties the stores, the gate evaluator and the flow controller together.
//! All components are injected; [`StateContinuityManager::open`] wires the
//! default set from an [`AceflowConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AceflowConfig;
use crate::db::Database;
use crate::flow::{Classification, FlowController, TaskContext};
use crate::gates::{DecisionGateEvaluator, GateConfig, GateEvaluation, GateOutcome};
use crate::memory::{
    Embedder, MatchKind, MemoryCategory, MemoryStore, RecallContext, RecallQuery,
};
use crate::retry::RetryPolicy;
use crate::state::{Mutation, ProjectState, StateStore, WorkflowMode, STATE_SCHEMA_VERSION};
use crate::utils::now_utc;
use crate::{AceflowError, AceflowResult};

/// Outcome of an advance attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceResult {
    pub project_id: String,
    pub advanced: bool,
    /// PASS when the stage moved (also for stages without an exit gate),
    /// FAIL otherwise; see `gate` for the raw evaluation
    pub outcome: GateOutcome,
    pub from_stage: String,
    pub current_stage: String,
    pub unmet_criteria: Vec<String>,
    pub gate: Option<GateEvaluation>,
    pub finished: bool,
    pub state: ProjectState,
}

impl AdvanceResult {
    fn new(
        from_stage: String,
        outcome: GateOutcome,
        gate: Option<GateEvaluation>,
        advanced: bool,
        state: ProjectState,
    ) -> Self {
        Self {
            project_id: state.project_id.clone(),
            advanced,
            outcome,
            from_stage,
            current_stage: state.current_stage.clone(),
            unmet_criteria: gate
                .as_ref()
                .map(|g| g.unmet_criteria.clone())
                .unwrap_or_default(),
            gate,
            finished: state.is_finished(),
            state,
        }
    }
}

/// Input of [`StateContinuityManager::process`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub project_id: String,
    pub task_description: String,
    #[serde(default)]
    pub context: TaskContext,
    /// Criterion signals for the current stage's exit gate
    #[serde(default)]
    pub signals: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub auto_advance: bool,
    /// Number of memories to cite (memory default when unset)
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl ProcessRequest {
    pub fn new(project_id: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            task_description: task_description.into(),
            context: TaskContext::default(),
            signals: None,
            auto_advance: false,
            top_k: None,
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_signals(mut self, signals: BTreeMap<String, f64>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }
}

/// Next step suggested to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Advance,
    Hold,
    Remediate,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendedAction,
    pub rationale: String,
    pub confidence: f64,
}

/// A memory cited in a process response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub memory_id: String,
    pub category: MemoryCategory,
    pub content: String,
    pub score: f64,
    pub match_kind: MatchKind,
}

/// Output of [`StateContinuityManager::process`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub recommendation: Recommendation,
    pub classification: Classification,
    pub state: ProjectState,
    pub citations: Vec<Citation>,
    pub gate: Option<GateEvaluation>,
    /// State was created by this request
    pub initialized: bool,
    /// State was advanced by this request
    pub advanced: bool,
}

/// Orchestrates workflow state, memory, gates and classification
pub struct StateContinuityManager {
    memory: Arc<MemoryStore>,
    states: StateStore,
    gates: DecisionGateEvaluator,
    flow: FlowController,
}

impl StateContinuityManager {
    /// Assemble a manager from already-built components
    pub fn new(
        memory: Arc<MemoryStore>,
        states: StateStore,
        gates: DecisionGateEvaluator,
        flow: FlowController,
    ) -> Self {
        Self {
            memory,
            states,
            gates,
            flow,
        }
    }

    /// Open every component under `config.data_dir`
    pub fn open(config: &AceflowConfig, embedder: Arc<dyn Embedder>) -> AceflowResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let db = Arc::new(Database::open(&config.database_path())?);
        let retry = RetryPolicy::from(&config.persistence);

        let gate_config = match &config.gates_path {
            Some(path) => GateConfig::from_path(path)?,
            None => GateConfig::builtin(),
        };
        let gates = DecisionGateEvaluator::new(gate_config, config.gates.clone())?
            .with_database(db.clone())?
            .with_retry_policy(retry.clone());

        let memory = Arc::new(
            MemoryStore::new(db, embedder, config.memory.clone()).with_retry_policy(retry.clone()),
        );
        let states = StateStore::open(config.state_dir(), retry)?;
        let flow = FlowController::new(memory.clone(), config.flow.clone());

        info!(
            data_dir = ?config.data_dir,
            embedder = memory.embedder_name(),
            "Opened AceFlow core"
        );
        Ok(Self::new(memory, states, gates, flow))
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn gates(&self) -> &DecisionGateEvaluator {
        &self.gates
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Workflow state
    // ─────────────────────────────────────────────────────────────────────────────

    /// Create a project's state at the first stage of `mode`
    pub fn initialize(
        &self,
        project_id: &str,
        mode: WorkflowMode,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> AceflowResult<ProjectState> {
        let state = self.states.mutate(project_id, |current| {
            if current.is_some() {
                return Err(AceflowError::conflict(format!(
                    "project '{}' is already initialized",
                    project_id
                )));
            }
            let state = ProjectState::new(project_id, mode, metadata, now_utc());
            Ok(Mutation::commit(state.clone(), state))
        })?;

        info!(project_id, mode = %mode, stage = %state.current_stage, "Initialized project");
        Ok(state)
    }

    /// Evaluate the current stage's exit gate and advance on PASS
    ///
    /// The evaluation runs under the project lock, so concurrent callers
    /// cannot both advance from the same stage.
    pub fn advance(
        &self,
        project_id: &str,
        signals: &BTreeMap<String, f64>,
    ) -> AceflowResult<AdvanceResult> {
        let result = self.states.mutate(project_id, |current| {
            let current = current.ok_or_else(|| AceflowError::not_found("Project", project_id))?;
            let from = current.current_stage.clone();

            if current.is_finished() {
                let state = (*current).clone();
                return Ok(Mutation::unchanged(AdvanceResult::new(
                    from,
                    GateOutcome::Fail,
                    None,
                    false,
                    state,
                )));
            }

            let evaluation = match self.gates.gate_for_stage(&from) {
                Some(gate_id) => Some(self.gates.evaluate(gate_id, signals)?),
                None => None,
            };
            let outcome = evaluation.as_ref().map_or(GateOutcome::Pass, |e| e.outcome);

            // A WARN still blocks; the raw outcome stays on the gate evaluation
            if outcome != GateOutcome::Pass {
                let state = (*current).clone();
                return Ok(Mutation::unchanged(AdvanceResult::new(
                    from,
                    GateOutcome::Fail,
                    evaluation,
                    false,
                    state,
                )));
            }

            let mut next = (*current).clone();
            next.advance(now_utc())?;
            let result = AdvanceResult::new(from, outcome, evaluation, true, next.clone());
            Ok(Mutation::commit(next, result))
        })?;

        if result.advanced {
            info!(
                project_id,
                from = %result.from_stage,
                to = %result.current_stage,
                finished = result.finished,
                "Advanced project"
            );
        } else {
            debug!(project_id, outcome = %result.outcome, "Advance blocked");
        }
        Ok(result)
    }

    /// Return to a completed stage or restart the current one
    pub fn rollback(&self, project_id: &str, to_stage: &str) -> AceflowResult<ProjectState> {
        let state = self.states.mutate(project_id, |current| {
            let current = current.ok_or_else(|| AceflowError::not_found("Project", project_id))?;
            let mut next = (*current).clone();
            next.rollback(to_stage, now_utc())?;
            Ok(Mutation::commit(next.clone(), next))
        })?;

        info!(project_id, stage = %state.current_stage, "Rolled back project");
        Ok(state)
    }

    /// Restart at the first stage, optionally under a new mode
    pub fn reset(&self, project_id: &str, mode: Option<WorkflowMode>) -> AceflowResult<ProjectState> {
        let state = self.states.mutate(project_id, |current| {
            let current = current.ok_or_else(|| AceflowError::not_found("Project", project_id))?;
            let mut next = (*current).clone();
            next.reset(mode, now_utc());
            Ok(Mutation::commit(next.clone(), next))
        })?;

        info!(project_id, mode = %state.mode, "Reset project");
        Ok(state)
    }

    /// Last committed state
    pub fn get(&self, project_id: &str) -> AceflowResult<Arc<ProjectState>> {
        self.states.get(project_id)
    }

    /// Full copy of the committed state
    pub fn snapshot(&self, project_id: &str) -> AceflowResult<ProjectState> {
        Ok((*self.states.get(project_id)?).clone())
    }

    /// Replace a project's state with a validated snapshot
    pub fn restore(&self, project_id: &str, snapshot: ProjectState) -> AceflowResult<ProjectState> {
        if snapshot.project_id != project_id {
            return Err(AceflowError::validation(format!(
                "snapshot belongs to '{}', not '{}'",
                snapshot.project_id, project_id
            )));
        }
        if snapshot.schema_version != STATE_SCHEMA_VERSION {
            return Err(AceflowError::validation(format!(
                "snapshot has unsupported schema version {}",
                snapshot.schema_version
            )));
        }
        snapshot.validate()?;

        let state = self
            .states
            .mutate(project_id, |_| Ok(Mutation::commit(snapshot.clone(), snapshot)))?;

        info!(project_id, stage = %state.current_stage, "Restored project snapshot");
        Ok(state)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Orchestration
    // ─────────────────────────────────────────────────────────────────────────────

    /// Classify a task, sync project state and recommend the next step
    pub fn process(&self, request: &ProcessRequest) -> AceflowResult<ProcessResponse> {
        let project_id = request.project_id.as_str();
        let classification = self
            .flow
            .classify(&request.task_description, &request.context)?;

        let initialized = if self.states.exists(project_id)? {
            false
        } else {
            match self.initialize(project_id, classification.recommended_mode, BTreeMap::new()) {
                Ok(_) => true,
                // Created by a concurrent request
                Err(AceflowError::Conflict { .. }) => false,
                Err(e) => return Err(e),
            }
        };

        let citations = self.cite(request)?;

        let (gate, advanced) = if request.auto_advance {
            let signals = request.signals.clone().unwrap_or_default();
            let result = self.advance(project_id, &signals)?;
            (result.gate, result.advanced)
        } else {
            let state = self.states.get(project_id)?;
            let gate = match (&request.signals, self.gates.gate_for_stage(&state.current_stage)) {
                (Some(signals), Some(gate_id)) if !state.is_finished() => {
                    Some(self.gates.evaluate(gate_id, signals)?)
                }
                _ => None,
            };
            (gate, false)
        };

        self.flow.record_task(
            &request.task_description,
            classification.complexity,
            Some(project_id),
        )?;

        let state = self.snapshot(project_id)?;
        let recommendation = self.recommend(&state, gate.as_ref(), advanced, &classification);
        debug!(project_id, action = ?recommendation.action, "Processed request");

        Ok(ProcessResponse {
            recommendation,
            classification,
            state,
            citations,
            gate,
            initialized,
            advanced,
        })
    }

    fn cite(&self, request: &ProcessRequest) -> AceflowResult<Vec<Citation>> {
        let mut query = RecallQuery::new(request.task_description.as_str()).with_context(
            RecallContext {
                project_id: Some(request.project_id.clone()),
                ..Default::default()
            },
        );
        if let Some(top_k) = request.top_k {
            query = query.with_top_k(top_k);
        }

        Ok(self
            .memory
            .recall(&query)?
            .into_iter()
            .map(|hit| Citation {
                memory_id: hit.memory.id,
                category: hit.memory.category,
                content: hit.memory.content,
                score: hit.score,
                match_kind: hit.match_kind,
            })
            .collect())
    }

    fn recommend(
        &self,
        state: &ProjectState,
        gate: Option<&GateEvaluation>,
        advanced: bool,
        classification: &Classification,
    ) -> Recommendation {
        let stage = state.current_stage.as_str();
        let (action, rationale) = if state.is_finished() {
            (
                RecommendedAction::Complete,
                format!("all stages of the {} workflow are complete", state.mode),
            )
        } else if advanced {
            (
                RecommendedAction::Advance,
                format!("advanced to {}; continue with the new stage", stage),
            )
        } else if let Some(gate) = gate {
            match gate.outcome {
                GateOutcome::Pass => (
                    RecommendedAction::Advance,
                    format!(
                        "{} passed with score {:.2}; {} is ready to advance",
                        gate.gate_id, gate.score, stage
                    ),
                ),
                GateOutcome::Warn => (
                    RecommendedAction::Hold,
                    format!(
                        "{} is close to passing ({:.2} against {:.2}); unmet: {}",
                        gate.gate_id,
                        gate.score,
                        gate.threshold_used,
                        gate.unmet_criteria.join(", ")
                    ),
                ),
                GateOutcome::Fail => (
                    RecommendedAction::Remediate,
                    format!(
                        "{} failed with score {:.2} against {:.2}; address: {}",
                        gate.gate_id,
                        gate.score,
                        gate.threshold_used,
                        gate.unmet_criteria.join(", ")
                    ),
                ),
            }
        } else if let Some(gate_id) = self.gates.gate_for_stage(stage) {
            (
                RecommendedAction::Hold,
                format!("{} has not been evaluated for stage {}; provide signals", gate_id, stage),
            )
        } else {
            (
                RecommendedAction::Advance,
                format!("stage {} has no exit gate", stage),
            )
        };

        Recommendation {
            action,
            rationale,
            confidence: classification.confidence,
        }
    }
}
