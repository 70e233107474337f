//! Request/Response Contract
//!
//! Every operation takes a structured parameter object and answers with a
//! `{success, result | error: {kind, message}}` envelope. Requests are
//! adjacently tagged:
//!
//! ```json
//! {"operation": "advance", "params": {"project_id": "demo", "signals": {"team_readiness": 0.9}}}
//! ```
//!
//! Operations without parameters (`memory_stats`) omit `params`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::continuity::{ProcessRequest, StateContinuityManager};
use crate::flow::{detect_parallel_opportunities, TaskContext};
use crate::memory::{Interaction, NewMemory, RecallQuery};
use crate::state::{ProjectState, WorkflowMode};
use crate::{AceflowError, AceflowResult, ErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub project_id: String,
    pub mode: WorkflowMode,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceParams {
    pub project_id: String,
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackParams {
    pub project_id: String,
    pub to_stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetParams {
    pub project_id: String,
    #[serde(default)]
    pub mode: Option<WorkflowMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectParams {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreParams {
    pub project_id: String,
    pub snapshot: ProjectState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupParams {
    pub retention_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSimilarParams {
    /// Configured merge threshold when unset
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateParams {
    pub gate_id: String,
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyParams {
    pub task_description: String,
    #[serde(default)]
    pub context: TaskContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectParallelParams {
    pub tasks: Vec<String>,
    /// Task id to the ids it depends on
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// A contract request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum Request {
    Initialize(InitializeParams),
    Advance(AdvanceParams),
    Rollback(RollbackParams),
    Reset(ResetParams),
    GetState(ProjectParams),
    Snapshot(ProjectParams),
    Restore(RestoreParams),
    AddMemory(NewMemory),
    StoreInteraction(Interaction),
    Recall(RecallQuery),
    Cleanup(CleanupParams),
    MergeSimilar(MergeSimilarParams),
    MemoryStats,
    Evaluate(EvaluateParams),
    Classify(ClassifyParams),
    DetectParallel(DetectParallelParams),
    Process(ProcessRequest),
}

impl Request {
    /// Operation name as it appears on the wire
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Advance(_) => "advance",
            Self::Rollback(_) => "rollback",
            Self::Reset(_) => "reset",
            Self::GetState(_) => "get_state",
            Self::Snapshot(_) => "snapshot",
            Self::Restore(_) => "restore",
            Self::AddMemory(_) => "add_memory",
            Self::StoreInteraction(_) => "store_interaction",
            Self::Recall(_) => "recall",
            Self::Cleanup(_) => "cleanup",
            Self::MergeSimilar(_) => "merge_similar",
            Self::MemoryStats => "memory_stats",
            Self::Evaluate(_) => "evaluate",
            Self::Classify(_) => "classify",
            Self::DetectParallel(_) => "detect_parallel",
            Self::Process(_) => "process",
        }
    }
}

/// Error half of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &AceflowError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(ErrorBody {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }
}

/// Run a typed request
pub fn dispatch(manager: &StateContinuityManager, request: Request) -> Response {
    let operation = request.operation();
    match execute(manager, request) {
        Ok(result) => {
            debug!(operation, "Request succeeded");
            Response::ok(result)
        }
        Err(e) => {
            warn!(operation, kind = %e.kind(), "Request failed: {}", e);
            Response::failure(&e)
        }
    }
}

/// Parse and run a JSON request; malformed input yields a ValidationError envelope
pub fn dispatch_json(manager: &StateContinuityManager, raw: &str) -> Response {
    match serde_json::from_str::<Request>(raw) {
        Ok(request) => dispatch(manager, request),
        Err(e) => {
            let error = AceflowError::validation(format!("malformed request: {}", e));
            warn!("Rejected request: {}", error);
            Response::failure(&error)
        }
    }
}

fn execute(manager: &StateContinuityManager, request: Request) -> AceflowResult<Value> {
    let result = match request {
        Request::Initialize(p) => to_value(&manager.initialize(&p.project_id, p.mode, p.metadata)?)?,
        Request::Advance(p) => to_value(&manager.advance(&p.project_id, &p.signals)?)?,
        Request::Rollback(p) => to_value(&manager.rollback(&p.project_id, &p.to_stage)?)?,
        Request::Reset(p) => to_value(&manager.reset(&p.project_id, p.mode)?)?,
        Request::GetState(p) => to_value(&*manager.get(&p.project_id)?)?,
        Request::Snapshot(p) => to_value(&manager.snapshot(&p.project_id)?)?,
        Request::Restore(p) => to_value(&manager.restore(&p.project_id, p.snapshot)?)?,
        Request::AddMemory(memory) => json!({ "memory_id": manager.memory().add_memory(memory)? }),
        Request::StoreInteraction(interaction) => {
            json!({ "memory_id": manager.memory().store_interaction(interaction)? })
        }
        Request::Recall(query) => to_value(&manager.memory().recall(&query)?)?,
        Request::Cleanup(p) => json!({ "removed": manager.memory().cleanup(p.retention_days)? }),
        Request::MergeSimilar(p) => to_value(&manager.memory().merge_similar(p.threshold)?)?,
        Request::MemoryStats => to_value(&manager.memory().stats()?)?,
        Request::Evaluate(p) => to_value(&manager.gates().evaluate(&p.gate_id, &p.signals)?)?,
        Request::Classify(p) => {
            to_value(&manager.flow().classify(&p.task_description, &p.context)?)?
        }
        Request::DetectParallel(p) => {
            json!({ "groups": detect_parallel_opportunities(&p.tasks, &p.dependencies)? })
        }
        Request::Process(p) => to_value(&manager.process(&p)?)?,
    };
    Ok(result)
}

fn to_value<T: Serialize>(value: &T) -> AceflowResult<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AceflowConfig;
    use crate::memory::KeywordEmbedder;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn manager() -> (TempDir, StateContinuityManager) {
        let temp = tempdir().unwrap();
        let config = AceflowConfig::new(temp.path().join("data"));
        let manager =
            StateContinuityManager::open(&config, Arc::new(KeywordEmbedder::default())).unwrap();
        (temp, manager)
    }

    fn call(manager: &StateContinuityManager, request: Value) -> Response {
        dispatch_json(manager, &request.to_string())
    }

    fn error_kind(response: &Response) -> Option<ErrorKind> {
        response.error.as_ref().map(|e| e.kind)
    }

    #[test]
    fn test_malformed_requests_are_validation_errors() {
        let (_temp, manager) = manager();

        let response = dispatch_json(&manager, "{not json");
        assert!(!response.success);
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));

        let response = call(&manager, json!({"operation": "launch", "params": {}}));
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));

        let response = call(
            &manager,
            json!({"operation": "initialize", "params": {"project_id": "demo", "mode": "turbo"}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));
    }

    #[test]
    fn test_state_lifecycle_over_the_contract() {
        let (_temp, manager) = manager();

        let response = call(
            &manager,
            json!({"operation": "initialize", "params": {"project_id": "demo", "mode": "standard"}}),
        );
        assert!(response.success);
        assert_eq!(response.result.as_ref().unwrap()["current_stage"], "P1");

        let response = call(
            &manager,
            json!({"operation": "initialize", "params": {"project_id": "demo", "mode": "minimal"}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ConflictError));

        let response = call(&manager, json!({"operation": "advance", "params": {"project_id": "demo"}}));
        assert_eq!(response.result.as_ref().unwrap()["advanced"], true);

        let snapshot = call(&manager, json!({"operation": "snapshot", "params": {"project_id": "demo"}}))
            .result
            .unwrap();
        let response = call(
            &manager,
            json!({"operation": "restore", "params": {"project_id": "demo", "snapshot": snapshot}}),
        );
        assert!(response.success);

        let response = call(
            &manager,
            json!({"operation": "rollback", "params": {"project_id": "demo", "to_stage": "R1"}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));

        let response = call(&manager, json!({"operation": "get_state", "params": {"project_id": "nope"}}));
        assert_eq!(error_kind(&response), Some(ErrorKind::NotFoundError));
    }

    #[test]
    fn test_memory_operations() {
        let (_temp, manager) = manager();

        let response = call(
            &manager,
            json!({"operation": "add_memory", "params": {
                "content": "Rotate JWT signing keys monthly",
                "category": "decision",
                "tags": ["auth", "jwt"]
            }}),
        );
        assert!(response.success);
        let id = response.result.unwrap()["memory_id"].as_str().unwrap().to_string();

        let response = call(
            &manager,
            json!({"operation": "add_memory", "params": {"content": "x", "category": "rumour"}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));

        let response = call(
            &manager,
            json!({"operation": "recall", "params": {"query": "jwt", "context": {"tags": ["jwt"]}}}),
        );
        let hits = response.result.unwrap();
        assert_eq!(hits[0]["memory"]["id"], id.as_str());

        let response = call(
            &manager,
            json!({"operation": "recall", "params": {"query": "jwt", "min_relevance": 1.5}}),
        );
        assert_eq!(response.result.unwrap(), json!([]));

        let stats = call(&manager, json!({"operation": "memory_stats"})).result.unwrap();
        assert_eq!(stats["total"], 1);

        let response = call(&manager, json!({"operation": "cleanup", "params": {"retention_days": 30}}));
        assert_eq!(response.result.unwrap()["removed"], 0);

        let response = call(
            &manager,
            json!({"operation": "store_interaction", "params": {
                "input": "Which queue should billing use?",
                "response": "We decided on SQS",
                "project_id": "demo"
            }}),
        );
        let id = response.result.unwrap()["memory_id"].as_str().unwrap().to_string();
        assert_eq!(
            manager.memory().get(&id).unwrap().category,
            crate::MemoryCategory::Decision
        );

        let response = call(&manager, json!({"operation": "merge_similar", "params": {}}));
        assert_eq!(response.result.unwrap()["removed"], 0);

        let response = call(
            &manager,
            json!({"operation": "merge_similar", "params": {"threshold": 2.0}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));
    }

    #[test]
    fn test_evaluate_and_classify() {
        let (_temp, manager) = manager();

        let response = call(
            &manager,
            json!({"operation": "evaluate", "params": {"gate_id": "DG9", "signals": {}}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::NotFoundError));

        let response = call(
            &manager,
            json!({"operation": "evaluate", "params": {"gate_id": "DG1", "signals": {"team_readiness": 1.2}}}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));

        let response = call(
            &manager,
            json!({"operation": "classify", "params": {"task_description": "Fix typo in README"}}),
        );
        let result = response.result.unwrap();
        assert_eq!(result["complexity"], "low");
        assert_eq!(result["recommended_mode"], "minimal");
    }

    #[test]
    fn test_detect_parallel_and_process() {
        let (_temp, manager) = manager();

        let response = call(
            &manager,
            json!({"operation": "detect_parallel", "params": {
                "tasks": ["schema", "api", "ui"],
                "dependencies": {"api": ["schema"], "ui": ["schema"]}
            }}),
        );
        assert_eq!(response.result.unwrap()["groups"], json!([["schema"], ["api", "ui"]]));

        let response = call(
            &manager,
            json!({"operation": "detect_parallel", "params": {
                "tasks": ["a", "b"],
                "dependencies": {"a": ["b"], "b": ["a"]}
            }}),
        );
        assert_eq!(error_kind(&response), Some(ErrorKind::ValidationError));

        let response = call(
            &manager,
            json!({"operation": "process", "params": {
                "project_id": "docs",
                "task_description": "Fix typo in README"
            }}),
        );
        let result = response.result.unwrap();
        assert_eq!(result["initialized"], true);
        assert_eq!(result["recommendation"]["action"], "hold");
    }
}
