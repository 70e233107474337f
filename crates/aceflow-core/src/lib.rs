//! AceFlow Core - Workflow State, Memory and Decision Gates
//!
//! This crate holds everything the AceFlow assistant knows about a project:
//!
//! - **state** - Per-project progress through a workflow mode's stages
//! - **memory** - Categorized long-term memory with similarity recall
//! - **gates** - Weighted decision gates with adaptive thresholds
//! - **flow** - Task classification and parallel work detection
//! - **continuity** - Orchestration of the above for a single request
//! - **api** - JSON request/response contract over the orchestrator
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use aceflow_core::{AceflowConfig, KeywordEmbedder, StateContinuityManager, WorkflowMode};
//!
//! fn example() -> aceflow_core::AceflowResult<()> {
//!     let config = AceflowConfig::new(".aceflow");
//!     let manager = StateContinuityManager::open(&config, Arc::new(KeywordEmbedder::default()))?;
//!
//!     manager.initialize("checkout", WorkflowMode::Standard, BTreeMap::new())?;
//!     let result = manager.advance("checkout", &BTreeMap::new())?;
//!     println!("now at {}", result.current_stage);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod continuity;
pub mod db;
pub mod error;
pub mod flow;
pub mod gates;
pub mod memory;
pub mod retry;
pub mod state;
pub mod utils;

pub use api::{dispatch, dispatch_json, Request, Response};
pub use config::{
    AceflowConfig, ConfigValidationError, FlowConfig, GateTuning, MemoryConfig, PersistenceConfig,
};
pub use continuity::{
    AdvanceResult, ProcessRequest, ProcessResponse, RecommendedAction, StateContinuityManager,
};
pub use error::{AceflowError, AceflowResult, ErrorKind};
pub use flow::{Classification, Complexity, FlowController, TaskContext};
pub use gates::{DecisionGateEvaluator, GateConfig, GateEvaluation, GateOutcome};
#[cfg(feature = "embeddings")]
pub use memory::FastEmbedder;
pub use memory::{
    Embedder, Interaction, KeywordEmbedder, MemoryCategory, MemoryStore, MergeReport, NewMemory,
    RecallQuery,
};
pub use retry::RetryPolicy;
pub use state::{ProjectState, StateStore, WorkflowMode};
