//! Workflow State
//!
//! Per-project progress through a mode's stage sequence, persisted as one
//! JSON file per project.

mod store;
mod types;

pub use store::{Mutation, StateStore};
pub use types::{
    ProjectState, TransitionEntry, TransitionKind, WorkflowMode, STATE_SCHEMA_VERSION,
};
