//! Flow Control
//!
//! Task classification into workflow modes and detection of work that can
//! run in parallel.

mod classifier;
mod parallel;

pub use classifier::{
    Classification, ClassificationFactors, Complexity, FlowController, KeywordHits, TaskContext,
    Urgency, TASK_TAG,
};
pub use parallel::detect_parallel_opportunities;
