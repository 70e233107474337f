//! Categorized Long-Term Memory
//!
//! Memories are short notes (context, decisions, patterns, issues,
//! learnings) stored with an optional embedding and recalled by semantic
//! similarity, weighted by recency and importance. When no embedding is
//! available, recall degrades to keyword matching instead of failing.
//! Raw exchanges can be stored with derived category and importance, and
//! near-duplicates can be merged.

pub mod embeddings;
pub mod interaction;
mod store;
mod types;

pub use embeddings::{cosine_similarity, Embedder, KeywordEmbedder, EMBEDDING_DIMENSIONS};
#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
pub use interaction::{classify_interaction, estimate_importance};
pub use store::{MemoryStore, NEAR_EXACT_EPSILON};
pub use types::{
    CategoryStats, Interaction, MatchKind, Memory, MemoryCategory, MemoryStats, MergeReport,
    NewMemory, RecallContext, RecallHit, RecallQuery,
};
