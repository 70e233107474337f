//! Memory Type Definitions
//!
//! Defines the categorized memory records and the recall query/result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{AceflowError, AceflowResult};

/// Memory category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Context,
    Decision,
    Pattern,
    Issue,
    Learning,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 5] = [
        Self::Context,
        Self::Decision,
        Self::Pattern,
        Self::Issue,
        Self::Learning,
    ];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "context" => Some(Self::Context),
            "decision" => Some(Self::Decision),
            "pattern" => Some(Self::Pattern),
            "issue" => Some(Self::Issue),
            "learning" => Some(Self::Learning),
            _ => None,
        }
    }

    /// Parse a caller-supplied category, rejecting unknown names
    pub fn parse(s: &str) -> AceflowResult<Self> {
        Self::from_str(s.trim()).ok_or_else(|| {
            AceflowError::validation(format!(
                "unknown memory category '{}' (expected one of: context, decision, pattern, issue, learning)",
                s
            ))
        })
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Issue => "issue",
            Self::Learning => "learning",
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub category: MemoryCategory,
    pub content: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// `None` when the embedder was unavailable at creation time
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

impl Memory {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    /// Case-insensitive substring match against content and tags.
    /// `needle` must already be lowercase.
    pub(crate) fn matches_keyword(&self, needle: &str) -> bool {
        self.content.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

/// Input for adding a memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: String,
    pub category: MemoryCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Falls back to the configured default importance
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, category: MemoryCategory) -> Self {
        Self {
            content: content.into(),
            category,
            tags: Vec::new(),
            importance: None,
            project_id: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// A request/response exchange to remember
///
/// Category, importance and tags are derived from the text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub input: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl Interaction {
    pub fn new(input: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            response: response.into(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Filters applied before scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallContext {
    /// Keep memories carrying any of these tags
    pub tags: Vec<String>,
    /// Keep memories in any of these categories
    pub categories: Vec<MemoryCategory>,
    /// Keep memories of this project plus unscoped ones
    pub project_id: Option<String>,
}

/// Recall query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallQuery {
    pub query: String,
    #[serde(default)]
    pub context: RecallContext,
    /// Falls back to the configured default
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_relevance: f64,
}

impl RecallQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: RecallContext::default(),
            top_k: None,
            min_relevance: 0.0,
        }
    }

    pub fn with_context(mut self, context: RecallContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = min_relevance;
        self
    }
}

/// How a recalled memory matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Semantic,
    Keyword,
}

/// A recalled memory with its ranking score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub memory: Memory,
    pub score: f64,
    /// Clamped cosine similarity; `None` for keyword matches
    pub similarity: Option<f64>,
    pub match_kind: MatchKind,
}

/// Per-category statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub mean_importance: f64,
}

/// Memory statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: usize,
    pub embedded: usize,
    pub unembedded: usize,
    pub by_category: BTreeMap<String, CategoryStats>,
}

/// Result of a near-duplicate merge pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Memories that absorbed at least one near-duplicate
    pub groups: usize,
    /// Memories deleted after being folded into a survivor
    pub removed: usize,
    /// Ids of the surviving memories that changed
    pub survivors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip() {
        for category in MemoryCategory::ALL {
            assert_eq!(MemoryCategory::from_str(category.as_str()), Some(category));
        }
        assert_eq!(MemoryCategory::from_str("gotcha"), None);
    }

    #[test]
    fn test_parse_rejects_unknown_category() {
        assert_eq!(MemoryCategory::parse(" issue ").unwrap(), MemoryCategory::Issue);
        let err = MemoryCategory::parse("rumor").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);
    }

    #[test]
    fn test_recall_query_defaults_from_json() {
        let query: RecallQuery =
            serde_json::from_value(serde_json::json!({"query": "token"})).unwrap();
        assert_eq!(query.min_relevance, 0.0);
        assert!(query.top_k.is_none());
        assert!(query.context.tags.is_empty());
    }

    #[test]
    fn test_keyword_match_covers_tags() {
        let now = Utc::now();
        let memory = Memory {
            id: "m1".into(),
            project_id: None,
            category: MemoryCategory::Decision,
            content: "Use Postgres".into(),
            content_hash: String::new(),
            tags: BTreeSet::from(["Database".to_string()]),
            embedding: None,
            importance: 0.5,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        };
        assert!(memory.matches_keyword("postgres"));
        assert!(memory.matches_keyword("database"));
        assert!(!memory.matches_keyword("redis"));
    }
}
