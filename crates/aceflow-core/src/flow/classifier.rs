//! Task complexity classification
//!
//! Combines three components into one complexity score in `[0, 1]`:
//!
//! - a keyword heuristic over a fixed lexicon,
//! - the complexity of similar past tasks recalled from memory,
//! - explicit context hints (team size, urgency, a complexity override).
//!
//! Components that have nothing to say are left out and the remaining
//! weights are renormalized.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::FlowConfig;
use crate::memory::embeddings::tokenize;
use crate::memory::{MemoryCategory, MemoryStore, NewMemory, RecallContext, RecallQuery};
use crate::state::WorkflowMode;
use crate::{AceflowError, AceflowResult};

/// Tag carried by every recorded task
pub const TASK_TAG: &str = "task";

const HIGH_KEYWORDS: &[&str] = &[
    "complex", "difficult", "challeng", "architect", "system", "integrat", "performance",
    "security", "algorithm", "distributed", "migrat", "scalab", "concurren",
];
const MEDIUM_KEYWORDS: &[&str] = &[
    "implement", "develop", "feature", "interface", "api", "database", "test", "optimi",
    "refactor", "endpoint",
];
const LOW_KEYWORDS: &[&str] = &[
    "simple", "fix", "update", "config", "document", "doc", "style", "format", "typo",
    "rename", "tweak",
];

const EMERGENCY_KEYWORDS: &[&str] = &["urgent", "emergency", "critical", "asap", "hotfix"];
const HIGH_URGENCY_KEYWORDS: &[&str] = &["important", "priority"];

/// Task complexity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Position on the complexity scale
    pub fn value(&self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 0.5,
            Self::High => 1.0,
        }
    }

    /// Mode for a classification made with enough confidence
    pub fn workflow_mode(&self) -> WorkflowMode {
        match self {
            Self::Low => WorkflowMode::Minimal,
            Self::Medium => WorkflowMode::Standard,
            Self::High => WorkflowMode::Complete,
        }
    }

    fn tag(&self) -> String {
        format!("complexity:{}", self.as_str())
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Urgency of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Normal,
    High,
    Emergency,
}

impl Urgency {
    /// Scan a description for urgency keywords
    pub fn detect(description: &str) -> Self {
        let tokens = tokenize(description);
        let has = |keywords: &[&str]| tokens.iter().any(|t| keywords.contains(&t.as_str()));

        if has(EMERGENCY_KEYWORDS) {
            Self::Emergency
        } else if has(HIGH_URGENCY_KEYWORDS) {
            Self::High
        } else {
            Self::Normal
        }
    }

    /// Urgent work favours lighter workflows
    fn hint(&self) -> Option<f64> {
        match self {
            Self::Normal => None,
            Self::High => Some(0.25),
            Self::Emergency => Some(0.0),
        }
    }
}

/// Explicit hints about the project and task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub team_size: Option<u32>,
    /// Detected from the description when unset
    pub urgency: Option<Urgency>,
    /// Caller's own complexity estimate
    pub complexity: Option<Complexity>,
}

/// Keyword lexicon hits per level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordHits {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl KeywordHits {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Inputs that produced a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationFactors {
    pub keyword_score: f64,
    pub keyword_hits: KeywordHits,
    pub history_score: Option<f64>,
    pub history_matches: usize,
    pub context_score: Option<f64>,
    pub team_size: Option<u32>,
    pub urgency: Urgency,
}

/// Task classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub complexity: Complexity,
    pub score: f64,
    pub confidence: f64,
    pub recommended_mode: WorkflowMode,
    pub rationale: String,
    pub factors: ClassificationFactors,
}

/// Classifies tasks and learns from recorded outcomes
pub struct FlowController {
    memory: Arc<MemoryStore>,
    config: FlowConfig,
}

impl FlowController {
    pub fn new(memory: Arc<MemoryStore>, config: FlowConfig) -> Self {
        Self { memory, config }
    }

    /// Classify a task description
    pub fn classify(&self, description: &str, context: &TaskContext) -> AceflowResult<Classification> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AceflowError::validation("task description cannot be empty"));
        }

        let (keyword_score, keyword_hits) = keyword_component(description);
        let (history_score, history_matches) = self.history_component(description)?;
        let urgency = context.urgency.unwrap_or_else(|| Urgency::detect(description));
        let context_score = context_component(context, urgency);

        let mut weighted = self.config.keyword_weight * keyword_score;
        let mut available_weight = self.config.keyword_weight;
        let mut scores = vec![keyword_score];
        if let Some(score) = history_score {
            weighted += self.config.history_weight * score;
            available_weight += self.config.history_weight;
            scores.push(score);
        }
        if let Some(score) = context_score {
            weighted += self.config.context_weight * score;
            available_weight += self.config.context_weight;
            scores.push(score);
        }

        let score = if available_weight > 0.0 {
            (weighted / available_weight).clamp(0.0, 1.0)
        } else {
            keyword_score
        };

        // Exactly on a cut point takes the higher-structure level
        let complexity = if score < self.config.low_cut {
            Complexity::Low
        } else if score < self.config.high_cut {
            Complexity::Medium
        } else {
            Complexity::High
        };

        let total_weight =
            self.config.keyword_weight + self.config.history_weight + self.config.context_weight;
        let coverage = if total_weight > 0.0 {
            available_weight / total_weight
        } else {
            0.0
        };
        let spread = scores.iter().cloned().fold(f64::MIN, f64::max)
            - scores.iter().cloned().fold(f64::MAX, f64::min);
        let evidence = ((keyword_hits.total() + history_matches) as f64 / 3.0).min(1.0);
        let confidence = (0.3 * coverage + 0.4 * (1.0 - spread) + 0.3 * evidence).clamp(0.0, 1.0);

        let recommended_mode = if confidence < self.config.smart_confidence_floor {
            WorkflowMode::Smart
        } else {
            complexity.workflow_mode()
        };

        let factors = ClassificationFactors {
            keyword_score,
            keyword_hits,
            history_score,
            history_matches,
            context_score,
            team_size: context.team_size,
            urgency,
        };
        let rationale = rationale(complexity, score, confidence, recommended_mode, &factors);
        debug!(%complexity, score, confidence, mode = %recommended_mode, "Classified task");

        Ok(Classification {
            complexity,
            score,
            confidence,
            recommended_mode,
            rationale,
            factors,
        })
    }

    /// Remember a task's complexity so later classifications can learn from it
    pub fn record_task(
        &self,
        description: &str,
        complexity: Complexity,
        project_id: Option<&str>,
    ) -> AceflowResult<String> {
        let mut memory = NewMemory::new(description, MemoryCategory::Context)
            .with_tags([TASK_TAG.to_string(), complexity.tag()]);
        if let Some(project_id) = project_id {
            memory = memory.with_project(project_id);
        }
        self.memory.add_memory(memory)
    }

    /// Similarity-weighted complexity of recorded tasks
    fn history_component(&self, description: &str) -> AceflowResult<(Option<f64>, usize)> {
        if self.config.history_weight <= 0.0 {
            return Ok((None, 0));
        }

        let query = RecallQuery::new(description)
            .with_context(RecallContext {
                tags: vec![TASK_TAG.to_string()],
                categories: vec![MemoryCategory::Context],
                project_id: None,
            })
            .with_top_k(self.config.history_top_k);

        let mut weighted = 0.0;
        let mut total = 0.0;
        let mut matches = 0;
        for hit in self.memory.recall(&query)? {
            let weight = hit.similarity.unwrap_or(hit.score);
            if weight < self.config.history_min_similarity {
                continue;
            }
            let level = hit
                .memory
                .tags
                .iter()
                .find_map(|t| t.strip_prefix("complexity:").and_then(Complexity::from_str));
            if let Some(level) = level {
                weighted += weight * level.value();
                total += weight;
                matches += 1;
            }
        }

        if total > 0.0 {
            Ok((Some(weighted / total), matches))
        } else {
            Ok((None, 0))
        }
    }
}

/// Lexicon score; no hits is neutral
fn keyword_component(description: &str) -> (f64, KeywordHits) {
    let tokens = tokenize(description);
    let count = |keywords: &[&str]| {
        keywords
            .iter()
            .filter(|k| tokens.iter().any(|t| t.starts_with(*k)))
            .count()
    };

    let hits = KeywordHits {
        high: count(HIGH_KEYWORDS),
        medium: count(MEDIUM_KEYWORDS),
        low: count(LOW_KEYWORDS),
    };

    let score = if hits.total() == 0 {
        0.5
    } else {
        (Complexity::High.value() * hits.high as f64
            + Complexity::Medium.value() * hits.medium as f64
            + Complexity::Low.value() * hits.low as f64)
            / hits.total() as f64
    };
    (score, hits)
}

fn context_component(context: &TaskContext, urgency: Urgency) -> Option<f64> {
    let mut hints = Vec::new();
    if let Some(complexity) = context.complexity {
        hints.push(complexity.value());
    }
    if let Some(team_size) = context.team_size {
        hints.push(match team_size {
            0..=2 => 0.0,
            3..=5 => 0.25,
            6..=10 => 0.5,
            _ => 1.0,
        });
    }
    if let Some(hint) = urgency.hint() {
        hints.push(hint);
    }

    if hints.is_empty() {
        None
    } else {
        Some(hints.iter().sum::<f64>() / hints.len() as f64)
    }
}

fn rationale(
    complexity: Complexity,
    score: f64,
    confidence: f64,
    mode: WorkflowMode,
    factors: &ClassificationFactors,
) -> String {
    let mut parts = vec![format!(
        "keywords {:.2} ({} high, {} medium, {} low)",
        factors.keyword_score,
        factors.keyword_hits.high,
        factors.keyword_hits.medium,
        factors.keyword_hits.low
    )];
    if let Some(history) = factors.history_score {
        parts.push(format!(
            "{} similar past task(s) at {:.2}",
            factors.history_matches, history
        ));
    }
    if let Some(context) = factors.context_score {
        parts.push(format!("context hints {:.2}", context));
    }

    let mut text = format!(
        "{} complexity (score {:.2}) from {}; {} mode recommended",
        complexity,
        score,
        parts.join(", "),
        mode
    );
    if mode == WorkflowMode::Smart {
        text.push_str(&format!(" because confidence {:.2} is low", confidence));
    }
    text
}
