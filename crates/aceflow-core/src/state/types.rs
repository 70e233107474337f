//! Workflow State Types
//!
//! A project's progress through a mode's stage sequence. Every mutation goes
//! through the methods here so the strict-prefix invariant holds:
//! `completed_stages` is always `stage_sequence[..index(current_stage)]`,
//! or the whole sequence once the workflow is finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{AceflowError, AceflowResult};

/// Current on-disk state schema
pub const STATE_SCHEMA_VERSION: u32 = 1;

const MINIMAL_STAGES: &[&str] = &["P", "D", "R"];
const STANDARD_STAGES: &[&str] = &["P1", "P2", "D1", "D2", "R1"];
const COMPLETE_STAGES: &[&str] = &["S1", "S2", "S3", "S4", "S5", "S6", "S7", "S8"];

/// Workflow mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    Minimal,
    Standard,
    Complete,
    /// Complete stage sequence, chosen when the classification is uncertain
    Smart,
}

impl WorkflowMode {
    pub const ALL: [WorkflowMode; 4] = [Self::Minimal, Self::Standard, Self::Complete, Self::Smart];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(Self::Minimal),
            "standard" => Some(Self::Standard),
            "complete" => Some(Self::Complete),
            "smart" => Some(Self::Smart),
            _ => None,
        }
    }

    /// Parse a caller-supplied mode, rejecting unknown names
    pub fn parse(s: &str) -> AceflowResult<Self> {
        Self::from_str(s.trim()).ok_or_else(|| {
            AceflowError::validation(format!(
                "unknown workflow mode '{}' (expected one of: minimal, standard, complete, smart)",
                s
            ))
        })
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Complete => "complete",
            Self::Smart => "smart",
        }
    }

    /// Ordered stage template
    pub fn stages(&self) -> &'static [&'static str] {
        match self {
            Self::Minimal => MINIMAL_STAGES,
            Self::Standard => STANDARD_STAGES,
            Self::Complete | Self::Smart => COMPLETE_STAGES,
        }
    }

    /// Whether any mode template contains this stage
    pub fn is_known_stage(stage: &str) -> bool {
        Self::ALL.iter().any(|m| m.stages().contains(&stage))
    }
}

impl std::fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a logged state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Initialize,
    Advance,
    /// Advance out of the terminal stage
    Complete,
    Rollback,
    Reset,
}

/// One entry of the transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub from: Option<String>,
    pub to: String,
    pub kind: TransitionKind,
    pub timestamp: DateTime<Utc>,
}

/// Per-project workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub schema_version: u32,
    pub project_id: String,
    pub mode: WorkflowMode,
    pub stage_sequence: Vec<String>,
    pub current_stage: String,
    pub completed_stages: Vec<String>,
    pub progress_percentage: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub transition_log: Vec<TransitionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectState {
    /// Fresh state at the first stage of `mode`
    pub fn new(
        project_id: impl Into<String>,
        mode: WorkflowMode,
        metadata: BTreeMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let stage_sequence: Vec<String> = mode.stages().iter().map(|s| s.to_string()).collect();
        let current_stage = stage_sequence[0].clone();

        Self {
            schema_version: STATE_SCHEMA_VERSION,
            project_id: project_id.into(),
            mode,
            transition_log: vec![TransitionEntry {
                from: None,
                to: current_stage.clone(),
                kind: TransitionKind::Initialize,
                timestamp: now,
            }],
            stage_sequence,
            current_stage,
            completed_stages: Vec::new(),
            progress_percentage: 0.0,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Every stage completed; `current_stage` stays on the terminal stage
    pub fn is_finished(&self) -> bool {
        self.completed_stages.len() == self.stage_sequence.len()
    }

    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stage_sequence.iter().position(|s| s == stage)
    }

    /// Stage after the current one, `None` at the terminal stage
    pub fn next_stage(&self) -> Option<&str> {
        let index = self.stage_index(&self.current_stage)?;
        self.stage_sequence.get(index + 1).map(String::as_str)
    }

    /// Complete the current stage and move on
    pub fn advance(&mut self, now: DateTime<Utc>) -> AceflowResult<()> {
        if self.is_finished() {
            return Err(AceflowError::validation(format!(
                "workflow for project '{}' is already complete",
                self.project_id
            )));
        }

        let from = self.current_stage.clone();
        self.completed_stages.push(from.clone());

        let kind = match self.next_stage().map(str::to_string) {
            Some(next) => {
                self.current_stage = next;
                TransitionKind::Advance
            }
            None => TransitionKind::Complete,
        };

        self.log(Some(from), kind, now);
        Ok(())
    }

    /// Return to a completed stage (or restart the current one)
    pub fn rollback(&mut self, to_stage: &str, now: DateTime<Utc>) -> AceflowResult<()> {
        let index = self.stage_index(to_stage).ok_or_else(|| {
            AceflowError::validation(format!(
                "stage '{}' is not part of the {} workflow",
                to_stage, self.mode
            ))
        })?;

        if to_stage != self.current_stage && !self.completed_stages.iter().any(|s| s == to_stage) {
            return Err(AceflowError::validation(format!(
                "cannot roll back to '{}': stage has not been reached",
                to_stage
            )));
        }

        let from = self.current_stage.clone();
        self.current_stage = to_stage.to_string();
        self.completed_stages = self.stage_sequence[..index].to_vec();
        self.log(Some(from), TransitionKind::Rollback, now);
        Ok(())
    }

    /// Restart at the first stage, optionally switching mode.
    /// Metadata, creation time and the transition log are kept.
    pub fn reset(&mut self, mode: Option<WorkflowMode>, now: DateTime<Utc>) {
        let mode = mode.unwrap_or(self.mode);
        let from = self.current_stage.clone();

        self.mode = mode;
        self.stage_sequence = mode.stages().iter().map(|s| s.to_string()).collect();
        self.current_stage = self.stage_sequence[0].clone();
        self.completed_stages.clear();
        self.log(Some(from), TransitionKind::Reset, now);
    }

    /// Check every structural invariant
    pub fn validate(&self) -> AceflowResult<()> {
        if self.schema_version != STATE_SCHEMA_VERSION {
            return Err(AceflowError::validation(format!(
                "unsupported state schema version {} (expected {})",
                self.schema_version, STATE_SCHEMA_VERSION
            )));
        }

        let template = self.mode.stages();
        if self.stage_sequence.len() != template.len()
            || self.stage_sequence.iter().zip(template).any(|(a, b)| a != b)
        {
            return Err(AceflowError::validation(format!(
                "stage sequence does not match the {} template",
                self.mode
            )));
        }

        let index = self.stage_index(&self.current_stage).ok_or_else(|| {
            AceflowError::validation(format!(
                "current stage '{}' is not in the stage sequence",
                self.current_stage
            ))
        })?;

        let in_progress = self.completed_stages.as_slice() == &self.stage_sequence[..index];
        let finished = self.is_finished()
            && self.completed_stages == self.stage_sequence
            && index == self.stage_sequence.len() - 1;
        if !in_progress && !finished {
            return Err(AceflowError::validation(
                "completed stages are not a gap-free prefix of the stage sequence",
            ));
        }

        if (self.progress_percentage - self.expected_progress()).abs() > 1e-6 {
            return Err(AceflowError::validation(format!(
                "progress {} does not match {} of {} completed stages",
                self.progress_percentage,
                self.completed_stages.len(),
                self.stage_sequence.len()
            )));
        }

        Ok(())
    }

    /// Completed share of the stage sequence, in `[0, 1]`
    fn expected_progress(&self) -> f64 {
        self.completed_stages.len() as f64 / self.stage_sequence.len() as f64
    }

    fn log(&mut self, from: Option<String>, kind: TransitionKind, now: DateTime<Utc>) {
        self.progress_percentage = self.expected_progress();
        self.updated_at = now;
        self.transition_log.push(TransitionEntry {
            from,
            to: self.current_stage.clone(),
            kind,
            timestamp: now,
        });
    }
}
