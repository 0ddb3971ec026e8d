//! Run-level types shared by the consolidation phases

use crate::graph::{NodeId, NodeKind};
use crate::similarity::SimilarityError;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one consolidation run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phases of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FetchNodes,
    MatchNodes,
    SynthesizeNames,
    MergeNodes,
    RewireRelationships,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::FetchNodes,
        Phase::MatchNodes,
        Phase::SynthesizeNames,
        Phase::MergeNodes,
        Phase::RewireRelationships,
        Phase::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FetchNodes => "fetch_nodes",
            Phase::MatchNodes => "match_nodes",
            Phase::SynthesizeNames => "synthesize_names",
            Phase::MergeNodes => "merge_nodes",
            Phase::RewireRelationships => "rewire_relationships",
            Phase::Cleanup => "cleanup",
        }
    }

    /// Phases that only read the store; a run interrupted in one of them
    /// has nothing to resume and starts over.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Phase::FetchNodes | Phase::MatchNodes | Phase::SynthesizeNames
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one unconsolidated node.
///
/// `source_id == canonical_id` is a promotion; anything else merges the
/// source into the canonical node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMatch {
    pub source_id: NodeId,
    pub canonical_id: NodeId,
    pub kind: NodeKind,
    pub similarity_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesized_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesized_description: Option<String>,
}

impl NodeMatch {
    pub fn promotion(id: NodeId, kind: NodeKind) -> Self {
        Self {
            canonical_id: id.clone(),
            source_id: id,
            kind,
            similarity_score: 1.0,
            synthesized_name: None,
            synthesized_description: None,
        }
    }

    pub fn merge(source_id: NodeId, canonical_id: NodeId, kind: NodeKind, score: f32) -> Self {
        Self {
            source_id,
            canonical_id,
            kind,
            similarity_score: score,
            synthesized_name: None,
            synthesized_description: None,
        }
    }

    pub fn is_promotion(&self) -> bool {
        self.source_id == self.canonical_id
    }
}

/// Counters accumulated over a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub matches: usize,
    pub promotions: usize,
    pub already_canonical: usize,
    pub merges: usize,
    pub synthesized: usize,
    pub synthesis_failures: usize,
    pub relationships_flagged: usize,
    pub relationships_rewired: usize,
    pub evidence_appended: usize,
    pub nodes_swept: usize,
}

/// An item a phase skipped, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub phase: Phase,
    pub item: String,
    pub reason: String,
}

/// Persisted state of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Aborted { phase: Phase, error: String },
}

/// Saga record: the persisted match artifact plus progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub completed_phases: Vec<Phase>,
    /// Empty until names have been synthesized
    pub matches: Vec<NodeMatch>,
    pub counts: RunCounts,
    pub skipped: Vec<SkippedItem>,
}

impl RunRecord {
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            started_at: now,
            updated_at: now,
            status: RunStatus::Running,
            completed_phases: Vec::new(),
            matches: Vec::new(),
            counts: RunCounts::default(),
            skipped: Vec::new(),
        }
    }

    pub fn is_complete(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn complete(&mut self, phase: Phase) {
        if !self.is_complete(phase) {
            self.completed_phases.push(phase);
        }
        self.updated_at = Utc::now();
    }

    /// First phase not yet completed, or `None` when the run is done
    pub fn next_phase(&self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| !self.is_complete(*p))
    }

    pub fn skip(&mut self, phase: Phase, item: impl Into<String>, reason: impl std::fmt::Display) {
        self.skipped.push(SkippedItem {
            phase,
            item: item.into(),
            reason: reason.to_string(),
        });
    }
}

/// Final outcome of an invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Aborted { phase: Phase, error: String },
}

/// Summary returned by every run or resume
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub completed_phases: Vec<Phase>,
    pub counts: RunCounts,
    pub skipped: Vec<SkippedItem>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

impl From<&RunRecord> for RunReport {
    fn from(record: &RunRecord) -> Self {
        let outcome = match &record.status {
            RunStatus::Aborted { phase, error } => RunOutcome::Aborted {
                phase: *phase,
                error: error.clone(),
            },
            // A record is only reported once its invocation has returned
            RunStatus::Running | RunStatus::Completed => RunOutcome::Completed,
        };
        Self {
            run_id: record.id.clone(),
            outcome,
            completed_phases: record.completed_phases.clone(),
            counts: record.counts.clone(),
            skipped: record.skipped.clone(),
        }
    }
}

/// Errors raised by the consolidation engine
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error(transparent)]
    Similarity(#[from] SimilarityError),

    #[error("Similarity threshold {0} is outside [-1, 1]")]
    InvalidThreshold(f32),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run {0} has already completed")]
    RunAlreadyCompleted(RunId),
}

impl ConsolidationError {
    /// Data errors affect a single match or relationship; the phase skips
    /// the item and continues. Everything else aborts the phase.
    pub fn is_item_scoped(&self) -> bool {
        match self {
            ConsolidationError::NodeNotFound(_) | ConsolidationError::Similarity(_) => true,
            ConsolidationError::Storage(e) => e.is_data_error(),
            _ => false,
        }
    }
}

pub type ConsolidationResult<T> = Result<T, ConsolidationError>;
