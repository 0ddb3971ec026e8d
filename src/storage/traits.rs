//! Storage trait definitions

use crate::consolidation::{RunId, RunRecord};
use crate::graph::{
    ConceptNode, IncidentRelationship, InvalidRelationship, Narrative, NodeId, NodeKind,
    Relationship, RelationshipKey, RelationshipType, UnknownNodeKind, UnknownRelationshipType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(#[from] InvalidRelationship),

    #[error("Corrupt row: {0}")]
    UnknownRelationshipType(#[from] UnknownRelationshipType),

    #[error("Corrupt row: {0}")]
    UnknownNodeKind(#[from] UnknownNodeKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Store lock poisoned: {0}")]
    Lock(String),
}

impl StorageError {
    /// True when the error concerns one item's data rather than the store
    /// itself: the caller may skip that item and carry on.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            StorageError::NodeNotFound(_)
                | StorageError::RelationshipNotFound(_)
                | StorageError::InvalidRelationship(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Typed partial update of a concept node. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub consolidated: Option<bool>,
    pub consolidation_score: Option<u32>,
    pub last_consolidated_at: Option<DateTime<Utc>>,
}

impl NodeFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Mark the node canonical with the given score, stamped at `at`
    pub fn consolidated(mut self, score: u32, at: DateTime<Utc>) -> Self {
        self.consolidated = Some(true);
        self.consolidation_score = Some(score);
        self.last_consolidated_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the present fields to `node`
    pub fn apply_to(&self, node: &mut ConceptNode) {
        if let Some(name) = &self.name {
            node.name = name.clone();
        }
        if let Some(description) = &self.description {
            node.description = description.clone();
        }
        if let Some(embedding) = &self.embedding {
            node.embedding = Some(embedding.clone());
        }
        if let Some(consolidated) = self.consolidated {
            node.consolidated = consolidated;
        }
        if let Some(score) = self.consolidation_score {
            node.consolidation_score = score;
        }
        if let Some(at) = self.last_consolidated_at {
            node.last_consolidated_at = Some(at);
        }
    }
}

/// Which unconsolidated concept nodes the cleanup sweep removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupScope {
    /// Every unconsolidated concept node, embedded or not
    #[default]
    AllUnconsolidated,
    /// Only unconsolidated nodes that carry an embedding
    EmbeddedOnly,
}

/// What happened to an upstream relationship write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// An edge with the same key already existed and was left as is
    Duplicate,
    /// An evidence-bearing edge already existed; the new questions were appended
    EvidenceAppended,
}

/// Rows touched by a consolidation reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetCounts {
    pub nodes: usize,
    pub relationships: usize,
}

/// Result of wiping everything except narratives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanCounts {
    pub nodes_deleted: usize,
    pub relationships_deleted: usize,
    pub narratives_preserved: usize,
}

/// Relationship bookkeeping of one node merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeCounts {
    /// Edges recreated on the canonical node
    pub transferred: usize,
    /// Edges whose questions were folded into an existing canonical edge
    pub evidence_appended: usize,
    /// Edges that could not be carried over, with the reason
    pub dropped: Vec<(RelationshipKey, String)>,
}

/// Consolidation status of one relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipStatusCount {
    pub rel_type: RelationshipType,
    pub consolidated: usize,
    pub unconsolidated: usize,
    pub max_score: u32,
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync): the consolidation
/// engine shares one store across its phases behind an `Arc`.
pub trait GraphStore: Send + Sync {
    // === Narratives ===

    /// Save a narrative (insert or update)
    fn save_narrative(&self, narrative: &Narrative) -> StorageResult<()>;

    fn get_narrative(&self, id: &NodeId) -> StorageResult<Option<Narrative>>;

    fn count_narratives(&self) -> StorageResult<usize>;

    // === Concept nodes ===

    /// Save a concept node (insert or update; insertion order is kept on update)
    fn save_node(&self, node: &ConceptNode) -> StorageResult<()>;

    fn get_node_by_id(&self, id: &NodeId) -> StorageResult<Option<ConceptNode>>;

    /// Embedded nodes of `kind` with the given consolidation status, in insertion order
    fn query_nodes_by_kind_and_status(
        &self,
        kind: NodeKind,
        consolidated: bool,
    ) -> StorageResult<Vec<ConceptNode>>;

    /// Concept nodes that have no embedding yet, in insertion order
    fn list_unembedded_nodes(&self) -> StorageResult<Vec<ConceptNode>>;

    /// Apply a partial update. Returns false if the node does not exist.
    fn set_node_fields(&self, id: &NodeId, fields: &NodeFields) -> StorageResult<bool>;

    /// Delete a node together with every incident relationship, atomically
    fn delete_node_and_incident_edges(&self, id: &NodeId) -> StorageResult<bool>;

    /// Fold `source` into `canonical` atomically: apply `fields` to the
    /// canonical node, carry every edge of the source over to it, then delete
    /// the source with whatever edges remain. An edge between the two nodes
    /// becomes a self-loop on `canonical` when it carries evidence and is
    /// dropped otherwise. Fails with `NodeNotFound`, changing nothing, when
    /// either node is missing.
    fn merge_node(
        &self,
        source: &NodeId,
        canonical: &NodeId,
        fields: &NodeFields,
    ) -> StorageResult<MergeCounts>;

    // === Relationships ===

    /// Upstream write: insert, or reconcile with an existing edge of the same key
    fn add_relationship(&self, relationship: &Relationship) -> StorageResult<AddOutcome>;

    fn get_relationship(&self, key: &RelationshipKey) -> StorageResult<Option<Relationship>>;

    /// Every relationship touching `id`, outgoing first, each in insertion order
    fn find_incident_relationships(&self, id: &NodeId) -> StorageResult<Vec<IncidentRelationship>>;

    /// Insert `relationship` unless an edge with its key exists.
    /// Fails with `NodeNotFound` if either endpoint is missing.
    fn create_relationship_if_absent(&self, relationship: &Relationship) -> StorageResult<bool>;

    /// Create the edge consolidated with score 1, or increment the score of
    /// the existing edge and mark it consolidated. Returns the resulting score.
    fn upsert_scored_relationship(&self, relationship: &Relationship) -> StorageResult<u32>;

    /// Append questions to an evidence-bearing edge. Returns false if absent.
    fn append_evidence(&self, key: &RelationshipKey, questions: &[String]) -> StorageResult<bool>;

    fn mark_relationship_consolidated(&self, key: &RelationshipKey) -> StorageResult<bool>;

    fn delete_relationship(&self, key: &RelationshipKey) -> StorageResult<bool>;

    fn list_distinct_unconsolidated_relationship_types(&self) -> StorageResult<Vec<RelationshipType>>;

    /// Unconsolidated relationships of one type, in insertion order
    fn list_unconsolidated_relationships(
        &self,
        rel_type: RelationshipType,
    ) -> StorageResult<Vec<Relationship>>;

    fn relationship_status(&self) -> StorageResult<Vec<RelationshipStatusCount>>;

    // === Maintenance ===

    /// Delete unconsolidated concept nodes (and their edges). Returns the node count.
    fn sweep_unconsolidated_nodes(&self, scope: CleanupScope) -> StorageResult<usize>;

    /// Return every concept node and relationship to the unconsolidated state
    fn reset_consolidation_state(&self) -> StorageResult<ResetCounts>;

    /// Delete all concept nodes and relationships, keeping narratives
    fn clean_non_narrative_data(&self) -> StorageResult<CleanCounts>;

    // === Consolidation runs ===

    fn save_run(&self, run: &RunRecord) -> StorageResult<()>;

    fn load_run(&self, id: &RunId) -> StorageResult<Option<RunRecord>>;

    /// All runs, most recent first
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
