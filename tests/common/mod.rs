//! Shared helpers for the consolidation integration tests
//!
//! Builds small graphs in in-memory stores and wires orchestrators with mock
//! synthesis so full runs are deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockflow::config::ConsolidationConfig;
use stockflow::consolidation::{MockSynthesisProvider, RunId, RunRecord};
use stockflow::storage::{
    AddOutcome, CleanCounts, CleanupScope, MergeCounts, NodeFields, RelationshipStatusCount,
    ResetCounts,
};
use stockflow::{
    ConceptNode, ConsolidationOrchestrator, GraphStore, IncidentRelationship, NameSynthesizer,
    Narrative, NodeId, NodeKind, OpenStore, Relationship, RelationshipKey, RelationshipType,
    SqliteStore, StorageError, StorageResult,
};

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().expect("in-memory store"))
}

/// An unconsolidated, embedded node
pub fn node(kind: NodeKind, id: &str, name: &str, description: &str, embedding: Vec<f32>) -> ConceptNode {
    ConceptNode::new(kind, name, description)
        .with_id(id)
        .with_embedding(embedding)
}

/// A node that already survived an earlier run
pub fn canonical(kind: NodeKind, id: &str, name: &str, embedding: Vec<f32>) -> ConceptNode {
    ConceptNode {
        consolidated: true,
        consolidation_score: 1,
        ..node(kind, id, name, "", embedding)
    }
}

pub fn orchestrator_with(
    store: Arc<dyn GraphStore>,
    provider: MockSynthesisProvider,
) -> ConsolidationOrchestrator {
    let synthesizer = NameSynthesizer::new(store.clone(), Arc::new(provider), Duration::from_secs(5));
    ConsolidationOrchestrator::new(store, &ConsolidationConfig::default(), synthesizer)
        .expect("default config is valid")
}

pub fn orchestrator(store: Arc<dyn GraphStore>) -> ConsolidationOrchestrator {
    orchestrator_with(store, MockSynthesisProvider::failing())
}

pub fn get(store: &dyn GraphStore, id: &str) -> Option<ConceptNode> {
    store.get_node_by_id(&NodeId::from(id)).expect("store read")
}

pub fn unconsolidated_count(store: &dyn GraphStore) -> usize {
    let embedded: usize = NodeKind::ALL
        .iter()
        .map(|kind| {
            store
                .query_nodes_by_kind_and_status(*kind, false)
                .expect("store read")
                .len()
        })
        .sum();
    let unembedded = store
        .list_unembedded_nodes()
        .expect("store read")
        .into_iter()
        .filter(|n| !n.consolidated)
        .count();
    embedded + unembedded
}

/// A SQLite store with switchable faults.
///
/// `broken` fails relationship listing, as if the database went away between
/// the node and edge phases. `merges_broken` fails node merges and
/// `discovery_broken` fails relationship type discovery.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub broken: AtomicBool,
    pub merges_broken: AtomicBool,
    pub discovery_broken: AtomicBool,
}

fn unavailable() -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "database unavailable",
    ))
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().expect("in-memory store"),
            broken: AtomicBool::new(false),
            merges_broken: AtomicBool::new(false),
            discovery_broken: AtomicBool::new(false),
        }
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn set_merges_broken(&self, broken: bool) {
        self.merges_broken.store(broken, Ordering::SeqCst);
    }

    pub fn set_discovery_broken(&self, broken: bool) {
        self.discovery_broken.store(broken, Ordering::SeqCst);
    }
}

impl GraphStore for FlakyStore {
    fn save_narrative(&self, narrative: &Narrative) -> StorageResult<()> {
        self.inner.save_narrative(narrative)
    }
    fn get_narrative(&self, id: &NodeId) -> StorageResult<Option<Narrative>> {
        self.inner.get_narrative(id)
    }
    fn count_narratives(&self) -> StorageResult<usize> {
        self.inner.count_narratives()
    }
    fn save_node(&self, node: &ConceptNode) -> StorageResult<()> {
        self.inner.save_node(node)
    }
    fn get_node_by_id(&self, id: &NodeId) -> StorageResult<Option<ConceptNode>> {
        self.inner.get_node_by_id(id)
    }
    fn query_nodes_by_kind_and_status(
        &self,
        kind: NodeKind,
        consolidated: bool,
    ) -> StorageResult<Vec<ConceptNode>> {
        self.inner.query_nodes_by_kind_and_status(kind, consolidated)
    }
    fn list_unembedded_nodes(&self) -> StorageResult<Vec<ConceptNode>> {
        self.inner.list_unembedded_nodes()
    }
    fn set_node_fields(&self, id: &NodeId, fields: &NodeFields) -> StorageResult<bool> {
        self.inner.set_node_fields(id, fields)
    }
    fn delete_node_and_incident_edges(&self, id: &NodeId) -> StorageResult<bool> {
        self.inner.delete_node_and_incident_edges(id)
    }
    fn merge_node(
        &self,
        source: &NodeId,
        canonical: &NodeId,
        fields: &NodeFields,
    ) -> StorageResult<MergeCounts> {
        if self.merges_broken.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.merge_node(source, canonical, fields)
    }
    fn add_relationship(&self, relationship: &Relationship) -> StorageResult<AddOutcome> {
        self.inner.add_relationship(relationship)
    }
    fn get_relationship(&self, key: &RelationshipKey) -> StorageResult<Option<Relationship>> {
        self.inner.get_relationship(key)
    }
    fn find_incident_relationships(&self, id: &NodeId) -> StorageResult<Vec<IncidentRelationship>> {
        self.inner.find_incident_relationships(id)
    }
    fn create_relationship_if_absent(&self, relationship: &Relationship) -> StorageResult<bool> {
        self.inner.create_relationship_if_absent(relationship)
    }
    fn upsert_scored_relationship(&self, relationship: &Relationship) -> StorageResult<u32> {
        self.inner.upsert_scored_relationship(relationship)
    }
    fn append_evidence(&self, key: &RelationshipKey, questions: &[String]) -> StorageResult<bool> {
        self.inner.append_evidence(key, questions)
    }
    fn mark_relationship_consolidated(&self, key: &RelationshipKey) -> StorageResult<bool> {
        self.inner.mark_relationship_consolidated(key)
    }
    fn delete_relationship(&self, key: &RelationshipKey) -> StorageResult<bool> {
        self.inner.delete_relationship(key)
    }
    fn list_distinct_unconsolidated_relationship_types(&self) -> StorageResult<Vec<RelationshipType>> {
        if self.discovery_broken.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.list_distinct_unconsolidated_relationship_types()
    }
    fn list_unconsolidated_relationships(
        &self,
        rel_type: RelationshipType,
    ) -> StorageResult<Vec<Relationship>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.list_unconsolidated_relationships(rel_type)
    }
    fn relationship_status(&self) -> StorageResult<Vec<RelationshipStatusCount>> {
        self.inner.relationship_status()
    }
    fn sweep_unconsolidated_nodes(&self, scope: CleanupScope) -> StorageResult<usize> {
        self.inner.sweep_unconsolidated_nodes(scope)
    }
    fn reset_consolidation_state(&self) -> StorageResult<ResetCounts> {
        self.inner.reset_consolidation_state()
    }
    fn clean_non_narrative_data(&self) -> StorageResult<CleanCounts> {
        self.inner.clean_non_narrative_data()
    }
    fn save_run(&self, run: &RunRecord) -> StorageResult<()> {
        self.inner.save_run(run)
    }
    fn load_run(&self, id: &RunId) -> StorageResult<Option<RunRecord>> {
        self.inner.load_run(id)
    }
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        self.inner.list_runs()
    }
}
