//! Read-only inspection of the graph
//!
//! Nothing here writes to the store. The synthesis preview does call the
//! provider, but its answer is only reported.

use crate::consolidation::{
    build_prompt, NameSynthesizer, SynthesisRequest, SynthesisResponse,
};
use crate::graph::{ConceptNode, NodeId, NodeKind, RelationshipType};
use crate::similarity::{cosine_similarity, SimilarityError};
use crate::storage::{GraphStore, RelationshipStatusCount, StorageError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("Node {0} has no embedding")]
    NotEmbedded(NodeId),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

pub type DiagnosticsResult<T> = Result<T, DiagnosticsError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
    pub description: String,
    pub kind: NodeKind,
    pub consolidated: bool,
    pub consolidation_score: u32,
    pub embedding_len: usize,
}

impl From<&ConceptNode> for NodeSummary {
    fn from(node: &ConceptNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            kind: node.kind,
            consolidated: node.consolidated,
            consolidation_score: node.consolidation_score,
            embedding_len: node.embedding.as_ref().map_or(0, Vec::len),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityReport {
    pub a: NodeSummary,
    pub b: NodeSummary,
    pub similarity: f32,
    pub threshold: f32,
    /// Whether a run would merge these two, ignoring kind and ordering
    pub would_merge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRelationships {
    pub id: NodeId,
    pub name: String,
    pub label: &'static str,
    pub relationship_count: usize,
    pub types: Vec<RelationshipType>,
    pub connected: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisPreview {
    pub request: SynthesisRequest,
    pub prompt: String,
    /// The provider's answer, or why there is none
    pub answer: Result<SynthesisResponse, String>,
}

pub struct Diagnostics {
    store: Arc<dyn GraphStore>,
    threshold: f32,
}

impl Diagnostics {
    pub fn new(store: Arc<dyn GraphStore>, threshold: f32) -> Self {
        Self { store, threshold }
    }

    fn node(&self, id: &NodeId) -> DiagnosticsResult<ConceptNode> {
        self.store
            .get_node_by_id(id)?
            .ok_or_else(|| DiagnosticsError::NodeNotFound(id.clone()))
    }

    pub fn similarity_between(&self, a: &NodeId, b: &NodeId) -> DiagnosticsResult<SimilarityReport> {
        let left = self.node(a)?;
        let right = self.node(b)?;
        let left_vec = left
            .embedding
            .as_deref()
            .ok_or_else(|| DiagnosticsError::NotEmbedded(a.clone()))?;
        let right_vec = right
            .embedding
            .as_deref()
            .ok_or_else(|| DiagnosticsError::NotEmbedded(b.clone()))?;

        let similarity = cosine_similarity(left_vec, right_vec)?;
        Ok(SimilarityReport {
            a: NodeSummary::from(&left),
            b: NodeSummary::from(&right),
            similarity,
            threshold: self.threshold,
            would_merge: similarity >= self.threshold,
        })
    }

    pub fn node_relationships(&self, id: &NodeId) -> DiagnosticsResult<NodeRelationships> {
        let node = self.node(id)?;
        let incident = self.store.find_incident_relationships(id)?;

        let mut types = Vec::new();
        let mut connected = Vec::new();
        for rel in &incident {
            if !types.contains(&rel.relationship.rel_type) {
                types.push(rel.relationship.rel_type);
            }
            if !connected.contains(&rel.other) {
                connected.push(rel.other.clone());
            }
        }

        Ok(NodeRelationships {
            id: node.id,
            name: node.name,
            label: node.kind.label(),
            relationship_count: incident.len(),
            types,
            connected,
        })
    }

    pub fn relationship_status(&self) -> DiagnosticsResult<Vec<RelationshipStatusCount>> {
        Ok(self.store.relationship_status()?)
    }

    /// What synthesis would produce if `absorbed` were merged into `canonical`
    pub async fn preview_synthesis(
        &self,
        synthesizer: &NameSynthesizer,
        canonical: &NodeId,
        absorbed: &NodeId,
    ) -> DiagnosticsResult<SynthesisPreview> {
        let request = match synthesizer.request_for(canonical, absorbed)? {
            Some(request) => request,
            None => {
                let missing = if self.store.get_node_by_id(canonical)?.is_none() {
                    canonical
                } else {
                    absorbed
                };
                return Err(DiagnosticsError::NodeNotFound(missing.clone()));
            }
        };

        let answer = synthesizer.call(&request).await.map_err(|e| e.to_string());
        Ok(SynthesisPreview {
            prompt: build_prompt(&request),
            request,
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::MockSynthesisProvider;
    use crate::graph::{Narrative, Relationship};
    use crate::storage::{OpenStore, SqliteStore};
    use std::time::Duration;

    fn setup() -> (Arc<SqliteStore>, Diagnostics) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .save_node(
                &ConceptNode::new(NodeKind::Stock, "Energy Level", "desc A")
                    .with_id("a")
                    .with_embedding(vec![1.0, 0.0]),
            )
            .unwrap();
        store
            .save_node(
                &ConceptNode::new(NodeKind::Stock, "Personal Vigor", "desc B")
                    .with_id("b")
                    .with_embedding(vec![0.75, 0.661]),
            )
            .unwrap();
        store
            .save_node(&ConceptNode::new(NodeKind::Flow, "Rest", "").with_id("f"))
            .unwrap();
        let diagnostics = Diagnostics::new(store.clone(), 0.60);
        (store, diagnostics)
    }

    #[test]
    fn similarity_between_reports_would_merge() {
        let (_store, diagnostics) = setup();
        let report = diagnostics
            .similarity_between(&NodeId::from("a"), &NodeId::from("b"))
            .unwrap();

        assert!((report.similarity - 0.75).abs() < 0.01);
        assert!(report.would_merge);
        assert_eq!(report.a.embedding_len, 2);
        assert_eq!(report.b.name, "Personal Vigor");
    }

    #[test]
    fn similarity_between_requires_embeddings() {
        let (_store, diagnostics) = setup();
        let err = diagnostics
            .similarity_between(&NodeId::from("a"), &NodeId::from("f"))
            .unwrap_err();
        assert!(matches!(err, DiagnosticsError::NotEmbedded(id) if id.as_str() == "f"));

        let err = diagnostics
            .similarity_between(&NodeId::from("a"), &NodeId::from("zzz"))
            .unwrap_err();
        assert!(matches!(err, DiagnosticsError::NodeNotFound(_)));
    }

    #[test]
    fn node_relationships_lists_types_and_neighbours() {
        let (store, diagnostics) = setup();
        store.save_narrative(&Narrative::new("Day", "...").with_id("n1")).unwrap();
        store.add_relationship(&Relationship::changes("f", "a", 1.0)).unwrap();
        store
            .add_relationship(&Relationship::new(RelationshipType::Describes, "n1", "a"))
            .unwrap();
        store
            .add_relationship(&Relationship::causal_link("a", "b", "why?", 0.5))
            .unwrap();

        let rels = diagnostics.node_relationships(&NodeId::from("a")).unwrap();

        assert_eq!(rels.label, "Stock");
        assert_eq!(rels.relationship_count, 3);
        assert_eq!(rels.types.len(), 3);
        assert!(rels.connected.contains(&NodeId::from("n1")));
        assert!(rels.connected.contains(&NodeId::from("b")));
    }

    #[tokio::test]
    async fn preview_synthesis_does_not_mutate() {
        let (store, diagnostics) = setup();
        let synthesizer = NameSynthesizer::new(
            store.clone(),
            Arc::new(MockSynthesisProvider::answering("Vitality", "Capacity to act")),
            Duration::from_secs(5),
        );

        let preview = diagnostics
            .preview_synthesis(&synthesizer, &NodeId::from("a"), &NodeId::from("b"))
            .await
            .unwrap();

        assert!(preview.prompt.contains("Energy Level"));
        assert_eq!(preview.answer.unwrap().name, "Vitality");
        let a = store.get_node_by_id(&NodeId::from("a")).unwrap().unwrap();
        assert_eq!(a.name, "Energy Level");
        assert!(!a.consolidated);
    }

    #[tokio::test]
    async fn preview_with_disabled_synthesis_reports_why() {
        let (store, diagnostics) = setup();
        let preview = diagnostics
            .preview_synthesis(&NameSynthesizer::disabled(store), &NodeId::from("a"), &NodeId::from("b"))
            .await
            .unwrap();
        assert!(preview.answer.is_err());
    }
}
