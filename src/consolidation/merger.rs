//! Node-phase mutations: promotions and merges

use super::types::{ConsolidationError, ConsolidationResult, NodeMatch};
use crate::graph::{ConceptNode, NodeId, RelationshipKey};
use crate::similarity::weighted_average;
use crate::storage::{GraphStore, NodeFields};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a single node-phase step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Promoted,
    /// The node was canonical already and was left untouched
    AlreadyCanonical,
    Merged {
        score: u32,
        transferred: usize,
        evidence_appended: usize,
        /// Edges that did not survive the merge, with the reason
        dropped: Vec<(RelationshipKey, String)>,
    },
}

pub struct StateMerger {
    store: Arc<dyn GraphStore>,
}

impl StateMerger {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Apply one match: promotion or merge
    pub fn apply(&self, m: &NodeMatch) -> ConsolidationResult<NodeOutcome> {
        if m.is_promotion() {
            self.promote(&m.source_id)
        } else {
            self.merge(m)
        }
    }

    /// Mark an unconsolidated node canonical with score exactly 1.
    pub fn promote(&self, id: &NodeId) -> ConsolidationResult<NodeOutcome> {
        let node = self
            .store
            .get_node_by_id(id)?
            .ok_or_else(|| ConsolidationError::NodeNotFound(id.clone()))?;

        if node.consolidated {
            debug!(node = %id, score = node.consolidation_score, "already canonical");
            return Ok(NodeOutcome::AlreadyCanonical);
        }

        self.store
            .set_node_fields(id, &NodeFields::new().consolidated(1, Utc::now()))?;
        debug!(node = %id, "promoted");
        Ok(NodeOutcome::Promoted)
    }

    /// Fold `m.source_id` into `m.canonical_id`, then delete the source.
    pub fn merge(&self, m: &NodeMatch) -> ConsolidationResult<NodeOutcome> {
        let absorbed = self
            .store
            .get_node_by_id(&m.source_id)?
            .ok_or_else(|| ConsolidationError::NodeNotFound(m.source_id.clone()))?;
        let canonical = self
            .store
            .get_node_by_id(&m.canonical_id)?
            .ok_or_else(|| ConsolidationError::NodeNotFound(m.canonical_id.clone()))?;

        let weight = canonical.consolidation_score.max(1);
        let score = weight + 1;

        let mut fields = NodeFields::new().consolidated(score, Utc::now());
        if let Some(embedding) = Self::merged_embedding(&canonical, &absorbed, weight) {
            fields = fields.with_embedding(embedding);
        }
        if let Some(name) = m.synthesized_name.as_deref().filter(|s| !s.is_empty()) {
            fields = fields.with_name(name);
        }
        if let Some(description) = m.synthesized_description.as_deref().filter(|s| !s.is_empty()) {
            fields = fields.with_description(description);
        }
        let counts = self.store.merge_node(&absorbed.id, &canonical.id, &fields)?;
        for (key, reason) in &counts.dropped {
            warn!(relationship = %key, source = %absorbed.id, %reason, "relationship dropped in merge");
        }

        debug!(
            source = %absorbed.id,
            canonical = %canonical.id,
            score,
            transferred = counts.transferred,
            evidence_appended = counts.evidence_appended,
            "merged"
        );
        Ok(NodeOutcome::Merged {
            score,
            transferred: counts.transferred,
            evidence_appended: counts.evidence_appended,
            dropped: counts.dropped,
        })
    }

    /// Weighted mean of the two embeddings; `None` keeps the canonical vector.
    fn merged_embedding(canonical: &ConceptNode, absorbed: &ConceptNode, weight: u32) -> Option<Vec<f32>> {
        let (Some(ec), Some(eu)) = (canonical.embedding.as_deref(), absorbed.embedding.as_deref()) else {
            return None;
        };
        match weighted_average(ec, weight as f32, eu, 1.0) {
            Ok(embedding) => Some(embedding),
            Err(error) => {
                warn!(source = %absorbed.id, canonical = %canonical.id, %error, "keeping canonical embedding");
                None
            }
        }
    }
}
