//! Edge phase: point relationships at canonical nodes

use super::types::{ConsolidationResult, NodeMatch};
use crate::graph::{NodeId, Relationship, RelationshipType, RewirePolicy};
use crate::storage::GraphStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source id → canonical id, built from a run's matches
pub type CanonicalMap = HashMap<NodeId, NodeId>;

pub fn canonical_map(matches: &[NodeMatch]) -> CanonicalMap {
    matches
        .iter()
        .map(|m| (m.source_id.clone(), m.canonical_id.clone()))
        .collect()
}

/// What happened to a single relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewireOutcome {
    /// Marked consolidated in place
    Flagged,
    /// Created or counted at the canonical endpoints
    Rewired,
    /// Questions folded into the canonical edge's evidence
    EvidenceAppended,
    /// Already handled earlier in this pass
    AlreadyHandled,
    /// Both endpoints folded into the same node and the edge carried no
    /// evidence; it was dropped
    CollapsedToSelfLoop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewireStats {
    pub flagged: usize,
    pub rewired: usize,
    pub evidence_appended: usize,
    /// (relationship, reason)
    pub skipped: Vec<(String, String)>,
}

pub struct RelationshipRewirer {
    store: Arc<dyn GraphStore>,
    fallback_types: Vec<RelationshipType>,
}

impl RelationshipRewirer {
    pub fn new(store: Arc<dyn GraphStore>, fallback_types: Vec<RelationshipType>) -> Self {
        Self {
            store,
            fallback_types,
        }
    }

    /// Relationship types with unconsolidated edges, or the fallback list
    /// when the store cannot say.
    fn discover_types(&self) -> Vec<RelationshipType> {
        match self.store.list_distinct_unconsolidated_relationship_types() {
            Ok(types) => types,
            Err(error) => {
                warn!(%error, fallback = ?self.fallback_types, "type discovery failed, using fallback list");
                self.fallback_types.clone()
            }
        }
    }

    /// Rewire every unconsolidated relationship. Store failures abort; data
    /// errors skip the relationship.
    pub fn rewire_all(&self, canonical: &CanonicalMap) -> ConsolidationResult<RewireStats> {
        let mut stats = RewireStats::default();

        for rel_type in self.discover_types() {
            let relationships = self.store.list_unconsolidated_relationships(rel_type)?;
            debug!(rel_type = %rel_type, count = relationships.len(), "rewiring");

            for rel in relationships {
                match self.rewire_one(&rel, canonical) {
                    Ok(RewireOutcome::Flagged) => stats.flagged += 1,
                    Ok(RewireOutcome::Rewired) => stats.rewired += 1,
                    Ok(RewireOutcome::EvidenceAppended) => stats.evidence_appended += 1,
                    Ok(RewireOutcome::AlreadyHandled) => {}
                    Ok(RewireOutcome::CollapsedToSelfLoop) => {
                        warn!(relationship = %rel.key(), "endpoints merged into one node, dropping relationship");
                        stats
                            .skipped
                            .push((rel.key().to_string(), "endpoints merged into one node".to_string()));
                    }
                    Err(e) if e.is_item_scoped() => {
                        warn!(relationship = %rel.key(), error = %e, "skipping relationship");
                        stats.skipped.push((rel.key().to_string(), e.to_string()));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            flagged = stats.flagged,
            rewired = stats.rewired,
            evidence_appended = stats.evidence_appended,
            skipped = stats.skipped.len(),
            "relationships rewired"
        );
        Ok(stats)
    }

    pub fn rewire_one(&self, rel: &Relationship, canonical: &CanonicalMap) -> ConsolidationResult<RewireOutcome> {
        // The listing is a snapshot; earlier steps may have consumed this edge
        let Some(current) = self.store.get_relationship(&rel.key())? else {
            return Ok(RewireOutcome::AlreadyHandled);
        };
        if current.consolidated {
            return Ok(RewireOutcome::AlreadyHandled);
        }

        let mapped = canonical.contains_key(&current.from) || canonical.contains_key(&current.to);
        if !mapped {
            self.store.mark_relationship_consolidated(&current.key())?;
            return Ok(RewireOutcome::Flagged);
        }

        let from = canonical.get(&current.from).unwrap_or(&current.from).clone();
        let to = canonical.get(&current.to).unwrap_or(&current.to).clone();
        let moved = from != current.from || to != current.to;

        // Questions survive as a self-loop on the canonical node
        if moved && from == to && !current.rel_type.is_evidence_bearing() {
            self.store.delete_relationship(&current.key())?;
            return Ok(RewireOutcome::CollapsedToSelfLoop);
        }

        let target = current.with_endpoints(from, to);
        let outcome = match current.rel_type.policy() {
            RewirePolicy::Scored => {
                // An edge already sitting at the target counts once on its own
                if moved {
                    if let Some(existing) = self.store.get_relationship(&target.key())? {
                        if !existing.consolidated {
                            self.store.upsert_scored_relationship(&existing)?;
                        }
                    }
                }
                let score = self.store.upsert_scored_relationship(&target)?;
                debug!(relationship = %target.key(), score, "scored");
                RewireOutcome::Rewired
            }
            RewirePolicy::EvidenceBearing if !moved => {
                self.store.mark_relationship_consolidated(&current.key())?;
                RewireOutcome::Flagged
            }
            RewirePolicy::EvidenceBearing => {
                if self.store.append_evidence(&target.key(), current.evidence())? {
                    RewireOutcome::EvidenceAppended
                } else {
                    let created = Relationship {
                        consolidated: true,
                        consolidation_score: 1,
                        ..target
                    };
                    self.store.create_relationship_if_absent(&created)?;
                    RewireOutcome::Rewired
                }
            }
        };

        if moved {
            self.store.delete_relationship(&current.key())?;
        }
        Ok(outcome)
    }
}
