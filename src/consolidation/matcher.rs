//! Pairwise similarity matching within a node kind
//!
//! Two modes, picked per kind:
//!
//! - **Bootstrap** (no consolidated node of the kind yet): unconsolidated
//!   nodes are paired among themselves. Each unprocessed node claims at most
//!   one later unprocessed partner and always becomes canonical itself.
//! - **Ongoing**: each unconsolidated node is compared with every
//!   consolidated node of its kind and either merges into the best one or is
//!   promoted.
//!
//! Ties always go to the earliest candidate in input order.

use super::catalog::Partition;
use super::types::{ConsolidationError, NodeMatch};
use crate::graph::ConceptNode;
use crate::similarity::{cosine_similarity, SimilarityError};
use tracing::{debug, warn};

/// A comparison that could not be made
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPair {
    pub left: String,
    pub right: String,
    pub error: SimilarityError,
}

/// Matches for one partition plus the pairs that were skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<NodeMatch>,
    pub skipped: Vec<SkippedPair>,
}

pub struct SimilarityMatcher {
    threshold: f32,
}

impl SimilarityMatcher {
    pub fn new(threshold: f32) -> Result<Self, ConsolidationError> {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ConsolidationError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn match_partition(&self, partition: &Partition) -> MatchResult {
        if partition.is_bootstrap() {
            self.bootstrap(partition)
        } else {
            self.ongoing(partition)
        }
    }

    /// Similarity of one pair, recording the pair as skipped if it cannot be compared
    fn score(&self, a: &ConceptNode, b: &ConceptNode, skipped: &mut Vec<SkippedPair>) -> Option<f32> {
        let (Some(ea), Some(eb)) = (a.embedding.as_deref(), b.embedding.as_deref()) else {
            return None;
        };

        match cosine_similarity(ea, eb) {
            Ok(score) => {
                debug!(left = %a.id, right = %b.id, score, "similarity");
                Some(score)
            }
            Err(error) => {
                warn!(left = %a.id, right = %b.id, %error, "skipping pair");
                skipped.push(SkippedPair {
                    left: a.id.to_string(),
                    right: b.id.to_string(),
                    error,
                });
                None
            }
        }
    }

    fn bootstrap(&self, partition: &Partition) -> MatchResult {
        let nodes = &partition.unconsolidated;
        let mut processed = vec![false; nodes.len()];
        let mut result = MatchResult::default();

        for i in 0..nodes.len() {
            if processed[i] {
                continue;
            }
            processed[i] = true;

            let mut best: Option<(usize, f32)> = None;
            for j in (i + 1)..nodes.len() {
                if processed[j] {
                    continue;
                }
                let Some(score) = self.score(&nodes[i], &nodes[j], &mut result.skipped) else {
                    continue;
                };
                if score >= self.threshold && best.map_or(true, |(_, b)| score > b) {
                    best = Some((j, score));
                }
            }

            if let Some((j, score)) = best {
                processed[j] = true;
                result.matches.push(NodeMatch::merge(
                    nodes[j].id.clone(),
                    nodes[i].id.clone(),
                    partition.kind,
                    score,
                ));
            }
            result
                .matches
                .push(NodeMatch::promotion(nodes[i].id.clone(), partition.kind));
        }

        result
    }

    fn ongoing(&self, partition: &Partition) -> MatchResult {
        let mut result = MatchResult::default();

        for node in &partition.unconsolidated {
            let mut best: Option<(&ConceptNode, f32)> = None;
            for candidate in &partition.consolidated {
                let Some(score) = self.score(node, candidate, &mut result.skipped) else {
                    continue;
                };
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((candidate, score));
                }
            }

            let decision = match best {
                Some((canonical, score)) if score >= self.threshold => NodeMatch::merge(
                    node.id.clone(),
                    canonical.id.clone(),
                    partition.kind,
                    score,
                ),
                _ => NodeMatch::promotion(node.id.clone(), partition.kind),
            };
            result.matches.push(decision);
        }

        result
    }
}
