//! Sequences the consolidation phases into a resumable run

use super::catalog::{NodeCatalog, Partition};
use super::matcher::SimilarityMatcher;
use super::merger::{NodeOutcome, StateMerger};
use super::rewirer::{canonical_map, RelationshipRewirer};
use super::synthesis::NameSynthesizer;
use super::types::{
    ConsolidationError, ConsolidationResult, Phase, RunId, RunRecord, RunReport, RunStatus,
};
use crate::config::ConsolidationConfig;
use crate::storage::{CleanupScope, GraphStore, ResetCounts};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Runs consolidation passes over a store.
///
/// A run moves through `FetchNodes → MatchNodes → SynthesizeNames →
/// MergeNodes → RewireRelationships → Cleanup`. Once names are synthesized
/// the match list is persisted with the run record, and every later phase
/// updates the record, so an aborted run can be resumed from its first
/// incomplete phase without recomputing matches.
pub struct ConsolidationOrchestrator {
    store: Arc<dyn GraphStore>,
    catalog: NodeCatalog,
    matcher: SimilarityMatcher,
    synthesizer: NameSynthesizer,
    merger: StateMerger,
    rewirer: RelationshipRewirer,
    cleanup: CleanupScope,
    run_lock: Mutex<()>,
}

impl ConsolidationOrchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        config: &ConsolidationConfig,
        synthesizer: NameSynthesizer,
    ) -> ConsolidationResult<Self> {
        Ok(Self {
            catalog: NodeCatalog::new(store.clone()),
            matcher: SimilarityMatcher::new(config.similarity_threshold)?,
            synthesizer,
            merger: StateMerger::new(store.clone()),
            rewirer: RelationshipRewirer::new(
                store.clone(),
                config.fallback_relationship_types.clone(),
            ),
            cleanup: config.cleanup,
            run_lock: Mutex::new(()),
            store,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.matcher.threshold()
    }

    /// Start a fresh run
    pub async fn run(&self) -> ConsolidationResult<RunReport> {
        let _guard = self.run_lock.lock().await;

        let record = RunRecord::start();
        self.store.save_run(&record)?;
        info!(run_id = %record.id, "consolidation run started");

        Ok(self.execute(record).await)
    }

    /// Continue a run that stopped before completing every phase
    pub async fn resume(&self, run_id: &RunId) -> ConsolidationResult<RunReport> {
        let _guard = self.run_lock.lock().await;

        let mut record = self
            .store
            .load_run(run_id)?
            .ok_or_else(|| ConsolidationError::RunNotFound(run_id.clone()))?;

        let Some(next) = record.next_phase() else {
            return Err(ConsolidationError::RunAlreadyCompleted(run_id.clone()));
        };
        if record.status == RunStatus::Completed {
            return Err(ConsolidationError::RunAlreadyCompleted(run_id.clone()));
        }

        if next.is_read_only() {
            // Nothing was written yet: start the pipeline over
            record.completed_phases.clear();
            record.matches.clear();
            record.counts = Default::default();
            record.skipped.clear();
        }
        record.status = RunStatus::Running;
        info!(run_id = %record.id, phase = %next, "resuming consolidation run");

        Ok(self.execute(record).await)
    }

    /// Return every concept node and relationship to the unconsolidated state
    pub fn reset(&self) -> ConsolidationResult<ResetCounts> {
        let counts = self.store.reset_consolidation_state()?;
        info!(nodes = counts.nodes, relationships = counts.relationships, "consolidation state reset");
        Ok(counts)
    }

    async fn execute(&self, mut record: RunRecord) -> RunReport {
        let mut partitions: Vec<Partition> = Vec::new();

        while let Some(phase) = record.next_phase() {
            info!(run_id = %record.id, phase = %phase, "phase started");

            let result = match phase {
                Phase::FetchNodes => self
                    .catalog
                    .fetch_all()
                    .map(|fetched| partitions = fetched)
                    .map_err(ConsolidationError::from),
                Phase::MatchNodes => {
                    self.match_nodes(&partitions, &mut record);
                    Ok(())
                }
                Phase::SynthesizeNames => self.synthesize_names(&mut record).await,
                Phase::MergeNodes => self.merge_nodes(&mut record),
                Phase::RewireRelationships => self.rewire_relationships(&mut record),
                Phase::Cleanup => self.sweep(&mut record),
            };

            let result = result.and_then(|()| {
                record.complete(phase);
                self.store.save_run(&record).map_err(|e| {
                    record.completed_phases.retain(|p| *p != phase);
                    ConsolidationError::from(e)
                })
            });

            if let Err(e) = result {
                error!(run_id = %record.id, phase = %phase, error = %e, "phase failed, run aborted");
                record.status = RunStatus::Aborted {
                    phase,
                    error: e.to_string(),
                };
                if let Err(save_error) = self.store.save_run(&record) {
                    warn!(run_id = %record.id, error = %save_error, "could not persist aborted run");
                }
                return RunReport::from(&record);
            }

            info!(run_id = %record.id, phase = %phase, "phase completed");
        }

        record.status = RunStatus::Completed;
        if let Err(e) = self.store.save_run(&record) {
            warn!(run_id = %record.id, error = %e, "could not persist completed run");
        }
        info!(
            run_id = %record.id,
            merges = record.counts.merges,
            promotions = record.counts.promotions,
            swept = record.counts.nodes_swept,
            "consolidation run completed"
        );
        RunReport::from(&record)
    }

    fn match_nodes(&self, partitions: &[Partition], record: &mut RunRecord) {
        record.matches.clear();
        for partition in partitions {
            let result = self.matcher.match_partition(partition);
            for pair in result.skipped {
                record.skip(
                    Phase::MatchNodes,
                    format!("{} ~ {}", pair.left, pair.right),
                    pair.error,
                );
            }
            info!(kind = %partition.kind, matches = result.matches.len(), "matched");
            record.matches.extend(result.matches);
        }
        record.counts.matches = record.matches.len();
    }

    async fn synthesize_names(&self, record: &mut RunRecord) -> ConsolidationResult<()> {
        let stats = self.synthesizer.enrich(&mut record.matches).await?;
        record.counts.synthesized = stats.synthesized;
        record.counts.synthesis_failures = stats.failed;
        for (item, reason) in stats.skipped {
            record.skip(Phase::SynthesizeNames, item, reason);
        }
        Ok(())
    }

    fn merge_nodes(&self, record: &mut RunRecord) -> ConsolidationResult<()> {
        let matches = record.matches.clone();
        for m in &matches {
            match self.merger.apply(m) {
                Ok(NodeOutcome::Promoted) => record.counts.promotions += 1,
                Ok(NodeOutcome::AlreadyCanonical) => record.counts.already_canonical += 1,
                Ok(NodeOutcome::Merged { dropped, .. }) => {
                    record.counts.merges += 1;
                    for (key, reason) in dropped {
                        record.skip(Phase::MergeNodes, key.to_string(), reason);
                    }
                }
                Err(e) if e.is_item_scoped() => {
                    warn!(source = %m.source_id, canonical = %m.canonical_id, error = %e, "skipping match");
                    record.skip(
                        Phase::MergeNodes,
                        format!("{} -> {}", m.source_id, m.canonical_id),
                        e,
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn rewire_relationships(&self, record: &mut RunRecord) -> ConsolidationResult<()> {
        let stats = self.rewirer.rewire_all(&canonical_map(&record.matches))?;
        record.counts.relationships_flagged = stats.flagged;
        record.counts.relationships_rewired = stats.rewired;
        record.counts.evidence_appended = stats.evidence_appended;
        for (item, reason) in stats.skipped {
            record.skip(Phase::RewireRelationships, item, reason);
        }
        Ok(())
    }

    fn sweep(&self, record: &mut RunRecord) -> ConsolidationResult<()> {
        let swept = self.store.sweep_unconsolidated_nodes(self.cleanup)?;
        info!(swept, scope = ?self.cleanup, "cleanup");
        record.counts.nodes_swept = swept;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::synthesis::MockSynthesisProvider;
    use crate::consolidation::RunOutcome;
    use crate::graph::{ConceptNode, NodeId, NodeKind};
    use crate::storage::{OpenStore, SqliteStore};
    use std::time::Duration;

    fn orchestrator(store: Arc<SqliteStore>) -> ConsolidationOrchestrator {
        let synthesizer = NameSynthesizer::new(
            store.clone(),
            Arc::new(MockSynthesisProvider::answering("Vitality", "Capacity to act")),
            Duration::from_secs(5),
        );
        ConsolidationOrchestrator::new(store, &ConsolidationConfig::default(), synthesizer).unwrap()
    }

    fn stock(id: &str, name: &str, embedding: Vec<f32>) -> ConceptNode {
        ConceptNode::new(NodeKind::Stock, name, "").with_id(id).with_embedding(embedding)
    }

    #[tokio::test]
    async fn empty_store_completes_every_phase() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let report = orchestrator(store.clone()).run().await.unwrap();

        assert!(report.is_completed());
        assert_eq!(report.completed_phases, Phase::ALL.to_vec());
        assert_eq!(report.counts.matches, 0);
        assert_eq!(store.list_runs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_persists_matches_with_the_record() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.save_node(&stock("a", "Energy Level", vec![1.0, 0.0])).unwrap();
        store.save_node(&stock("b", "Personal Vigor", vec![0.75, 0.661])).unwrap();

        let report = orchestrator(store.clone()).run().await.unwrap();

        let record = store.load_run(&report.run_id).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.matches.len(), 2);
        assert_eq!(record.matches[0].synthesized_name.as_deref(), Some("Vitality"));
        assert_eq!(report.counts.merges, 1);
        assert_eq!(report.counts.already_canonical, 1);
    }

    #[tokio::test]
    async fn resume_continues_from_first_incomplete_phase() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.save_node(&stock("a", "Energy Level", vec![1.0, 0.0])).unwrap();
        store.save_node(&stock("b", "Personal Vigor", vec![0.75, 0.661])).unwrap();

        // A run that stopped right after synthesis
        let mut record = RunRecord::start();
        record.matches = vec![
            crate::consolidation::NodeMatch::merge("b".into(), "a".into(), NodeKind::Stock, 0.75),
            crate::consolidation::NodeMatch::promotion("a".into(), NodeKind::Stock),
        ];
        for phase in [Phase::FetchNodes, Phase::MatchNodes, Phase::SynthesizeNames] {
            record.complete(phase);
        }
        record.status = RunStatus::Aborted {
            phase: Phase::MergeNodes,
            error: "database is locked".into(),
        };
        store.save_run(&record).unwrap();

        let report = orchestrator(store.clone()).resume(&record.id).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.counts.merges, 1);
        let canonical = store.get_node_by_id(&NodeId::from("a")).unwrap().unwrap();
        assert_eq!(canonical.consolidation_score, 2);
        // Persisted matches carried no synthesized text
        assert_eq!(canonical.name, "Energy Level");
    }

    #[tokio::test]
    async fn resume_rejects_unknown_and_completed_runs() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let orchestrator = orchestrator(store.clone());

        let err = orchestrator.resume(&RunId::from_string("missing")).await.unwrap_err();
        assert!(matches!(err, ConsolidationError::RunNotFound(_)));

        let report = orchestrator.run().await.unwrap();
        let err = orchestrator.resume(&report.run_id).await.unwrap_err();
        assert!(matches!(err, ConsolidationError::RunAlreadyCompleted(_)));
    }

    #[tokio::test]
    async fn resume_is_idempotent_for_finished_node_work() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.save_node(&stock("a", "Energy Level", vec![1.0, 0.0])).unwrap();
        store.save_node(&stock("b", "Personal Vigor", vec![0.75, 0.661])).unwrap();

        let orchestrator = orchestrator(store.clone());
        let first = orchestrator.run().await.unwrap();

        // Pretend the run died during rewiring
        let mut record = store.load_run(&first.run_id).unwrap().unwrap();
        record.completed_phases.retain(|p| *p < Phase::MergeNodes);
        record.status = RunStatus::Aborted {
            phase: Phase::MergeNodes,
            error: "interrupted".into(),
        };
        record.counts = Default::default();
        store.save_run(&record).unwrap();

        let report = orchestrator.resume(&record.id).await.unwrap();

        assert!(report.is_completed());
        // Source already merged away, canonical already canonical
        assert_eq!(report.counts.merges, 0);
        assert_eq!(report.counts.already_canonical, 1);
        assert_eq!(report.skipped.len(), 1);
        let canonical = store.get_node_by_id(&NodeId::from("a")).unwrap().unwrap();
        assert_eq!(canonical.consolidation_score, 2);
    }

    #[tokio::test]
    async fn invalid_threshold_is_rejected_at_construction() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = ConsolidationConfig {
            similarity_threshold: 2.0,
            ..Default::default()
        };
        let result = ConsolidationOrchestrator::new(store.clone(), &config, NameSynthesizer::disabled(store));
        assert!(matches!(result, Err(ConsolidationError::InvalidThreshold(_))));
    }
}
