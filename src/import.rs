//! Extraction document import
//!
//! The upstream extractor emits one JSON document per batch of narratives:
//!
//! ```json
//! {
//!   "narratives": [{"id": "n1", "title": "...", "content": "..."}],
//!   "nodes": [{"id": "s1", "kind": "Stock", "name": "Energy Level", "description": "..."}],
//!   "relationships": [{"rel_type": "DESCRIBES", "from": "n1", "to": "s1"}]
//! }
//! ```
//!
//! Nodes are always stored unconsolidated; an `embedding` field makes them
//! eligible for the next consolidation run without a separate embedding pass.

use crate::graph::{ConceptNode, Narrative, Relationship};
use crate::storage::{AddOutcome, GraphStore, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionDocument {
    pub narratives: Vec<Narrative>,
    pub nodes: Vec<ConceptNode>,
    pub relationships: Vec<Relationship>,
}

impl ExtractionDocument {
    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub narratives: usize,
    pub nodes: usize,
    pub relationships_inserted: usize,
    pub relationships_duplicate: usize,
    pub evidence_appended: usize,
    /// (relationship, reason)
    pub skipped: Vec<(String, String)>,
}

/// Write a document into the store. Relationships with a missing endpoint or
/// mismatched properties are skipped; other store errors abort the import.
pub fn import_document(store: &dyn GraphStore, document: &ExtractionDocument) -> StorageResult<ImportReport> {
    let mut report = ImportReport::default();

    for narrative in &document.narratives {
        store.save_narrative(narrative)?;
        report.narratives += 1;
    }

    for node in &document.nodes {
        let fresh = ConceptNode {
            consolidated: false,
            consolidation_score: 0,
            last_consolidated_at: None,
            ..node.clone()
        };
        store.save_node(&fresh)?;
        report.nodes += 1;
    }

    for rel in &document.relationships {
        match store.add_relationship(rel) {
            Ok(AddOutcome::Inserted) => report.relationships_inserted += 1,
            Ok(AddOutcome::Duplicate) => report.relationships_duplicate += 1,
            Ok(AddOutcome::EvidenceAppended) => report.evidence_appended += 1,
            Err(e) if e.is_data_error() => {
                warn!(relationship = %rel.key(), error = %e, "skipping relationship");
                report.skipped.push((rel.key().to_string(), e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        narratives = report.narratives,
        nodes = report.nodes,
        relationships = report.relationships_inserted,
        skipped = report.skipped.len(),
        "extraction document imported"
    );
    Ok(report)
}

/// Convenience for the CLI: parse then import
pub fn import_file(store: &dyn GraphStore, path: impl AsRef<Path>) -> StorageResult<ImportReport> {
    let document = ExtractionDocument::load(path)?;
    import_document(store, &document)
}
