//! stockflow: consolidation engine for systems-thinking knowledge graphs
//!
//! Narratives are extracted upstream into Systems, Stocks and Flows plus the
//! relationships between them. Extraction produces near-duplicates ("Energy
//! Level", "Personal Vigor"); a consolidation run folds them into canonical
//! nodes so the graph converges instead of growing without bound.
//!
//! # Core Concepts
//!
//! - **Concept nodes**: Systems, Stocks and Flows, each with an embedding
//! - **Consolidation score**: how many extracted nodes a canonical node absorbed
//! - **Runs**: resumable passes of match → synthesize → merge → rewire → cleanup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stockflow::{ConsolidationOrchestrator, NameSynthesizer, OpenStore, SqliteStore, StockflowConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("graph.db")?);
//! let config = StockflowConfig::default();
//! let orchestrator = ConsolidationOrchestrator::new(
//!     store.clone(),
//!     &config.consolidation,
//!     NameSynthesizer::disabled(store),
//! )?;
//! let report = orchestrator.run().await?;
//! println!("merged {} nodes", report.counts.merges);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consolidation;
pub mod diagnostics;
pub mod embedding;
pub mod gemini;
mod graph;
pub mod import;
pub mod similarity;
pub mod storage;

pub use config::StockflowConfig;
pub use consolidation::{
    ConsolidationError, ConsolidationOrchestrator, ConsolidationResult, NameSynthesizer, NodeMatch,
    Phase, RunId, RunOutcome, RunRecord, RunReport,
};
pub use graph::{
    ConceptNode, Direction, IncidentRelationship, InvalidRelationship, Narrative, NodeId, NodeKind,
    Relationship, RelationshipKey, RelationshipProperties, RelationshipType, RewirePolicy,
    UnknownNodeKind, UnknownRelationshipType,
};
pub use storage::{GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
