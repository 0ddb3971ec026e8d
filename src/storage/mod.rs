//! Storage backends for stockflow
//!
//! The consolidation engine talks to the graph only through the `GraphStore`
//! trait. The primary implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    AddOutcome, CleanCounts, CleanupScope, GraphStore, MergeCounts, NodeFields, OpenStore,
    RelationshipStatusCount, ResetCounts, StorageError, StorageResult,
};
