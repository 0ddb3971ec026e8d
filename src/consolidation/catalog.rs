//! Reads the consolidation candidates out of the store

use crate::graph::{ConceptNode, NodeKind};
use crate::storage::{GraphStore, StorageResult};
use std::sync::Arc;
use tracing::debug;

/// Embedded nodes of one kind, split by consolidation status.
#[derive(Debug, Clone)]
pub struct Partition {
    pub kind: NodeKind,
    pub unconsolidated: Vec<ConceptNode>,
    /// Empty on the first run for this kind
    pub consolidated: Vec<ConceptNode>,
}

impl Partition {
    pub fn is_bootstrap(&self) -> bool {
        self.consolidated.is_empty()
    }
}

/// Read-only view over the store's node partitions.
pub struct NodeCatalog {
    store: Arc<dyn GraphStore>,
}

impl NodeCatalog {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn fetch_partition(&self, kind: NodeKind) -> StorageResult<Partition> {
        let unconsolidated = self.store.query_nodes_by_kind_and_status(kind, false)?;
        let consolidated = self.store.query_nodes_by_kind_and_status(kind, true)?;

        debug!(
            kind = %kind,
            unconsolidated = unconsolidated.len(),
            consolidated = consolidated.len(),
            "fetched partition"
        );

        Ok(Partition {
            kind,
            unconsolidated,
            consolidated,
        })
    }

    /// Partitions for System, Stock and Flow, in that order
    pub fn fetch_all(&self) -> StorageResult<Vec<Partition>> {
        NodeKind::ALL
            .iter()
            .map(|kind| self.fetch_partition(*kind))
            .collect()
    }
}
