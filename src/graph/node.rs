//! Node representation in the systems-thinking graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a node
///
/// Serializes as a plain string. Extraction output uses UUIDs, but any
/// string id is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a NodeId from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kinds of concept a narrative can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    System,
    Stock,
    Flow,
}

impl NodeKind {
    /// Every kind, in the order a consolidation run visits them.
    pub const ALL: [NodeKind; 3] = [NodeKind::System, NodeKind::Stock, NodeKind::Flow];

    /// Graph label of this kind (also the storage representation).
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::System => "System",
            NodeKind::Stock => "Stock",
            NodeKind::Flow => "Flow",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a string does not name a known node kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown node kind: {0}")]
pub struct UnknownNodeKind(pub String);

impl FromStr for NodeKind {
    type Err = UnknownNodeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(NodeKind::System),
            "stock" => Ok(NodeKind::Stock),
            "flow" => Ok(NodeKind::Flow),
            _ => Err(UnknownNodeKind(s.to_string())),
        }
    }
}

/// A System, Stock or Flow extracted from one or more narratives.
///
/// `embedding` is `None` until the embedding job has stamped the node; a node
/// is "embedded" exactly when the vector is present. `consolidation_score`
/// counts how many extracted nodes have been folded into this one and is at
/// least 1 once the node is consolidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    /// Free-text description (the boundary description for systems)
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub consolidated: bool,
    #[serde(default)]
    pub consolidation_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_consolidated_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ConceptNode {
    /// Create a fresh, unembedded and unconsolidated node
    pub fn new(kind: NodeKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            name: name.into(),
            description: description.into(),
            embedding: None,
            consolidated: false,
            consolidation_score: 0,
            last_consolidated_at: None,
            created_at: Utc::now(),
        }
    }

    /// Use a specific id
    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach an embedding vector, making the node eligible for consolidation
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Text sent to the embedding provider: `name: description`
    pub fn embedding_text(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.description)
        }
    }
}

/// A source narrative. Never consolidated, never removed by consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub id: NodeId,
    pub title: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Narrative {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            title: title.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }
}
