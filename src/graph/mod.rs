//! Core graph data structures

mod node;
mod relationship;

#[cfg(test)]
mod tests;

pub use node::{ConceptNode, Narrative, NodeId, NodeKind, UnknownNodeKind};
pub use relationship::{
    Direction, IncidentRelationship, InvalidRelationship, Relationship, RelationshipKey,
    RelationshipProperties, RelationshipType, RewirePolicy, UnknownRelationshipType,
};
