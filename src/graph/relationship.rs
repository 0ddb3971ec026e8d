//! Typed relationships between narratives and concepts

use super::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The closed set of relationship types the graph knows about.
///
/// Strings coming back from storage are parsed into this enum before they
/// reach any query construction, so an unknown type can never be
/// interpolated into a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Narrative → System
    Describes,
    /// Subsystem → System
    Constitutes,
    /// Stock → System
    DescribesStatic,
    /// Flow → System
    DescribesDynamic,
    /// Flow → Stock, with polarity
    Changes,
    /// Stock/Flow → Stock/Flow, carrying the open questions that raised it
    CausalLink,
    /// Narrative → causal link question
    Raises,
    /// Narrative → causal link question
    Resolves,
}

/// How duplicates of a relationship type are reconciled during consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewirePolicy {
    /// Duplicates collapse into one edge whose score counts them.
    Scored,
    /// Duplicates collapse into one edge whose evidence list accumulates.
    EvidenceBearing,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 8] = [
        RelationshipType::Describes,
        RelationshipType::Constitutes,
        RelationshipType::DescribesStatic,
        RelationshipType::DescribesDynamic,
        RelationshipType::Changes,
        RelationshipType::CausalLink,
        RelationshipType::Raises,
        RelationshipType::Resolves,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Describes => "DESCRIBES",
            RelationshipType::Constitutes => "CONSTITUTES",
            RelationshipType::DescribesStatic => "DESCRIBES_STATIC",
            RelationshipType::DescribesDynamic => "DESCRIBES_DYNAMIC",
            RelationshipType::Changes => "CHANGES",
            RelationshipType::CausalLink => "CAUSAL_LINK",
            RelationshipType::Raises => "RAISES",
            RelationshipType::Resolves => "RESOLVES",
        }
    }

    pub fn policy(&self) -> RewirePolicy {
        match self {
            RelationshipType::CausalLink => RewirePolicy::EvidenceBearing,
            _ => RewirePolicy::Scored,
        }
    }

    pub fn is_evidence_bearing(&self) -> bool {
        self.policy() == RewirePolicy::EvidenceBearing
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown relationship type: {0}")]
pub struct UnknownRelationshipType(pub String);

impl FromStr for RelationshipType {
    type Err = UnknownRelationshipType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationshipType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownRelationshipType(s.to_string()))
    }
}

/// Per-type relationship payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationshipProperties {
    #[default]
    None,
    Changes {
        /// +1 reinforces the stock, -1 depletes it
        polarity: f32,
    },
    CausalLink {
        /// Evidence list: every question that asserted this link, in the
        /// order the edges were folded together
        questions: Vec<String>,
        #[serde(default)]
        curiosity_score: f32,
    },
}

/// Error raised when a relationship's payload does not fit its type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidRelationship {
    #[error("{rel_type} relationship cannot carry {found} properties")]
    PropertiesMismatch {
        rel_type: RelationshipType,
        found: &'static str,
    },
    #[error("CHANGES polarity must be +1 or -1, got {0}")]
    Polarity(f32),
}

impl RelationshipProperties {
    /// Default payload for a freshly created relationship of `rel_type`
    pub fn default_for(rel_type: RelationshipType) -> Self {
        match rel_type {
            RelationshipType::Changes => RelationshipProperties::Changes { polarity: 1.0 },
            RelationshipType::CausalLink => RelationshipProperties::CausalLink {
                questions: Vec::new(),
                curiosity_score: 0.0,
            },
            _ => RelationshipProperties::None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            RelationshipProperties::None => "no",
            RelationshipProperties::Changes { .. } => "CHANGES",
            RelationshipProperties::CausalLink { .. } => "CAUSAL_LINK",
        }
    }

    /// Check that this payload is the one `rel_type` expects
    pub fn validate_for(&self, rel_type: RelationshipType) -> Result<(), InvalidRelationship> {
        let fits = matches!(
            (rel_type, self),
            (RelationshipType::Changes, RelationshipProperties::Changes { .. })
                | (RelationshipType::CausalLink, RelationshipProperties::CausalLink { .. })
        ) || (!matches!(
            rel_type,
            RelationshipType::Changes | RelationshipType::CausalLink
        ) && *self == RelationshipProperties::None);

        if !fits {
            return Err(InvalidRelationship::PropertiesMismatch {
                rel_type,
                found: self.variant_name(),
            });
        }

        if let RelationshipProperties::Changes { polarity } = self {
            if *polarity != 1.0 && *polarity != -1.0 {
                return Err(InvalidRelationship::Polarity(*polarity));
            }
        }

        Ok(())
    }
}

/// Identity of a relationship: at most one edge exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub rel_type: RelationshipType,
    pub from: NodeId,
    pub to: NodeId,
}

impl RelationshipKey {
    pub fn new(rel_type: RelationshipType, from: NodeId, to: NodeId) -> Self {
        Self { rel_type, from, to }
    }
}

impl std::fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})-[{}]->({})", self.from, self.rel_type, self.to)
    }
}

/// A directed, typed relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub rel_type: RelationshipType,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub consolidated: bool,
    #[serde(default)]
    pub consolidation_score: u32,
    #[serde(default)]
    pub properties: RelationshipProperties,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Create an unconsolidated relationship with the type's default payload
    pub fn new(rel_type: RelationshipType, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            rel_type,
            from: from.into(),
            to: to.into(),
            consolidated: false,
            consolidation_score: 0,
            properties: RelationshipProperties::default_for(rel_type),
            created_at: Utc::now(),
        }
    }

    /// Flow → Stock change with the given polarity
    pub fn changes(from: impl Into<NodeId>, to: impl Into<NodeId>, polarity: f32) -> Self {
        let mut rel = Self::new(RelationshipType::Changes, from, to);
        rel.properties = RelationshipProperties::Changes { polarity };
        rel
    }

    /// Causal link raised by a single question
    pub fn causal_link(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        question: impl Into<String>,
        curiosity_score: f32,
    ) -> Self {
        let mut rel = Self::new(RelationshipType::CausalLink, from, to);
        rel.properties = RelationshipProperties::CausalLink {
            questions: vec![question.into()],
            curiosity_score,
        };
        rel
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey::new(self.rel_type, self.from.clone(), self.to.clone())
    }

    /// The same relationship re-pointed at new endpoints
    pub fn with_endpoints(&self, from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            ..self.clone()
        }
    }

    /// Evidence questions, for evidence-bearing relationships
    pub fn evidence(&self) -> &[String] {
        match &self.properties {
            RelationshipProperties::CausalLink { questions, .. } => questions,
            _ => &[],
        }
    }

    pub fn validate(&self) -> Result<(), InvalidRelationship> {
        self.properties.validate_for(self.rel_type)
    }
}

/// Which end of a relationship a node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The node is the `from` endpoint
    Outgoing,
    /// The node is the `to` endpoint
    Incoming,
}

/// A relationship seen from one of its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRelationship {
    pub relationship: Relationship,
    pub direction: Direction,
    /// The endpoint that is not the queried node
    pub other: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_type_round_trips_through_str() {
        for t in RelationshipType::ALL {
            assert_eq!(t.as_str().parse::<RelationshipType>().unwrap(), t);
        }
        assert!("DROP TABLE".parse::<RelationshipType>().is_err());
    }

    #[test]
    fn only_causal_link_is_evidence_bearing() {
        for t in RelationshipType::ALL {
            assert_eq!(t.is_evidence_bearing(), t == RelationshipType::CausalLink);
        }
    }

    #[test]
    fn serde_uses_graph_names() {
        let json = serde_json::to_string(&RelationshipType::DescribesStatic).unwrap();
        assert_eq!(json, "\"DESCRIBES_STATIC\"");
    }

    #[test]
    fn properties_must_match_type() {
        let ok = Relationship::changes("f", "s", -1.0);
        assert!(ok.validate().is_ok());

        let mut wrong = Relationship::new(RelationshipType::Describes, "n", "s");
        wrong.properties = RelationshipProperties::Changes { polarity: 1.0 };
        assert!(matches!(
            wrong.validate(),
            Err(InvalidRelationship::PropertiesMismatch { .. })
        ));

        let mut missing = Relationship::new(RelationshipType::CausalLink, "a", "b");
        missing.properties = RelationshipProperties::None;
        assert!(missing.validate().is_err());
    }

    #[test]
    fn changes_polarity_is_signed_unit() {
        let bad = Relationship::changes("f", "s", 0.5);
        assert_eq!(bad.validate(), Err(InvalidRelationship::Polarity(0.5)));
    }

    #[test]
    fn causal_link_starts_with_singleton_evidence() {
        let rel = Relationship::causal_link("a", "b", "Does sleep drive energy?", 2.0);
        assert_eq!(rel.evidence(), ["Does sleep drive energy?".to_string()]);
    }
}
