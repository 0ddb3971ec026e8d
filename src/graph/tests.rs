//! Serialization tests with extraction-output fixtures

use super::*;
use serde_json::{json, Value};

/// Stock node as the extraction step writes it
fn extracted_stock_fixture() -> Value {
    json!({
        "id": "0b9c8f5e-1f7e-4a55-9a0e-2f6f5f0a1c11",
        "kind": "Stock",
        "name": "Energy Level",
        "description": "How much energy the narrator has during the day"
    })
}

/// Causal link carrying the question that raised it
fn causal_link_fixture() -> Value {
    json!({
        "rel_type": "CAUSAL_LINK",
        "from": "flow-sleep",
        "to": "stock-energy",
        "properties": {
            "kind": "causal_link",
            "questions": ["Does poor sleep drain energy?"],
            "curiosity_score": 0.7
        }
    })
}

#[test]
fn extracted_node_defaults_to_unembedded_and_unconsolidated() {
    let node: ConceptNode = serde_json::from_value(extracted_stock_fixture()).unwrap();

    assert_eq!(node.kind, NodeKind::Stock);
    assert_eq!(node.name, "Energy Level");
    assert!(!node.is_embedded());
    assert!(!node.consolidated);
    assert_eq!(node.consolidation_score, 0);
}

#[test]
fn node_with_embedding_round_trips() {
    let mut value = extracted_stock_fixture();
    value["embedding"] = json!([0.25, -0.5, 1.0]);

    let node: ConceptNode = serde_json::from_value(value).unwrap();
    assert_eq!(node.embedding.as_deref(), Some(&[0.25, -0.5, 1.0][..]));

    let back: ConceptNode = serde_json::from_str(&serde_json::to_string(&node).unwrap()).unwrap();
    assert_eq!(back, node);
}

#[test]
fn causal_link_fixture_parses_with_evidence() {
    let rel: Relationship = serde_json::from_value(causal_link_fixture()).unwrap();

    assert_eq!(rel.rel_type, RelationshipType::CausalLink);
    assert_eq!(rel.evidence(), ["Does poor sleep drain energy?".to_string()]);
    assert!(rel.validate().is_ok());
}

#[test]
fn unknown_relationship_type_is_rejected_at_parse_time() {
    let mut value = causal_link_fixture();
    value["rel_type"] = json!("SIMILAR_TO");

    assert!(serde_json::from_value::<Relationship>(value).is_err());
}

#[test]
fn changes_fixture_keeps_polarity() {
    let rel: Relationship = serde_json::from_value(json!({
        "rel_type": "CHANGES",
        "from": "flow-exercise",
        "to": "stock-energy",
        "properties": { "kind": "changes", "polarity": -1.0 }
    }))
    .unwrap();

    assert_eq!(rel.properties, RelationshipProperties::Changes { polarity: -1.0 });
    assert!(rel.validate().is_ok());
}

#[test]
fn with_endpoints_keeps_payload_and_status() {
    let mut rel = Relationship::causal_link("u", "s", "q1", 0.5);
    rel.consolidation_score = 3;

    let moved = rel.with_endpoints(NodeId::from_string("c"), NodeId::from_string("s"));
    assert_eq!(moved.from.as_str(), "c");
    assert_eq!(moved.properties, rel.properties);
    assert_eq!(moved.consolidation_score, 3);
}
