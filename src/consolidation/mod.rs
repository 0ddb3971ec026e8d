//! Consolidation engine
//!
//! A run folds freshly extracted concept nodes into the canonical graph:
//! nodes are matched by embedding similarity within each kind, merge
//! targets get an optional synthesized name, node state is merged or
//! promoted, relationships are rewired to canonical endpoints and whatever
//! remains unconsolidated is swept away.

mod catalog;
mod matcher;
mod merger;
mod orchestrator;
mod rewirer;
mod synthesis;
mod types;

pub use catalog::{NodeCatalog, Partition};
pub use matcher::{MatchResult, SimilarityMatcher, SkippedPair};
pub use merger::{NodeOutcome, StateMerger};
pub use orchestrator::ConsolidationOrchestrator;
pub use rewirer::{canonical_map, CanonicalMap, RelationshipRewirer, RewireOutcome, RewireStats};
pub use synthesis::{
    build_prompt, extract_json, parse_response, ConceptText, MockSynthesisProvider,
    NameSynthesizer, SynthesisError, SynthesisProvider, SynthesisRequest, SynthesisResponse,
    SynthesisStats, SYSTEM_INSTRUCTION,
};
pub use types::{
    ConsolidationError, ConsolidationResult, NodeMatch, Phase, RunCounts, RunId, RunOutcome,
    RunRecord, RunReport, RunStatus, SkippedItem,
};
