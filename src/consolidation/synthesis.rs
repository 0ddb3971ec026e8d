//! Best-effort name/description synthesis for merged nodes
//!
//! Defines the provider trait and the synthesizer that enriches merge
//! matches. Two provider implementations:
//! - `GeminiClient` (in `crate::gemini`): `generateContent` over HTTP
//! - `MockSynthesisProvider`: preconfigured answers (testing)
//!
//! Synthesis never blocks a merge. Every failure is logged and the match
//! keeps the canonical node's text.

use super::types::NodeMatch;
use crate::graph::{ConceptNode, NodeId, NodeKind};
use crate::storage::{GraphStore, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Text of one side of a synthesis request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptText {
    pub name: String,
    pub description: String,
}

impl From<&ConceptNode> for ConceptText {
    fn from(node: &ConceptNode) -> Self {
        Self {
            name: node.name.clone(),
            description: node.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub kind: NodeKind,
    /// The surviving node
    pub canonical: ConceptText,
    /// The node being folded in
    pub absorbed: ConceptText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Errors from synthesis providers.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis provider not available: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed synthesis payload: {0}")]
    Malformed(String),
}

/// Generative service that merges two concepts' text.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, SynthesisError>;
}

/// Instruction given to the generative service ahead of the user prompt.
pub const SYSTEM_INSTRUCTION: &str = "You are a systems analyst who normalizes knowledge models. \
Combine two closely related concepts into one more general concept: give it a new formal name \
and a short, objective description that covers both originals.";

/// User prompt for one request.
pub fn build_prompt(request: &SynthesisRequest) -> String {
    format!(
        r#"Combine these two similar {kind} nodes into one concept that keeps the meaning of both.

Node A (canonical):
- Name: "{a_name}"
- Description: "{a_desc}"

Node B (being merged):
- Name: "{b_name}"
- Description: "{b_desc}"

Rules:
1. Name: objective and timeless.
2. Description: fewer than 15 words, stating what the component does.

Answer with this JSON object and nothing else:
{{
  "name": "<synthesized name>",
  "description": "<synthesized description>"
}}"#,
        kind = request.kind,
        a_name = request.canonical.name,
        a_desc = request.canonical.description,
        b_name = request.absorbed.name,
        b_desc = request.absorbed.description,
    )
}

/// Pull a JSON object out of model output.
///
/// Tries, in order: the whole text, a fenced code block, and the span from
/// the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    let parse_object = |candidate: &str| {
        serde_json::from_str::<serde_json::Value>(candidate.trim())
            .ok()
            .filter(|v| v.is_object())
    };

    if let Some(v) = parse_object(trimmed) {
        return Some(v);
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };
    if let Some(v) = fenced.and_then(parse_object) {
        return Some(v);
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => parse_object(&trimmed[start..=end]),
        _ => None,
    }
}

/// Parse a provider's text answer into a response.
///
/// Malformed when no JSON object can be found or the name is empty.
pub fn parse_response(text: &str) -> Result<SynthesisResponse, SynthesisError> {
    let value = extract_json(text)
        .ok_or_else(|| SynthesisError::Malformed("no JSON object in response".to_string()))?;
    let response: SynthesisResponse =
        serde_json::from_value(value).map_err(|e| SynthesisError::Malformed(e.to_string()))?;

    if response.name.trim().is_empty() {
        return Err(SynthesisError::Malformed("empty name".to_string()));
    }
    Ok(SynthesisResponse {
        name: response.name.trim().to_string(),
        description: response.description.trim().to_string(),
    })
}

/// Counters from one enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisStats {
    pub synthesized: usize,
    pub failed: usize,
    /// Matches left untouched because a node was missing: (match label, reason)
    pub skipped: Vec<(String, String)>,
}

/// Enriches merge matches with synthesized text.
pub struct NameSynthesizer {
    store: Arc<dyn GraphStore>,
    provider: Option<Arc<dyn SynthesisProvider>>,
    timeout: Duration,
}

impl NameSynthesizer {
    pub fn new(
        store: Arc<dyn GraphStore>,
        provider: Arc<dyn SynthesisProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider: Some(provider),
            timeout,
        }
    }

    /// A synthesizer that leaves every match alone
    pub fn disabled(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            provider: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Build the request for a pair of stored nodes. `Ok(None)` if either is gone.
    pub fn request_for(
        &self,
        canonical_id: &NodeId,
        absorbed_id: &NodeId,
    ) -> StorageResult<Option<SynthesisRequest>> {
        let Some(canonical) = self.store.get_node_by_id(canonical_id)? else {
            return Ok(None);
        };
        let Some(absorbed) = self.store.get_node_by_id(absorbed_id)? else {
            return Ok(None);
        };
        Ok(Some(SynthesisRequest {
            kind: canonical.kind,
            canonical: ConceptText::from(&canonical),
            absorbed: ConceptText::from(&absorbed),
        }))
    }

    /// One provider call bounded by the configured timeout
    pub async fn call(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, SynthesisError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| SynthesisError::Unavailable("synthesis is disabled".to_string()))?;

        match tokio::time::timeout(self.timeout, provider.synthesize(request)).await {
            Ok(result) => result,
            Err(_) => Err(SynthesisError::Timeout(self.timeout)),
        }
    }

    /// Fill `synthesized_name`/`synthesized_description` on every merge match.
    ///
    /// Only store errors propagate; provider failures are counted and logged.
    pub async fn enrich(&self, matches: &mut [NodeMatch]) -> StorageResult<SynthesisStats> {
        let mut stats = SynthesisStats::default();
        if !self.is_enabled() {
            debug!("synthesis disabled, merges keep canonical text");
            return Ok(stats);
        }

        for m in matches.iter_mut().filter(|m| !m.is_promotion()) {
            let Some(request) = self.request_for(&m.canonical_id, &m.source_id)? else {
                warn!(source = %m.source_id, canonical = %m.canonical_id, "node missing, skipping synthesis");
                stats.skipped.push((
                    format!("{} -> {}", m.source_id, m.canonical_id),
                    "node not found".to_string(),
                ));
                continue;
            };

            match self.call(&request).await {
                Ok(response) => {
                    debug!(source = %m.source_id, canonical = %m.canonical_id, name = %response.name, "synthesized");
                    m.synthesized_name = Some(response.name);
                    m.synthesized_description = Some(response.description);
                    stats.synthesized += 1;
                }
                Err(error) => {
                    warn!(source = %m.source_id, canonical = %m.canonical_id, %error, "synthesis failed, keeping original text");
                    stats.failed += 1;
                }
            }
        }

        info!(synthesized = stats.synthesized, failed = stats.failed, "synthesis complete");
        Ok(stats)
    }
}

/// Mock provider for testing: answers from a queue, then a fallback.
pub struct MockSynthesisProvider {
    /// Raw model answers, consumed before the fallback
    queued: Mutex<VecDeque<String>>,
    fallback: Option<SynthesisResponse>,
    delay: Option<Duration>,
    calls: Mutex<Vec<SynthesisRequest>>,
}

impl MockSynthesisProvider {
    /// Always answers with `name`/`description`
    pub fn answering(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Some(SynthesisResponse {
                name: name.into(),
                description: description.into(),
            }),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call
    pub fn failing() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw model answer to be parsed on the next call
    pub fn with_raw_answer(self, raw: impl Into<String>) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(raw.into());
        }
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<SynthesisRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SynthesisProvider for MockSynthesisProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, SynthesisError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(raw) => parse_response(&raw),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| SynthesisError::Request("mock provider configured to fail".to_string())),
        }
    }
}
