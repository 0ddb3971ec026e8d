//! Gemini HTTP client
//!
//! One client serves both provider seams: `generateContent` for name
//! synthesis and `batchEmbedContents` for node embeddings. The API key goes
//! in the `x-goog-api-key` header.

use crate::config::{EmbeddingConfig, SynthesisConfig};
use crate::consolidation::{
    build_prompt, parse_response, SynthesisError, SynthesisProvider, SynthesisRequest,
    SynthesisResponse, SYSTEM_INSTRUCTION,
};
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    #[serde(default)]
    values: Vec<f32>,
}

fn text_content(text: impl Into<String>) -> Content {
    Content {
        parts: vec![Part { text: text.into() }],
    }
}

/// Text of the first part of the first candidate
fn first_candidate_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .map(|p| p.text)
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn for_synthesis(api_key: impl Into<String>, config: &SynthesisConfig) -> Self {
        Self::new(api_key, &config.endpoint, &config.model)
    }

    pub fn for_embedding(api_key: impl Into<String>, config: &EmbeddingConfig) -> Self {
        Self::new(api_key, &config.endpoint, &config.model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.endpoint, self.model, method)
    }

    /// POST `body` and return the successful response, or (status, body)
    async fn post<T: Serialize>(&self, method: &str, body: &T) -> Result<reqwest::Response, PostError> {
        let url = self.url(method);
        debug!(%url, "gemini request");
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| PostError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PostError::Status { status, body });
        }
        Ok(response)
    }
}

enum PostError {
    Request(String),
    Status { status: u16, body: String },
}

impl From<PostError> for SynthesisError {
    fn from(e: PostError) -> Self {
        match e {
            PostError::Request(msg) => SynthesisError::Request(msg),
            PostError::Status { status, body } => SynthesisError::Status { status, body },
        }
    }
}

impl From<PostError> for EmbeddingError {
    fn from(e: PostError) -> Self {
        match e {
            PostError::Request(msg) => EmbeddingError::Request(msg),
            PostError::Status { status, body } => EmbeddingError::Status { status, body },
        }
    }
}

#[async_trait]
impl SynthesisProvider for GeminiClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, SynthesisError> {
        let body = GenerateRequest {
            system_instruction: text_content(SYSTEM_INSTRUCTION),
            contents: vec![text_content(build_prompt(request))],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response: GenerateResponse = self
            .post("generateContent", &body)
            .await?
            .json()
            .await
            .map_err(|e| SynthesisError::Malformed(e.to_string()))?;

        let text = first_candidate_text(response)
            .ok_or_else(|| SynthesisError::Malformed("response has no candidates".to_string()))?;
        parse_response(&text)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = format!("models/{}", self.model);
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| EmbedRequest {
                    model: model.clone(),
                    content: text_content(t.clone()),
                })
                .collect(),
        };

        let response: BatchEmbedResponse = self
            .post("batchEmbedContents", &body)
            .await?
            .json()
            .await
            .map_err(|e| EmbeddingError::Request(format!("JSON parse error: {e}")))?;

        if response.embeddings.is_empty() {
            return Err(EmbeddingError::EmptyResult);
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}
