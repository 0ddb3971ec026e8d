//! YAML configuration
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Secrets never live here: the Gemini API key is read
//! from `GEMINI_API_KEY`.

use crate::graph::RelationshipType;
use crate::storage::CleanupScope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the Gemini API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub similarity_threshold: f32,
    /// Types rewired when the store cannot list them
    pub fallback_relationship_types: Vec<RelationshipType>,
    pub cleanup: CleanupScope,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.60,
            fallback_relationship_types: vec![
                RelationshipType::Describes,
                RelationshipType::DescribesStatic,
                RelationshipType::CausalLink,
                RelationshipType::Changes,
            ],
            cleanup: CleanupScope::AllUnconsolidated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub enabled: bool,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-2.5-flash".to_string(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            timeout_secs: 30,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub endpoint: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-004".to_string(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            batch_size: 100,
            timeout_secs: 60,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured path, else `<data_dir>/stockflow/stockflow.db`
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stockflow")
                .join("stockflow.db")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockflowConfig {
    pub consolidation: ConsolidationConfig,
    pub synthesis: SynthesisConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
}

impl StockflowConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.consolidation.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "consolidation.similarity_threshold must be within [-1, 1], got {threshold}"
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be positive".into()));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(ConfigError::Invalid("embedding.timeout_secs must be positive".into()));
        }
        if self.synthesis.timeout_secs == 0 {
            return Err(ConfigError::Invalid("synthesis.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

/// The Gemini API key, if set and non-empty
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty())
}
