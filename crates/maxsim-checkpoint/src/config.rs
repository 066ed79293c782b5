//! Retrieval configuration stored alongside a checkpoint.
//!
//! Every checkpoint directory may carry a `retrieval_config.json` describing
//! the late-interaction hyperparameters the weights were trained with. The
//! adapter resolves the effective configuration in two steps:
//!
//! 1. Load the stored configuration if the checkpoint has one, else defaults.
//! 2. Merge an optional caller-supplied [`ConfigOverride`] on top, field by
//!    field: every `Some` field wins, every `None` field keeps the base.
//!
//! ```rust,ignore
//! let base = RetrievalConfig::from_checkpoint(dir)?.unwrap_or_default();
//! let overrides = ConfigOverride { dim: Some(64), ..Default::default() };
//! let config = base.merged(&overrides);
//! config.validate()?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, CheckpointResult};

// ============================================================================
// SIMILARITY ENUM
// ============================================================================

/// Token-level similarity function the checkpoint was trained for.
///
/// Only recorded here so downstream scoring picks the matching kernel;
/// this crate never computes similarities itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Cosine similarity over unit-normalized token embeddings.
    #[default]
    Cosine,

    /// Negative squared L2 distance.
    L2,
}

impl Similarity {
    /// Returns all similarity functions.
    pub fn all() -> &'static [Similarity] {
        &[Similarity::Cosine, Similarity::L2]
    }

    /// Returns the function name as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
            Similarity::L2 => "l2",
        }
    }
}

// ============================================================================
// RETRIEVAL CONFIG
// ============================================================================

/// Late-interaction retrieval configuration.
///
/// Serialized as `retrieval_config.json` inside a checkpoint directory.
/// All fields have serde defaults so a partial stored file deserializes
/// cleanly; [`RetrievalConfig::validate`] rejects out-of-range values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base model identity declared at training time (e.g. a hub repo id).
    /// When present it drives architecture resolution; when absent the
    /// checkpoint source string is used instead.
    #[serde(default)]
    pub model_name: Option<String>,

    /// Output dimension of the projection layer.
    #[serde(default = "default_dim")]
    pub dim: usize,

    /// Similarity function the weights were trained for.
    #[serde(default)]
    pub similarity: Similarity,

    /// Maximum query length in tokens.
    #[serde(default = "default_query_maxlen")]
    pub query_maxlen: usize,

    /// Maximum document length in tokens.
    #[serde(default = "default_doc_maxlen")]
    pub doc_maxlen: usize,

    /// Whether punctuation tokens are masked out of document embeddings.
    #[serde(default = "default_mask_punctuation")]
    pub mask_punctuation: bool,

    /// Marker token prepended to queries.
    #[serde(default = "default_query_token")]
    pub query_token: String,

    /// Marker token prepended to documents.
    #[serde(default = "default_doc_token")]
    pub doc_token: String,

    /// Whether query augmentation ([MASK] padding) tokens attend.
    #[serde(default)]
    pub attend_to_mask_tokens: bool,
}

fn default_dim() -> usize {
    128
}

fn default_query_maxlen() -> usize {
    32
}

fn default_doc_maxlen() -> usize {
    180
}

fn default_mask_punctuation() -> bool {
    true
}

fn default_query_token() -> String {
    "[Q]".to_string()
}

fn default_doc_token() -> String {
    "[D]".to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            dim: default_dim(),
            similarity: Similarity::default(),
            query_maxlen: default_query_maxlen(),
            doc_maxlen: default_doc_maxlen(),
            mask_punctuation: default_mask_punctuation(),
            query_token: default_query_token(),
            doc_token: default_doc_token(),
            attend_to_mask_tokens: false,
        }
    }
}

impl RetrievalConfig {
    /// File name the configuration is stored under inside a checkpoint.
    pub const FILE_NAME: &'static str = "retrieval_config.json";

    /// Load the configuration stored in a checkpoint directory.
    ///
    /// Returns `Ok(None)` when the directory has no stored configuration
    /// (a plain base-model checkpoint); callers fall back to defaults.
    ///
    /// # Errors
    /// - `CheckpointError::IoError` if the file exists but cannot be read
    /// - `CheckpointError::SerializationError` if it is not valid JSON
    pub fn from_checkpoint(dir: impl AsRef<Path>) -> CheckpointResult<Option<Self>> {
        let path = dir.as_ref().join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::from_file(&path)?))
    }

    /// Load the configuration from an explicit file path.
    pub fn from_file(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Merge an override on top of this configuration.
    ///
    /// Field rule: every `Some` field of the override replaces the base
    /// value; every `None` field keeps it. The base is not mutated.
    #[must_use]
    pub fn merged(&self, overrides: &ConfigOverride) -> Self {
        Self {
            model_name: overrides
                .model_name
                .clone()
                .or_else(|| self.model_name.clone()),
            dim: overrides.dim.unwrap_or(self.dim),
            similarity: overrides.similarity.unwrap_or(self.similarity),
            query_maxlen: overrides.query_maxlen.unwrap_or(self.query_maxlen),
            doc_maxlen: overrides.doc_maxlen.unwrap_or(self.doc_maxlen),
            mask_punctuation: overrides.mask_punctuation.unwrap_or(self.mask_punctuation),
            query_token: overrides
                .query_token
                .clone()
                .unwrap_or_else(|| self.query_token.clone()),
            doc_token: overrides
                .doc_token
                .clone()
                .unwrap_or_else(|| self.doc_token.clone()),
            attend_to_mask_tokens: overrides
                .attend_to_mask_tokens
                .unwrap_or(self.attend_to_mask_tokens),
        }
    }

    /// Persist the configuration into a checkpoint directory as
    /// `retrieval_config.json`.
    ///
    /// # Errors
    /// - `CheckpointError::IoError` if the file cannot be written
    pub fn save_for_checkpoint(&self, dir: impl AsRef<Path>) -> CheckpointResult<()> {
        let path = dir.as_ref().join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `CheckpointError::ConfigError` if:
    /// - dim == 0
    /// - query_maxlen == 0 or doc_maxlen == 0
    /// - query_token or doc_token is empty
    pub fn validate(&self) -> CheckpointResult<()> {
        if self.dim == 0 {
            return Err(CheckpointError::ConfigError {
                message: "dim must be > 0".to_string(),
            });
        }
        if self.query_maxlen == 0 {
            return Err(CheckpointError::ConfigError {
                message: "query_maxlen must be > 0".to_string(),
            });
        }
        if self.doc_maxlen == 0 {
            return Err(CheckpointError::ConfigError {
                message: "doc_maxlen must be > 0".to_string(),
            });
        }
        if self.query_token.is_empty() {
            return Err(CheckpointError::ConfigError {
                message: "query_token cannot be empty".to_string(),
            });
        }
        if self.doc_token.is_empty() {
            return Err(CheckpointError::ConfigError {
                message: "doc_token cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CONFIG OVERRIDE
// ============================================================================

/// Partial configuration supplied by the caller at construction time.
///
/// Mirrors [`RetrievalConfig`] with every field optional. Unset fields
/// never shadow the checkpoint's stored values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub dim: Option<usize>,
    #[serde(default)]
    pub similarity: Option<Similarity>,
    #[serde(default)]
    pub query_maxlen: Option<usize>,
    #[serde(default)]
    pub doc_maxlen: Option<usize>,
    #[serde(default)]
    pub mask_punctuation: Option<bool>,
    #[serde(default)]
    pub query_token: Option<String>,
    #[serde(default)]
    pub doc_token: Option<String>,
    #[serde(default)]
    pub attend_to_mask_tokens: Option<bool>,
}

impl ConfigOverride {
    /// True when no field is set; merging is then the identity.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
