//! Error type for checkpoint loading and saving failures.
//!
//! | Category | Variants | Typical cause |
//! |----------|----------|---------------|
//! | Source | CheckpointNotFound, HubError | bad path / registry fetch |
//! | Model | ModelResolutionError, WeightLoadError | unknown architecture, corrupt weights |
//! | Device | DeviceUnavailable | accelerator index does not exist |
//! | Save | ReservedExtension | legacy `.dnn` target path |
//! | Config | ConfigError, TokenizerError | invalid stored or merged state |
//! | Infrastructure | IoError, SerializationError | filesystem, JSON |
//!
//! Errors propagate immediately; nothing is caught or retried internally
//! except the single architecture-resolution fallback documented on
//! [`crate::arch::resolve_architecture`].

use std::path::PathBuf;

use thiserror::Error;

/// Error type for checkpoint loading and saving failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    // === Source Resolution Errors ===
    /// The checkpoint source is neither a local directory nor a fetchable
    /// registry name, or a mandatory file is missing from it.
    #[error("Checkpoint not found: {source_id} ({reason})")]
    CheckpointNotFound { source_id: String, reason: String },

    /// A registry fetch failed (network, auth, unknown repo).
    #[error("Hub fetch failed for {repo}: {source}")]
    HubError {
        repo: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // === Model Errors ===
    /// No architecture could be resolved for the model name, after applying
    /// the caller's resolution policy.
    #[error("Model resolution failed for {name:?}")]
    ModelResolutionError { name: String },

    /// Weight file parsing or tensor placement failed.
    #[error("Weight load failed for {path:?}: {source}")]
    WeightLoadError {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // === Device Errors ===
    /// The requested accelerator does not exist or could not be initialized.
    /// Construction never falls back to CPU on its own.
    #[error("Device {request} unavailable: {message}")]
    DeviceUnavailable { request: String, message: String },

    // === Save Errors ===
    /// The save target ends with the `.dnn` suffix reserved for the
    /// deprecated single-file checkpoint format. Raised before any I/O.
    #[error("Refusing to save to {path:?}: extension {extension:?} is reserved for the legacy single-file format")]
    ReservedExtension { path: PathBuf, extension: &'static str },

    // === Configuration Errors ===
    /// Stored or merged retrieval configuration failed validation.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Tokenizer load or save failed.
    #[error("Tokenizer error: {message}")]
    TokenizerError { message: String },

    // === Infrastructure Errors ===
    /// File I/O error (weight files, config files, directory creation).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type alias for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    // ============================================================
    // DISPLAY TESTS
    // ============================================================

    #[test]
    fn test_checkpoint_not_found_shows_source_and_reason() {
        let err = CheckpointError::CheckpointNotFound {
            source_id: "missing/repo".to_string(),
            reason: "no config.json".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("missing/repo"));
        assert!(msg.contains("no config.json"));
    }

    #[test]
    fn test_model_resolution_error_shows_name() {
        let err = CheckpointError::ModelResolutionError {
            name: "totally-unknown-arch".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("totally-unknown-arch"));
    }

    #[test]
    fn test_device_unavailable_shows_request() {
        let err = CheckpointError::DeviceUnavailable {
            request: "cuda:2".to_string(),
            message: "no CUDA devices".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cuda:2"));
        assert!(msg.contains("no CUDA devices"));
    }

    #[test]
    fn test_reserved_extension_names_the_suffix() {
        let err = CheckpointError::ReservedExtension {
            path: PathBuf::from("/tmp/out.dnn"),
            extension: ".dnn",
        };
        let msg = format!("{}", err);
        assert!(msg.contains(".dnn"));
        assert!(msg.contains("reserved"));
    }

    #[test]
    fn test_weight_load_error_preserves_source() {
        let root = std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated header");
        let err = CheckpointError::WeightLoadError {
            path: PathBuf::from("model.safetensors"),
            source: Box::new(root),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("model.safetensors"));
        assert!(msg.contains("truncated header"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_hub_error_preserves_source() {
        let root = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout");
        let err = CheckpointError::HubError {
            repo: "org/model".to_string(),
            source: Box::new(root),
        };
        assert!(format!("{}", err).contains("org/model"));
        let source_msg = format!("{}", err.source().unwrap());
        assert!(source_msg.contains("connect timeout"));
    }

    // ============================================================
    // CONVERSION TESTS
    // ============================================================

    #[test]
    fn test_io_error_conversion_via_question_mark() {
        fn fallible_io() -> CheckpointResult<()> {
            let _ = std::fs::read("/nonexistent/path/that/does/not/exist/12345")?;
            Ok(())
        }
        assert!(matches!(
            fallible_io(),
            Err(CheckpointError::IoError(_))
        ));
    }

    #[test]
    fn test_serde_error_conversion_via_question_mark() {
        fn fallible_parse() -> CheckpointResult<serde_json::Value> {
            Ok(serde_json::from_str("{not valid json")?)
        }
        assert!(matches!(
            fallible_parse(),
            Err(CheckpointError::SerializationError(_))
        ));
    }

    // ============================================================
    // SEND + SYNC TESTS
    // ============================================================

    #[test]
    fn test_checkpoint_error_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CheckpointError>();
    }

    #[test]
    fn test_checkpoint_error_is_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<CheckpointError>();
    }
}
