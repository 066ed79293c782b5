//! The checkpoint adapter.
//!
//! [`Checkpoint::load`] turns a source string into a fully resolved handle:
//! retrieval configuration (stored values with the caller's override merged
//! on top), an explicitly requested device, a resolved architecture,
//! partitioned weights, and the tokenizer. [`Checkpoint::save`] writes the
//! handle back out as a checkpoint directory.

use std::path::Path;

use candle_core::Device;
use tokenizers::Tokenizer;

use crate::arch::{resolve_architecture, Architecture, ResolutionPolicy};
use crate::config::{ConfigOverride, RetrievalConfig};
use crate::device::DeviceRequest;
use crate::error::{CheckpointError, CheckpointResult};
use crate::source::{CheckpointSource, TOKENIZER_FILE};
use crate::weights::{ModelWeights, TransformerConfig};

/// Suffix of the deprecated single-file checkpoint format. Save targets
/// ending in it are refused before any filesystem I/O.
pub const RESERVED_EXTENSION: &str = ".dnn";

// ============================================================================
// LOAD OPTIONS
// ============================================================================

/// Options for [`Checkpoint::load`].
///
/// Defaults: no configuration override, CPU device, architecture fallback
/// to [`crate::arch::DEFAULT_FALLBACK_MODEL`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Configuration fields merged over the checkpoint's stored values.
    pub config_override: Option<ConfigOverride>,

    /// Device the model weights are placed on. Never falls back: an
    /// unavailable accelerator fails construction.
    pub device: DeviceRequest,

    /// What to do when architecture lookup fails for the model name.
    pub resolution: ResolutionPolicy,
}

// ============================================================================
// CHECKPOINT
// ============================================================================

/// A loaded late-interaction retrieval checkpoint.
///
/// The handle is read-only once constructed; [`Checkpoint::save`] persists
/// it without touching in-memory state, so saving is repeatable. Sub-network
/// views (`lm`, `projection`, `score_scaler`) are capability queries on
/// [`ModelWeights`], reachable through [`Checkpoint::model`].
///
/// ```rust,ignore
/// let checkpoint = Checkpoint::load("colbert-ir/colbertv2.0", LoadOptions::default())?;
/// let dim = checkpoint.config().dim;
/// let projection = checkpoint.model().projection();
/// checkpoint.save("exported/colbertv2")?;
/// ```
pub struct Checkpoint {
    name: String,
    source: CheckpointSource,
    config: RetrievalConfig,
    model: ModelWeights,
    tokenizer: Tokenizer,
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("config", &self.config)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Checkpoint {
    /// Load a checkpoint from a local directory path or a hub repo id.
    ///
    /// Resolution order:
    /// 1. Classify and locate the source (hub files land in the local cache).
    /// 2. Resolve the retrieval configuration: stored file if present, else
    ///    defaults; merge the override on top; validate.
    /// 3. Pick the model name: configured `model_name`, else the source
    ///    string.
    /// 4. Resolve the requested device.
    /// 5. Resolve the architecture from `config.json`'s `model_type`, the
    ///    model name, and the resolution policy.
    /// 6. Load and partition the weights onto the device.
    /// 7. Load the tokenizer.
    ///
    /// The returned handle is inference-only; weights are immutable
    /// constants on the chosen device.
    ///
    /// # Errors
    /// Any step failing aborts construction with the corresponding
    /// [`CheckpointError`] variant; there are no partial handles.
    pub fn load(source: &str, options: LoadOptions) -> CheckpointResult<Self> {
        let parsed = CheckpointSource::parse(source)?;
        let files = parsed.locate()?;

        let stored = match &files.retrieval_config {
            Some(path) => Some(RetrievalConfig::from_file(path)?),
            None => None,
        };
        let base = stored.unwrap_or_default();
        let config = match &options.config_override {
            Some(overrides) => base.merged(overrides),
            None => base,
        };
        config.validate()?;

        let name = config
            .model_name
            .clone()
            .unwrap_or_else(|| source.to_string());

        let device = options.device.resolve()?;

        let header = TransformerConfig::from_file(&files.config)?;
        let architecture =
            resolve_architecture(&name, header.model_type.as_deref(), &options.resolution)?;

        let model = ModelWeights::load(&files, header, architecture, config.dim, &device)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
            CheckpointError::TokenizerError {
                message: e.to_string(),
            }
        })?;

        tracing::info!(
            name = %name,
            source = %parsed,
            architecture = %architecture,
            device = %options.device,
            dim = config.dim,
            params = model.param_count(),
            "Loaded checkpoint"
        );

        Ok(Self {
            name,
            source: parsed,
            config,
            model,
            tokenizer,
        })
    }

    /// Persist the checkpoint into `target_dir`.
    ///
    /// Refuses targets whose final component ends with
    /// [`RESERVED_EXTENSION`] before any filesystem I/O. Otherwise creates
    /// the directory and writes, in order: the model weights with their
    /// `config.json` header, the tokenizer, the retrieval configuration.
    /// The steps are not transactional; a failure partway leaves the files
    /// already written in place.
    ///
    /// # Errors
    /// - `CheckpointError::ReservedExtension` for a `.dnn` target
    /// - `CheckpointError::WeightLoadError`, `TokenizerError`, `IoError`
    ///   from the individual persist steps
    pub fn save(&self, target_dir: impl AsRef<Path>) -> CheckpointResult<()> {
        let dir = target_dir.as_ref();
        if is_reserved_target(dir) {
            return Err(CheckpointError::ReservedExtension {
                path: dir.to_path_buf(),
                extension: RESERVED_EXTENSION,
            });
        }
        std::fs::create_dir_all(dir)?;

        self.model.save(dir)?;
        self.tokenizer
            .save(dir.join(TOKENIZER_FILE), false)
            .map_err(|e| CheckpointError::TokenizerError {
                message: e.to_string(),
            })?;
        self.config.save_for_checkpoint(dir)?;

        tracing::info!(dir = %dir.display(), name = %self.name, "Saved checkpoint");
        Ok(())
    }

    // === Accessors ===

    /// Display/model name resolved at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the checkpoint was loaded from.
    pub fn source(&self) -> &CheckpointSource {
        &self.source
    }

    /// The resolved retrieval configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The partitioned, device-bound model weights.
    pub fn model(&self) -> &ModelWeights {
        &self.model
    }

    /// The checkpoint's tokenizer.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Architecture family the weights were loaded under.
    pub fn architecture(&self) -> Architecture {
        self.model.architecture()
    }

    /// Device the weights live on.
    pub fn device(&self) -> &Device {
        self.model.device()
    }
}

/// True when the final path component carries the reserved extension.
/// Matches the literal suffix only; `.DNN` is a different (allowed) name.
fn is_reserved_target(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(RESERVED_EXTENSION))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CONFIG_FILE, WEIGHTS_FILE};
    use tempfile::tempdir;

    // ============================================================
    // RESERVED TARGET TESTS
    // ============================================================

    #[test]
    fn test_reserved_target_detection() {
        assert!(is_reserved_target(Path::new("out/model.dnn")));
        assert!(is_reserved_target(Path::new("model.dnn")));
        assert!(!is_reserved_target(Path::new("out/model")));
        assert!(!is_reserved_target(Path::new("out/model.dnnx")));
        // Only the final component counts.
        assert!(!is_reserved_target(Path::new("model.dnn/export")));
        // Only the literal lowercase suffix is reserved.
        assert!(!is_reserved_target(Path::new("out/model.DNN")));
    }

    // ============================================================
    // LOAD OPTION TESTS
    // ============================================================

    #[test]
    fn test_load_options_defaults() {
        let options = LoadOptions::default();
        assert!(options.config_override.is_none());
        assert_eq!(options.device, DeviceRequest::Cpu);
        assert_eq!(
            options.resolution,
            ResolutionPolicy::FallbackTo(crate::arch::DEFAULT_FALLBACK_MODEL.to_string())
        );
    }

    // ============================================================
    // EARLY FAILURE TESTS (no weight fixtures needed)
    // ============================================================

    #[test]
    fn test_load_empty_source_fails() {
        let result = Checkpoint::load("", LoadOptions::default());
        assert!(matches!(
            result,
            Err(CheckpointError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn test_load_incomplete_directory_fails() {
        let dir = tempdir().unwrap();
        // Directory exists but holds no checkpoint files.
        let result = Checkpoint::load(dir.path().to_str().unwrap(), LoadOptions::default());
        match result {
            Err(CheckpointError::CheckpointNotFound { reason, .. }) => {
                assert!(reason.contains(CONFIG_FILE));
            }
            other => panic!("expected CheckpointNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_invalid_stored_config_fails_before_weights() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();
        // Deliberately unparseable as weights; config resolution must fail
        // first, so this file is never opened.
        std::fs::write(dir.path().join(WEIGHTS_FILE), b"").unwrap();
        std::fs::write(
            dir.path().join(RetrievalConfig::FILE_NAME),
            "{not valid json",
        )
        .unwrap();

        let result = Checkpoint::load(dir.path().to_str().unwrap(), LoadOptions::default());
        assert!(matches!(
            result,
            Err(CheckpointError::SerializationError(_))
        ));
    }

    #[test]
    fn test_load_invalid_merged_config_fails_validation() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), b"").unwrap();
        std::fs::write(dir.path().join(RetrievalConfig::FILE_NAME), r#"{"dim": 0}"#).unwrap();

        let result = Checkpoint::load(dir.path().to_str().unwrap(), LoadOptions::default());
        match result {
            Err(CheckpointError::ConfigError { message }) => {
                assert!(message.contains("dim"));
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_load_override_can_invalidate_stored_config() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), b"").unwrap();
        // Stored config is fine; the override breaks it.
        std::fs::write(dir.path().join(RetrievalConfig::FILE_NAME), r#"{"dim": 128}"#).unwrap();

        let options = LoadOptions {
            config_override: Some(ConfigOverride {
                query_maxlen: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = Checkpoint::load(dir.path().to_str().unwrap(), options);
        match result {
            Err(CheckpointError::ConfigError { message }) => {
                assert!(message.contains("query_maxlen"));
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }
}
