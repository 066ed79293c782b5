//! Weight loading, partitioning, and saving.
//!
//! A late-interaction checkpoint's state dict holds three groups of tensors:
//! the language-model sub-network (usually under an architecture prefix such
//! as `bert.`), the projection head `linear.*` mapping hidden states to the
//! retrieval dimension, and an optional `score_scaler.*` calibration layer.
//! [`ModelWeights`] owns the partitioned groups, bound to one device for its
//! whole lifetime.
//!
//! Weights here are inference-only: candle tensors are immutable constants,
//! so there is no train/eval mode to switch.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::Linear;
use serde::{Deserialize, Serialize};

use crate::arch::Architecture;
use crate::error::{CheckpointError, CheckpointResult};
use crate::source::{CheckpointFiles, WeightFormat, CONFIG_FILE, WEIGHTS_FILE};

/// Weight name of the projection matrix.
const PROJECTION_WEIGHT: &str = "linear.weight";
/// Weight name of the optional projection bias.
const PROJECTION_BIAS: &str = "linear.bias";
/// Prefix of the optional score calibration layer.
const SCORE_SCALER_PREFIX: &str = "score_scaler.";

/// Standard deviation used when the projection head has to be initialized
/// from scratch (checkpoint predates the head or is a plain base model).
const PROJECTION_INIT_STD: f32 = 0.02;

/// Hidden dimension assumed when `config.json` does not declare one.
const DEFAULT_HIDDEN_SIZE: usize = 768;

// ============================================================================
// TRANSFORMER CONFIG (config.json)
// ============================================================================

/// The checkpoint's `config.json`.
///
/// Only the fields this adapter acts on are typed; everything else is
/// carried in `extra` so a save writes the header back without losing
/// fields it does not understand. Fields absent from the header stay
/// absent on save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Declared architecture family, e.g. `"bert"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    /// Hidden dimension of the language model, when the header declares
    /// one. [`ModelWeights::hidden_size`] applies the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<usize>,

    /// All remaining `config.json` fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TransformerConfig {
    /// Read a `config.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Write the header as `config.json` inside a checkpoint directory.
    pub fn save_for_checkpoint(&self, dir: impl AsRef<Path>) -> CheckpointResult<()> {
        let path = dir.as_ref().join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

// ============================================================================
// MODEL WEIGHTS
// ============================================================================

/// Partitioned, device-bound weights of a loaded checkpoint.
///
/// Sub-network views (`lm`, `projection`, `score_scaler`) are capability
/// queries on this handle; the adapter holding it does not duplicate them.
#[derive(Debug)]
pub struct ModelWeights {
    architecture: Architecture,
    device: Device,
    config: TransformerConfig,
    /// Language-model tensors keyed by their stored names.
    lm: BTreeMap<String, Tensor>,
    projection: Linear,
    score_scaler: Option<Linear>,
}

impl ModelWeights {
    /// Load and partition the weights of a located checkpoint onto `device`.
    ///
    /// `config` is the checkpoint's parsed `config.json` header (the caller
    /// already read it to resolve `architecture`). `dim` is the projection
    /// output dimension from the resolved retrieval configuration. A
    /// checkpoint that carries no projection head gets a randomly
    /// initialized one (N(0, 0.02), no bias), as a base model being adapted
    /// for retrieval has nothing to load there yet.
    ///
    /// # Errors
    /// - `CheckpointError::WeightLoadError` if a weight file cannot be
    ///   parsed or a tensor cannot be placed on the device
    /// - `CheckpointError::ConfigError` if a stored projection head
    ///   contradicts `dim`
    pub fn load(
        files: &CheckpointFiles,
        config: TransformerConfig,
        architecture: Architecture,
        dim: usize,
        device: &Device,
    ) -> CheckpointResult<Self> {
        let raw = read_state_dict(files, device)?;
        Self::from_state_dict(raw, config, architecture, dim, device)
    }

    /// Partition an in-memory state dict. Split out from [`Self::load`] so
    /// tests can drive it without on-disk fixtures.
    fn from_state_dict(
        mut raw: HashMap<String, Tensor>,
        config: TransformerConfig,
        architecture: Architecture,
        dim: usize,
        device: &Device,
    ) -> CheckpointResult<Self> {
        let projection_weight = raw.remove(PROJECTION_WEIGHT);
        let projection_bias = raw.remove(PROJECTION_BIAS);
        let scaler_weight = raw.remove("score_scaler.weight");
        let scaler_bias = raw.remove("score_scaler.bias");
        // A bias with no matching weight is a malformed head.
        if projection_weight.is_none() && projection_bias.is_some() {
            return Err(CheckpointError::ConfigError {
                message: format!("orphaned {} without {}", PROJECTION_BIAS, PROJECTION_WEIGHT),
            });
        }
        if scaler_weight.is_none() && scaler_bias.is_some() {
            return Err(CheckpointError::ConfigError {
                message: "orphaned score_scaler.bias without score_scaler.weight".to_string(),
            });
        }
        // Anything else under the scaler prefix would be silently dropped
        // by the partition below; reject it instead.
        if let Some(name) = raw.keys().find(|k| k.starts_with(SCORE_SCALER_PREFIX)) {
            return Err(CheckpointError::ConfigError {
                message: format!("unrecognized score scaler tensor: {}", name),
            });
        }

        let lm = partition_lm(raw, architecture);

        let projection = match projection_weight {
            Some(weight) => {
                let dims = weight.dims().to_vec();
                if dims.len() != 2 || dims[0] != dim {
                    return Err(CheckpointError::ConfigError {
                        message: format!(
                            "projection dimension mismatch: configuration says {}, checkpoint stores {:?}",
                            dim, dims
                        ),
                    });
                }
                Linear::new(weight, projection_bias)
            }
            None => {
                let hidden_size = config.hidden_size.unwrap_or(DEFAULT_HIDDEN_SIZE);
                tracing::info!(
                    dim,
                    hidden_size,
                    "Checkpoint has no projection head, initializing randomly"
                );
                let weight = Tensor::randn(0f32, PROJECTION_INIT_STD, (dim, hidden_size), device)
                    .map_err(|e| CheckpointError::WeightLoadError {
                        path: WEIGHTS_FILE.into(),
                        source: Box::new(e),
                    })?;
                Linear::new(weight, None)
            }
        };

        let score_scaler = scaler_weight.map(|w| Linear::new(w, scaler_bias));

        let weights = Self {
            architecture,
            device: device.clone(),
            config,
            lm,
            projection,
            score_scaler,
        };

        tracing::info!(
            architecture = %weights.architecture,
            lm_tensors = weights.lm.len(),
            params = weights.param_count(),
            scaled = weights.score_scaler.is_some(),
            "Partitioned checkpoint weights"
        );

        Ok(weights)
    }

    // === Capability queries ===

    /// Architecture family the weights were partitioned under.
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Device every tensor of this handle lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The checkpoint's `config.json` header.
    pub fn transformer_config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Hidden dimension of the language model. Falls back to 768 when the
    /// header does not declare one.
    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size.unwrap_or(DEFAULT_HIDDEN_SIZE)
    }

    /// The language-model sub-network, keyed by stored tensor names.
    pub fn lm(&self) -> &BTreeMap<String, Tensor> {
        &self.lm
    }

    /// A single LM tensor by its stored name.
    pub fn lm_tensor(&self, name: &str) -> Option<&Tensor> {
        self.lm.get(name)
    }

    /// The projection head mapping hidden states to the retrieval dimension.
    pub fn projection(&self) -> &Linear {
        &self.projection
    }

    /// Output dimension of the projection head.
    pub fn projection_dim(&self) -> usize {
        self.projection.weight().dims()[0]
    }

    /// The optional score calibration layer.
    pub fn score_scaler(&self) -> Option<&Linear> {
        self.score_scaler.as_ref()
    }

    /// Total parameter count across all partitions.
    pub fn param_count(&self) -> usize {
        let lm: usize = self.lm.values().map(Tensor::elem_count).sum();
        let projection = self.projection.weight().elem_count()
            + self.projection.bias().map_or(0, Tensor::elem_count);
        let scaler = self.score_scaler.as_ref().map_or(0, |s| {
            s.weight().elem_count() + s.bias().map_or(0, Tensor::elem_count)
        });
        lm + projection + scaler
    }

    /// Persist the model into a checkpoint directory: every partition goes
    /// back into one `model.safetensors` under its stored names, followed
    /// by the `config.json` header.
    ///
    /// # Errors
    /// - `CheckpointError::WeightLoadError` if tensor serialization fails
    /// - `CheckpointError::IoError` if the files cannot be written
    pub fn save(&self, dir: impl AsRef<Path>) -> CheckpointResult<()> {
        let dir = dir.as_ref();
        let mut tensors: HashMap<String, Tensor> = HashMap::with_capacity(self.lm.len() + 4);
        for (name, tensor) in &self.lm {
            tensors.insert(name.clone(), tensor.clone());
        }
        tensors.insert(PROJECTION_WEIGHT.to_string(), self.projection.weight().clone());
        if let Some(bias) = self.projection.bias() {
            tensors.insert(PROJECTION_BIAS.to_string(), bias.clone());
        }
        if let Some(scaler) = &self.score_scaler {
            tensors.insert("score_scaler.weight".to_string(), scaler.weight().clone());
            if let Some(bias) = scaler.bias() {
                tensors.insert("score_scaler.bias".to_string(), bias.clone());
            }
        }

        let path = dir.join(WEIGHTS_FILE);
        candle_core::safetensors::save(&tensors, &path).map_err(|e| {
            CheckpointError::WeightLoadError {
                path: path.clone(),
                source: Box::new(e),
            }
        })?;
        self.config.save_for_checkpoint(dir)?;

        tracing::debug!(path = %path.display(), tensors = tensors.len(), "Saved model weights");
        Ok(())
    }
}

/// Keep the LM group: tensors under the architecture prefix when the
/// checkpoint uses one, otherwise the whole bare-keyed state dict. Tensors
/// outside the prefix (e.g. pretraining heads like `cls.*`) are dropped,
/// matching what loading the checkpoint into a retrieval model keeps.
fn partition_lm(raw: HashMap<String, Tensor>, architecture: Architecture) -> BTreeMap<String, Tensor> {
    let prefix = format!("{}.", architecture.weight_prefix());
    let has_prefix = raw.keys().any(|k| k.starts_with(&prefix));
    if !has_prefix {
        tracing::debug!(
            prefix = architecture.weight_prefix(),
            "State dict has no architecture prefix, treating all keys as LM"
        );
        return raw.into_iter().collect();
    }

    let total = raw.len();
    let lm: BTreeMap<String, Tensor> = raw
        .into_iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .collect();
    let dropped = total - lm.len();
    if dropped > 0 {
        tracing::debug!(dropped, "Dropped tensors outside the LM prefix");
    }
    lm
}

/// Read every weight file of a checkpoint into one state dict on `device`.
fn read_state_dict(
    files: &CheckpointFiles,
    device: &Device,
) -> CheckpointResult<HashMap<String, Tensor>> {
    let mut raw: HashMap<String, Tensor> = HashMap::new();
    for path in &files.weights {
        let wrap = |e: candle_core::Error| CheckpointError::WeightLoadError {
            path: path.clone(),
            source: Box::new(e),
        };
        match files.format {
            WeightFormat::Safetensors => {
                let tensors = candle_core::safetensors::load(path, device).map_err(wrap)?;
                raw.extend(tensors);
            }
            WeightFormat::Pickle => {
                // The pickle reader materializes on CPU; move tensors over
                // afterwards.
                let tensors = candle_core::pickle::read_all(path).map_err(wrap)?;
                for (name, tensor) in tensors {
                    raw.insert(name, tensor.to_device(device).map_err(wrap)?);
                }
            }
        }
        tracing::debug!(path = %path.display(), total = raw.len(), "Read weight file");
    }
    Ok(raw)
}

// ============================================================================
// TESTS
// ============================================================================
