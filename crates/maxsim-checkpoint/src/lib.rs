//! Checkpoint adapter for late-interaction (MaxSim) retrieval models.
//!
//! This crate loads HF-layout transformer checkpoints (a local directory or
//! a hub repo id) and resolves everything a retrieval stack needs from
//! them: the stored retrieval configuration with caller overrides merged on
//! top, an explicitly requested device, the model architecture, the
//! partitioned weights, and the tokenizer. A loaded [`Checkpoint`] can be
//! persisted back out as a checkpoint directory.
//!
//! # Architecture
//!
//! - **Checkpoint**: one read-only handle binding configuration, device,
//!   weights, and tokenizer
//! - **RetrievalConfig / ConfigOverride**: stored hyperparameters plus
//!   per-field merge (override wins)
//! - **DeviceRequest**: explicit device selection; an unavailable
//!   accelerator fails construction, never silently falls back
//! - **ResolutionPolicy**: architecture lookup with a visible, logged
//!   fallback instead of a silent substitution
//! - **ModelWeights**: state dict partitioned into LM, projection, and
//!   optional score scaler, as capability queries
//!
//! # Example
//!
//! ```rust
//! use maxsim_checkpoint::{DeviceRequest, RetrievalConfig, Similarity};
//!
//! // Stored configs deserialize with these defaults
//! let config = RetrievalConfig::default();
//! assert_eq!(config.dim, 128);
//! assert_eq!(config.similarity, Similarity::Cosine);
//!
//! // Device selection is explicit
//! assert_eq!(DeviceRequest::from_index(Some(0)), DeviceRequest::Cuda(0));
//! assert_eq!(DeviceRequest::from_index(None), DeviceRequest::Cpu);
//! ```

pub mod arch;
pub mod checkpoint;
pub mod config;
pub mod device;
pub mod error;
pub mod source;
pub mod weights;

pub use checkpoint::{Checkpoint, LoadOptions, RESERVED_EXTENSION};
pub use config::{ConfigOverride, RetrievalConfig, Similarity};
pub use error::{CheckpointError, CheckpointResult};

// Resolution re-exports
pub use arch::{resolve_architecture, Architecture, ResolutionPolicy, DEFAULT_FALLBACK_MODEL};
pub use device::DeviceRequest;

// Source and weight re-exports for callers that drive the steps themselves
pub use source::{CheckpointFiles, CheckpointSource, WeightFormat};
pub use weights::{ModelWeights, TransformerConfig};
