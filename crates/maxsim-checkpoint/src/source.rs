//! Checkpoint source resolution and file discovery.
//!
//! A checkpoint source string is either a local directory or a hub repo id;
//! an existing path wins. Locating a source yields concrete file paths for
//! the HF checkpoint layout (hub files resolve into the hf-hub cache):
//! `config.json`, `tokenizer.json`, a weight container, and optionally the
//! stored retrieval configuration.
//!
//! Weight container preference order: `model.safetensors`, then a sharded
//! `model.safetensors.index.json`, then any loose `*.safetensors` files,
//! then the legacy `pytorch_model.bin` pickle. Hub discovery reads the
//! repo's file listing before fetching anything, so a missing optional
//! file is never confused with a failed download.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::Deserialize;

use crate::config::RetrievalConfig;
use crate::error::{CheckpointError, CheckpointResult};

/// HF model configuration file name.
pub const CONFIG_FILE: &str = "config.json";
/// Tokenizer state file name.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Single-file safetensors weight container.
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Index file of a sharded safetensors container.
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
/// Legacy pytorch pickle weight container.
pub const LEGACY_WEIGHTS_FILE: &str = "pytorch_model.bin";

/// Weight container format of a located checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Safetensors,
    /// Legacy `pytorch_model.bin` pickle.
    Pickle,
}

/// Shard map of `model.safetensors.index.json`.
#[derive(Debug, Deserialize)]
struct WeightsIndex {
    weight_map: std::collections::BTreeMap<String, String>,
}

/// Where a checkpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    /// A checkpoint directory on the local filesystem.
    Local(PathBuf),

    /// A hub repository, fetched through the blocking hf-hub api (files
    /// land in the local hub cache).
    Hub { repo: String, revision: String },
}

/// Resolved local paths of the files making up one checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    /// One file, or every shard of a sharded container, in index order.
    pub weights: Vec<PathBuf>,
    pub format: WeightFormat,
    /// Stored retrieval configuration, when the checkpoint carries one.
    pub retrieval_config: Option<PathBuf>,
}

impl CheckpointSource {
    /// Classify a source string. An existing filesystem path is a local
    /// checkpoint; anything else is treated as a hub repo id at revision
    /// `main`.
    ///
    /// # Errors
    /// Returns `CheckpointError::CheckpointNotFound` for an empty source.
    pub fn parse(source: &str) -> CheckpointResult<Self> {
        if source.trim().is_empty() {
            return Err(CheckpointError::CheckpointNotFound {
                source_id: source.to_string(),
                reason: "empty checkpoint source".to_string(),
            });
        }
        let path = Path::new(source);
        if path.exists() {
            Ok(CheckpointSource::Local(path.to_path_buf()))
        } else {
            Ok(CheckpointSource::Hub {
                repo: source.to_string(),
                revision: "main".to_string(),
            })
        }
    }

    /// Identifier used in logs and error messages.
    pub fn id(&self) -> String {
        match self {
            CheckpointSource::Local(path) => path.display().to_string(),
            CheckpointSource::Hub { repo, revision } => format!("{}@{}", repo, revision),
        }
    }

    /// Locate the checkpoint's files, fetching hub artifacts as needed.
    ///
    /// # Errors
    /// - `CheckpointError::CheckpointNotFound` if a mandatory file is
    ///   missing or the repo cannot be resolved
    /// - `CheckpointError::HubError` for transport failures after the repo
    ///   resolved
    pub fn locate(&self) -> CheckpointResult<CheckpointFiles> {
        match self {
            CheckpointSource::Local(dir) => locate_local(dir),
            CheckpointSource::Hub { repo, revision } => fetch_hub(repo, revision),
        }
    }
}

impl std::fmt::Display for CheckpointSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id())
    }
}

fn not_found(source: &dyn std::fmt::Display, reason: impl Into<String>) -> CheckpointError {
    CheckpointError::CheckpointNotFound {
        source_id: source.to_string(),
        reason: reason.into(),
    }
}

fn locate_local(dir: &Path) -> CheckpointResult<CheckpointFiles> {
    if !dir.is_dir() {
        return Err(not_found(&dir.display(), "not a checkpoint directory"));
    }

    let config = dir.join(CONFIG_FILE);
    if !config.exists() {
        return Err(not_found(&dir.display(), format!("missing {}", CONFIG_FILE)));
    }
    let tokenizer = dir.join(TOKENIZER_FILE);
    if !tokenizer.exists() {
        return Err(not_found(
            &dir.display(),
            format!("missing {}", TOKENIZER_FILE),
        ));
    }

    let (weights, format) = locate_local_weights(dir)?;

    let retrieval_config = Some(dir.join(RetrievalConfig::FILE_NAME)).filter(|p| p.exists());

    tracing::debug!(
        dir = %dir.display(),
        files = weights.len(),
        ?format,
        "Located local checkpoint"
    );

    Ok(CheckpointFiles {
        config,
        tokenizer,
        weights,
        format,
        retrieval_config,
    })
}

fn locate_local_weights(dir: &Path) -> CheckpointResult<(Vec<PathBuf>, WeightFormat)> {
    let single = dir.join(WEIGHTS_FILE);
    if single.exists() {
        return Ok((vec![single], WeightFormat::Safetensors));
    }

    let index = dir.join(WEIGHTS_INDEX_FILE);
    if index.exists() {
        let shards = read_shard_names(&index)?;
        let mut files = Vec::with_capacity(shards.len());
        for shard in shards {
            let path = dir.join(&shard);
            if !path.exists() {
                return Err(not_found(
                    &dir.display(),
                    format!("missing weight shard {}", shard),
                ));
            }
            files.push(path);
        }
        return Ok((files, WeightFormat::Safetensors));
    }

    // Any loose safetensors files, name-sorted for determinism.
    let mut loose: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    loose.sort();
    if !loose.is_empty() {
        return Ok((loose, WeightFormat::Safetensors));
    }

    let legacy = dir.join(LEGACY_WEIGHTS_FILE);
    if legacy.exists() {
        return Ok((vec![legacy], WeightFormat::Pickle));
    }

    Err(not_found(&dir.display(), "no model weights found"))
}

fn read_shard_names(index: &Path) -> CheckpointResult<Vec<String>> {
    let contents = std::fs::read_to_string(index)?;
    let parsed: WeightsIndex = serde_json::from_str(&contents)?;
    let unique: BTreeSet<String> = parsed.weight_map.into_values().collect();
    Ok(unique.into_iter().collect())
}

/// Weight container choice from a hub repo's file listing. Mirrors the
/// local discovery order.
#[derive(Debug, PartialEq, Eq)]
enum HubWeights {
    Single,
    Sharded,
    /// Top-level loose `*.safetensors` names, sorted.
    Loose(Vec<String>),
    Legacy,
}

fn select_hub_weights(available: &BTreeSet<String>) -> Option<HubWeights> {
    if available.contains(WEIGHTS_FILE) {
        return Some(HubWeights::Single);
    }
    if available.contains(WEIGHTS_INDEX_FILE) {
        return Some(HubWeights::Sharded);
    }
    let loose: Vec<String> = available
        .iter()
        .filter(|name| name.ends_with(".safetensors") && !name.contains('/'))
        .cloned()
        .collect();
    if !loose.is_empty() {
        return Some(HubWeights::Loose(loose));
    }
    if available.contains(LEGACY_WEIGHTS_FILE) {
        return Some(HubWeights::Legacy);
    }
    None
}

fn fetch_hub(repo: &str, revision: &str) -> CheckpointResult<CheckpointFiles> {
    let api = Api::new().map_err(|e| CheckpointError::HubError {
        repo: repo.to_string(),
        source: Box::new(e),
    })?;
    let api = api.repo(Repo::with_revision(
        repo.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    // The file listing doubles as the existence check for the repo itself.
    // Every fetch below names a listed file, so a fetch failure is a
    // transport error, never a missing file.
    let info = api
        .info()
        .map_err(|e| not_found(&repo, format!("cannot list repo files: {}", e)))?;
    let available: BTreeSet<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
    let fetch = |name: &str| -> CheckpointResult<PathBuf> {
        api.get(name).map_err(|e| CheckpointError::HubError {
            repo: repo.to_string(),
            source: Box::new(e),
        })
    };

    if !available.contains(CONFIG_FILE) {
        return Err(not_found(&repo, format!("missing {}", CONFIG_FILE)));
    }
    if !available.contains(TOKENIZER_FILE) {
        return Err(not_found(&repo, format!("missing {}", TOKENIZER_FILE)));
    }
    let config = fetch(CONFIG_FILE)?;
    let tokenizer = fetch(TOKENIZER_FILE)?;

    let (weights, format) = match select_hub_weights(&available) {
        Some(HubWeights::Single) => (vec![fetch(WEIGHTS_FILE)?], WeightFormat::Safetensors),
        Some(HubWeights::Sharded) => {
            let index = fetch(WEIGHTS_INDEX_FILE)?;
            let mut files = Vec::new();
            for shard in read_shard_names(&index)? {
                if !available.contains(&shard) {
                    return Err(not_found(&repo, format!("missing weight shard {}", shard)));
                }
                files.push(fetch(&shard)?);
            }
            (files, WeightFormat::Safetensors)
        }
        Some(HubWeights::Loose(names)) => {
            let mut files = Vec::with_capacity(names.len());
            for name in &names {
                files.push(fetch(name)?);
            }
            (files, WeightFormat::Safetensors)
        }
        Some(HubWeights::Legacy) => {
            tracing::debug!(repo, "No safetensors on hub, using legacy pickle");
            (vec![fetch(LEGACY_WEIGHTS_FILE)?], WeightFormat::Pickle)
        }
        None => return Err(not_found(&repo, "no model weights found")),
    };

    // Absent from the listing means the checkpoint carries no stored
    // retrieval configuration.
    let retrieval_config = if available.contains(RetrievalConfig::FILE_NAME) {
        Some(fetch(RetrievalConfig::FILE_NAME)?)
    } else {
        None
    };

    tracing::info!(repo, revision, files = weights.len(), "Fetched hub checkpoint");

    Ok(CheckpointFiles {
        config,
        tokenizer,
        weights,
        format,
        retrieval_config,
    })
}

// ============================================================================
// TESTS
// ============================================================================
