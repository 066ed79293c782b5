//! Model architecture resolution.
//!
//! A checkpoint is usable only if we know which transformer family its
//! weights belong to: the family fixes the weight-name prefix (`bert.*`,
//! `roberta.*`, ...) used to partition the state dict. Resolution inputs, in
//! priority order:
//!
//! 1. the `model_type` field of the checkpoint's `config.json` (authoritative
//!    when present),
//! 2. substring heuristics on the model name,
//! 3. the caller's [`ResolutionPolicy`] when both fail.
//!
//! The policy makes the legacy "quietly retry as BERT" behavior an explicit,
//! logged choice instead of an implicit one.

use crate::error::{CheckpointError, CheckpointResult};

/// Model name used by the default fallback policy.
pub const DEFAULT_FALLBACK_MODEL: &str = "bert-base-uncased";

/// Transformer families this adapter knows how to partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Bert,
    Roberta,
    XlmRoberta,
    Distilbert,
    Electra,
    DebertaV2,
}

impl Architecture {
    /// Returns all supported architectures.
    pub fn all() -> &'static [Architecture] {
        &[
            Architecture::Bert,
            Architecture::Roberta,
            Architecture::XlmRoberta,
            Architecture::Distilbert,
            Architecture::Electra,
            Architecture::DebertaV2,
        ]
    }

    /// Canonical name, matching the HF `model_type` convention.
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Bert => "bert",
            Architecture::Roberta => "roberta",
            Architecture::XlmRoberta => "xlm-roberta",
            Architecture::Distilbert => "distilbert",
            Architecture::Electra => "electra",
            Architecture::DebertaV2 => "deberta-v2",
        }
    }

    /// Weight-name prefix of the language-model sub-network inside a
    /// checkpoint of this family. XLM-R checkpoints reuse the `roberta.`
    /// prefix.
    pub fn weight_prefix(&self) -> &'static str {
        match self {
            Architecture::Bert => "bert",
            Architecture::Roberta | Architecture::XlmRoberta => "roberta",
            Architecture::Distilbert => "distilbert",
            Architecture::Electra => "electra",
            Architecture::DebertaV2 => "deberta",
        }
    }

    /// Exact lookup from a `config.json` `model_type` value.
    pub fn from_model_type(model_type: &str) -> Option<Architecture> {
        match model_type {
            "bert" => Some(Architecture::Bert),
            "roberta" => Some(Architecture::Roberta),
            "xlm-roberta" => Some(Architecture::XlmRoberta),
            "distilbert" => Some(Architecture::Distilbert),
            "electra" => Some(Architecture::Electra),
            "deberta-v2" => Some(Architecture::DebertaV2),
            _ => None,
        }
    }

    /// Heuristic lookup from a model name or repo id.
    ///
    /// Most-specific substrings are tested first so `xlm-roberta-base` does
    /// not land on `Roberta` and `distilbert-base` does not land on `Bert`.
    /// Late-interaction checkpoints like `colbert-ir/colbertv2.0` resolve to
    /// `Bert` through the trailing substring, which matches their weights.
    pub fn from_model_name(name: &str) -> Option<Architecture> {
        let name = name.to_lowercase();
        if name.contains("xlm-roberta") || name.contains("xlm_roberta") {
            Some(Architecture::XlmRoberta)
        } else if name.contains("roberta") {
            Some(Architecture::Roberta)
        } else if name.contains("deberta") {
            Some(Architecture::DebertaV2)
        } else if name.contains("distilbert") {
            Some(Architecture::Distilbert)
        } else if name.contains("electra") {
            Some(Architecture::Electra)
        } else if name.contains("bert") || name.contains("minilm") {
            Some(Architecture::Bert)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when neither `model_type` nor the model name resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// Fail construction with `ModelResolutionError`.
    Strict,

    /// Retry the lookup exactly once with the given model name. If that
    /// also resolves to nothing, construction fails.
    FallbackTo(String),
}

impl Default for ResolutionPolicy {
    /// Mirrors the legacy behavior: unknown names retry as
    /// [`DEFAULT_FALLBACK_MODEL`].
    fn default() -> Self {
        ResolutionPolicy::FallbackTo(DEFAULT_FALLBACK_MODEL.to_string())
    }
}

/// Resolve the architecture for a model name.
///
/// `model_type` is the declared type from the checkpoint's `config.json`
/// and wins over name heuristics when it is recognized. On a failed
/// lookup the policy is applied; a fallback retry is logged at WARN since
/// loading weights under a guessed architecture is a caller-visible risk.
///
/// # Errors
/// Returns `CheckpointError::ModelResolutionError` under
/// `ResolutionPolicy::Strict`, or when the fallback name itself does not
/// resolve.
pub fn resolve_architecture(
    name: &str,
    model_type: Option<&str>,
    policy: &ResolutionPolicy,
) -> CheckpointResult<Architecture> {
    let direct = model_type
        .and_then(Architecture::from_model_type)
        .or_else(|| Architecture::from_model_name(name));

    if let Some(arch) = direct {
        return Ok(arch);
    }

    match policy {
        ResolutionPolicy::Strict => Err(CheckpointError::ModelResolutionError {
            name: name.to_string(),
        }),
        ResolutionPolicy::FallbackTo(fallback) => {
            tracing::warn!(
                name,
                fallback = fallback.as_str(),
                "Architecture lookup failed, retrying with fallback model name"
            );
            Architecture::from_model_name(fallback).ok_or_else(|| {
                CheckpointError::ModelResolutionError {
                    name: name.to_string(),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // LOOKUP TABLE TESTS
    // ============================================================

    #[test]
    fn test_from_model_type_known_values() {
        assert_eq!(
            Architecture::from_model_type("bert"),
            Some(Architecture::Bert)
        );
        assert_eq!(
            Architecture::from_model_type("xlm-roberta"),
            Some(Architecture::XlmRoberta)
        );
        assert_eq!(
            Architecture::from_model_type("deberta-v2"),
            Some(Architecture::DebertaV2)
        );
        assert_eq!(Architecture::from_model_type("gpt2"), None);
    }

    #[test]
    fn test_as_str_roundtrips_through_model_type() {
        for arch in Architecture::all() {
            assert_eq!(Architecture::from_model_type(arch.as_str()), Some(*arch));
        }
    }

    #[test]
    fn test_name_heuristics_order_most_specific_first() {
        assert_eq!(
            Architecture::from_model_name("xlm-roberta-base"),
            Some(Architecture::XlmRoberta)
        );
        assert_eq!(
            Architecture::from_model_name("roberta-base"),
            Some(Architecture::Roberta)
        );
        assert_eq!(
            Architecture::from_model_name("distilbert-base-uncased"),
            Some(Architecture::Distilbert)
        );
        assert_eq!(
            Architecture::from_model_name("bert-base-uncased"),
            Some(Architecture::Bert)
        );
    }

    #[test]
    fn test_colbert_checkpoints_resolve_as_bert() {
        assert_eq!(
            Architecture::from_model_name("colbert-ir/colbertv2.0"),
            Some(Architecture::Bert)
        );
    }

    #[test]
    fn test_unknown_name_resolves_to_none() {
        assert_eq!(Architecture::from_model_name("totally-unknown-arch"), None);
        assert_eq!(Architecture::from_model_name("gpt2-large"), None);
    }

    #[test]
    fn test_weight_prefix_xlm_roberta_shares_roberta() {
        assert_eq!(Architecture::XlmRoberta.weight_prefix(), "roberta");
        assert_eq!(Architecture::Roberta.weight_prefix(), "roberta");
        assert_eq!(Architecture::Bert.weight_prefix(), "bert");
    }

    // ============================================================
    // POLICY TESTS
    // ============================================================

    #[test]
    fn test_model_type_wins_over_name() {
        // Name says roberta, config.json says bert: config.json wins.
        let arch = resolve_architecture(
            "my-roberta-finetune",
            Some("bert"),
            &ResolutionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(arch, Architecture::Bert);
    }

    #[test]
    fn test_unrecognized_model_type_falls_through_to_name() {
        let arch = resolve_architecture(
            "distilbert-base-uncased",
            Some("some-custom-type"),
            &ResolutionPolicy::Strict,
        )
        .unwrap();
        assert_eq!(arch, Architecture::Distilbert);
    }

    #[test]
    fn test_strict_policy_fails_on_unknown() {
        let result =
            resolve_architecture("totally-unknown-arch", None, &ResolutionPolicy::Strict);
        assert!(matches!(
            result,
            Err(CheckpointError::ModelResolutionError { name }) if name == "totally-unknown-arch"
        ));
    }

    #[test]
    fn test_default_policy_falls_back_to_bert() {
        let arch =
            resolve_architecture("totally-unknown-arch", None, &ResolutionPolicy::default())
                .unwrap();
        assert_eq!(arch, Architecture::Bert);
    }

    #[test]
    fn test_fallback_to_unresolvable_name_fails() {
        let policy = ResolutionPolicy::FallbackTo("also-unknown".to_string());
        let result = resolve_architecture("totally-unknown-arch", None, &policy);
        assert!(matches!(
            result,
            Err(CheckpointError::ModelResolutionError { .. })
        ));
    }

    #[test]
    fn test_known_name_ignores_policy() {
        // Resolution succeeds on the first lookup; the policy never applies.
        let policy = ResolutionPolicy::FallbackTo("also-unknown".to_string());
        let arch = resolve_architecture("bert-base-uncased", None, &policy).unwrap();
        assert_eq!(arch, Architecture::Bert);
    }
}
