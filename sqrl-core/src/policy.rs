//! Policy model and layered TOML loading for the CR-Memory evaluator (§4.C,
//! §6 persisted state layout).
//!
//! Mirrors `memory-cli/src/config/loader.rs`'s merge-by-layer approach, but
//! the layers here are fixed (defaults ← user ← project) rather than
//! selected by file-extension sniffing.

use crate::error::{Error, Result};
use crate::types::MemoryKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Promotion rule thresholds (§4.C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PromotionRule {
    pub min_opportunities: u32,
    pub min_use_ratio: f64,
    pub min_regret_hits: u32,
}

/// Deprecation rule thresholds (§4.C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeprecationRule {
    pub min_opportunities: u32,
    pub max_use_ratio: f64,
}

/// Inactivity-based decay rule. `max_inactive_days = None` disables time
/// decay for the kind (§4.C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayRule {
    pub max_inactive_days: Option<u32>,
}

/// The full set of rules applicable to one memory kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KindRules {
    pub promotion: PromotionRule,
    pub deprecation: DeprecationRule,
    pub decay: DecayRule,
}

/// Weights applied when accumulating regret (§4.C "Regret accounting").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegretWeights {
    pub alpha_errors: f64,
    pub beta_retries: f64,
}

/// TTL defaults applied by the evaluator and the commit layer (§4.C, §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TtlDefaults {
    pub short_term_days: i64,
    pub emergency_days: i64,
    pub extend_on_promotion_days: i64,
    pub remove_on_long_term: bool,
}

/// The fully-resolved CR-Memory policy: per-kind rules plus global knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub default: KindRules,
    pub kinds: HashMap<MemoryKind, KindRules>,
    pub regret_weights: RegretWeights,
    pub ttl: TtlDefaults,
}

impl Policy {
    /// The rules that apply to `kind`, falling back to `default` for any
    /// kind with no explicit entry (there always is one, built from §4.C's
    /// defaults table, but a malformed TOML layer could in principle omit
    /// a kind entirely).
    pub fn rules_for(&self, kind: MemoryKind) -> &KindRules {
        self.kinds.get(&kind).unwrap_or(&self.default)
    }
}

impl Default for Policy {
    /// The built-in defaults table from §4.C, expressed as deltas from
    /// `default` in the spec but materialized here as fully-resolved rules
    /// per kind (simpler to reason about at evaluation time, same
    /// numbers).
    fn default() -> Self {
        let default = KindRules {
            promotion: PromotionRule {
                min_opportunities: 5,
                min_use_ratio: 0.60,
                min_regret_hits: 2,
            },
            deprecation: DeprecationRule {
                min_opportunities: 10,
                max_use_ratio: 0.10,
            },
            decay: DecayRule {
                max_inactive_days: None,
            },
        };

        let mut kinds = HashMap::new();

        kinds.insert(
            MemoryKind::Invariant,
            KindRules {
                promotion: PromotionRule {
                    min_opportunities: 3,
                    min_use_ratio: 0.50,
                    min_regret_hits: 1,
                },
                deprecation: default.deprecation,
                decay: DecayRule {
                    max_inactive_days: None,
                },
            },
        );

        kinds.insert(
            MemoryKind::Guard,
            KindRules {
                promotion: PromotionRule {
                    min_opportunities: 10,
                    min_use_ratio: 0.30,
                    min_regret_hits: 3,
                },
                deprecation: DeprecationRule {
                    min_opportunities: 20,
                    max_use_ratio: 0.05,
                },
                decay: DecayRule {
                    max_inactive_days: Some(90),
                },
            },
        );

        kinds.insert(
            MemoryKind::Pattern,
            KindRules {
                promotion: default.promotion,
                deprecation: default.deprecation,
                decay: DecayRule {
                    max_inactive_days: Some(180),
                },
            },
        );

        kinds.insert(
            MemoryKind::Note,
            KindRules {
                promotion: default.promotion,
                deprecation: DeprecationRule {
                    min_opportunities: 5,
                    max_use_ratio: 0.20,
                },
                decay: DecayRule {
                    max_inactive_days: Some(60),
                },
            },
        );

        kinds.insert(
            MemoryKind::Preference,
            KindRules {
                promotion: default.promotion,
                deprecation: default.deprecation,
                decay: DecayRule {
                    max_inactive_days: Some(365),
                },
            },
        );

        Policy {
            default,
            kinds,
            regret_weights: RegretWeights {
                alpha_errors: 1.0,
                beta_retries: 0.5,
            },
            ttl: TtlDefaults {
                short_term_days: 30,
                emergency_days: 7,
                extend_on_promotion_days: 180,
                remove_on_long_term: true,
            },
        }
    }
}

/// A single on-disk TOML layer. Every field is optional; a section absent
/// from the file leaves the lower layer's value untouched.
#[derive(Debug, Default, Deserialize)]
struct PolicyLayer {
    #[serde(default)]
    default: Option<PartialKindRules>,
    #[serde(default)]
    kinds: HashMap<String, PartialKindRules>,
    #[serde(default)]
    regret_weights: Option<RegretWeights>,
    #[serde(default)]
    ttl: Option<PartialTtl>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialKindRules {
    min_opportunities_promote: Option<u32>,
    min_use_ratio: Option<f64>,
    min_regret_hits: Option<u32>,
    min_opportunities_deprecate: Option<u32>,
    max_use_ratio: Option<f64>,
    max_inactive_days: Option<Option<u32>>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialTtl {
    short_term_days: Option<i64>,
    emergency_days: Option<i64>,
    extend_on_promotion_days: Option<i64>,
    remove_on_long_term: Option<bool>,
}

fn apply_partial(base: KindRules, partial: &PartialKindRules) -> KindRules {
    KindRules {
        promotion: PromotionRule {
            min_opportunities: partial
                .min_opportunities_promote
                .unwrap_or(base.promotion.min_opportunities),
            min_use_ratio: partial.min_use_ratio.unwrap_or(base.promotion.min_use_ratio),
            min_regret_hits: partial
                .min_regret_hits
                .unwrap_or(base.promotion.min_regret_hits),
        },
        deprecation: DeprecationRule {
            min_opportunities: partial
                .min_opportunities_deprecate
                .unwrap_or(base.deprecation.min_opportunities),
            max_use_ratio: partial.max_use_ratio.unwrap_or(base.deprecation.max_use_ratio),
        },
        decay: DecayRule {
            max_inactive_days: partial
                .max_inactive_days
                .unwrap_or(base.decay.max_inactive_days),
        },
    }
}

fn apply_layer(mut policy: Policy, layer: PolicyLayer) -> Result<Policy> {
    if let Some(partial) = &layer.default {
        policy.default = apply_partial(policy.default, partial);
    }
    for (kind_str, partial) in &layer.kinds {
        let kind: MemoryKind = kind_str
            .parse()
            .map_err(|e| Error::InvalidPolicy(format!("unknown kind in policy file: {e}")))?;
        let base = *policy.kinds.get(&kind).unwrap_or(&policy.default);
        policy.kinds.insert(kind, apply_partial(base, partial));
    }
    if let Some(rw) = layer.regret_weights {
        policy.regret_weights = rw;
    }
    if let Some(ttl) = layer.ttl {
        policy.ttl = TtlDefaults {
            short_term_days: ttl.short_term_days.unwrap_or(policy.ttl.short_term_days),
            emergency_days: ttl.emergency_days.unwrap_or(policy.ttl.emergency_days),
            extend_on_promotion_days: ttl
                .extend_on_promotion_days
                .unwrap_or(policy.ttl.extend_on_promotion_days),
            remove_on_long_term: ttl
                .remove_on_long_term
                .unwrap_or(policy.ttl.remove_on_long_term),
        };
    }
    Ok(policy)
}

fn read_layer(path: &Path) -> Result<Option<PolicyLayer>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let layer: PolicyLayer = toml::from_str(&contents)
                .map_err(|e| Error::InvalidPolicy(format!("{}: {e}", path.display())))?;
            Ok(Some(layer))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Loads the CR-Memory policy by merging, in order: built-in defaults ←
/// `~/.sqrl/memory_policy.toml` ← `<project_root>/memory_policy.toml`.
/// Missing files are not an error; malformed TOML is (§4.C, §6).
pub fn load_policy(project_root: Option<&Path>) -> Result<Policy> {
    let mut policy = Policy::default();

    if let Some(home) = dirs::home_dir() {
        let user_path = home.join(".sqrl").join("memory_policy.toml");
        if let Some(layer) = read_layer(&user_path)? {
            policy = apply_layer(policy, layer)?;
        }
    }

    if let Some(root) = project_root {
        let project_path = root.join("memory_policy.toml");
        if let Some(layer) = read_layer(&project_path)? {
            policy = apply_layer(policy, layer)?;
        }
    }

    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let policy = Policy::default();
        assert_eq!(policy.default.promotion.min_opportunities, 5);
        assert_eq!(policy.default.deprecation.max_use_ratio, 0.10);

        let guard = policy.rules_for(MemoryKind::Guard);
        assert_eq!(guard.promotion.min_opportunities, 10);
        assert_eq!(guard.deprecation.min_opportunities, 20);
        assert_eq!(guard.decay.max_inactive_days, Some(90));

        let invariant = policy.rules_for(MemoryKind::Invariant);
        assert_eq!(invariant.decay.max_inactive_days, None);

        let pattern = policy.rules_for(MemoryKind::Pattern);
        assert_eq!(pattern.decay.max_inactive_days, Some(180));
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let policy = load_policy(Some(Path::new("/nonexistent/project/root"))).unwrap();
        assert_eq!(policy.default.promotion.min_opportunities, 5);
    }

    #[test]
    fn malformed_toml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("memory_policy.toml"), "not = [valid").unwrap();
        let err = load_policy(Some(dir.path())).unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy(_)));
    }

    #[test]
    fn project_layer_overrides_default_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("memory_policy.toml"),
            "[default]\nmin_opportunities_promote = 99\n",
        )
        .unwrap();
        let policy = load_policy(Some(dir.path())).unwrap();
        assert_eq!(policy.default.promotion.min_opportunities, 99);
        // Untouched fields keep the built-in default.
        assert_eq!(policy.default.deprecation.max_use_ratio, 0.10);
    }
}
