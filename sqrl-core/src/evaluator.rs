//! CR-Memory evaluator (§4.C): a pure function mapping `(Memory, Metrics,
//! now)` to a `Decision`. No storage handle, no clock, no logger — `now` is
//! an explicit parameter so tests are deterministic (§9 "Evaluator purity").

use crate::policy::Policy;
use crate::types::{Decision, EvalResult, Memory, MemoryMetrics, MemoryStatus, MemoryTier};
use chrono::{DateTime, Duration, Utc};

/// Evaluates one memory against its usage metrics and the active policy,
/// returning a verdict and any fields it implies changed.
///
/// Decision algorithm is evaluated top-down; the first rule that fires
/// wins (§4.C).
#[tracing::instrument(skip(policy), fields(memory_id = %memory.id, kind = %memory.kind))]
pub fn evaluate(memory: &Memory, metrics: &MemoryMetrics, now: DateTime<Utc>, policy: &Policy) -> Decision {
    let no_change = |reason: &str| Decision {
        memory_id: memory.id,
        result: EvalResult::NoChange,
        new_status: None,
        new_tier: None,
        new_expires_at: None,
        reason: reason.to_string(),
    };

    // 1. Already deprecated is terminal (§3 invariant, §8 "deprecated
    // stays deprecated").
    if memory.status == MemoryStatus::Deprecated {
        return no_change("already deprecated");
    }

    let rules = policy.rules_for(memory.kind);
    let inactive_days = metrics
        .last_used_at
        .map(|last| (now - last).num_days())
        .filter(|_| metrics.last_used_at.is_some());

    let decay_fires = |days: Option<i64>| -> Option<i64> {
        match (rules.decay.max_inactive_days, days) {
            (Some(threshold), Some(age)) if age > threshold as i64 => Some(age),
            _ => None,
        }
    };

    // 3. Not enough opportunities to judge promotion yet.
    if metrics.opportunities < rules.promotion.min_opportunities {
        if let Some(age) = decay_fires(inactive_days) {
            return Decision {
                memory_id: memory.id,
                result: EvalResult::Deprecate,
                new_status: Some(MemoryStatus::Deprecated),
                new_tier: None,
                new_expires_at: None,
                reason: format!("inactive {age} days"),
            };
        }
        return no_change("not enough opportunities");
    }

    let use_ratio = metrics.use_ratio();

    // 5. Promotion.
    if use_ratio >= rules.promotion.min_use_ratio
        && metrics.suspected_regret_hits >= rules.promotion.min_regret_hits
    {
        let mut new_tier = None;
        let mut new_expires_at = None;

        if memory.status == MemoryStatus::Provisional && use_ratio >= 0.80 {
            new_tier = Some(MemoryTier::LongTerm);
            if policy.ttl.remove_on_long_term {
                new_expires_at = Some(None);
            }
        } else if memory.expires_at.is_some() {
            new_expires_at = Some(Some(now + Duration::days(policy.ttl.extend_on_promotion_days)));
        }

        return Decision {
            memory_id: memory.id,
            result: EvalResult::Promote,
            new_status: Some(MemoryStatus::Active),
            new_tier,
            new_expires_at,
            reason: format!(
                "use_ratio={use_ratio:.2} hits={}",
                metrics.suspected_regret_hits
            ),
        };
    }

    // 6. Deprecation on sustained low usage.
    if metrics.opportunities >= rules.deprecation.min_opportunities
        && use_ratio <= rules.deprecation.max_use_ratio
    {
        return Decision {
            memory_id: memory.id,
            result: EvalResult::Deprecate,
            new_status: Some(MemoryStatus::Deprecated),
            new_tier: None,
            new_expires_at: None,
            reason: format!("use_ratio={use_ratio:.2} over {} opportunities", metrics.opportunities),
        };
    }

    // 7. Deprecation on inactivity, independent of the use-ratio checks
    // above.
    if let Some(age) = decay_fires(inactive_days) {
        return Decision {
            memory_id: memory.id,
            result: EvalResult::Deprecate,
            new_status: Some(MemoryStatus::Deprecated),
            new_tier: None,
            new_expires_at: None,
            reason: format!("inactive {age} days"),
        };
    }

    no_change("no promotion or deprecation threshold met")
}

/// Evaluates a batch of `(memory, metrics)` pairs, carried over from the
/// original's plain `map` over the single-item evaluator.
pub fn evaluate_batch(
    items: &[(Memory, MemoryMetrics)],
    now: DateTime<Utc>,
    policy: &Policy,
) -> Vec<Decision> {
    items
        .iter()
        .map(|(memory, metrics)| evaluate(memory, metrics, now, policy))
        .collect()
}

/// Accumulates a regret delta for a memory's absence into its running
/// total (§4.C "Regret accounting"). Used by callers of `evaluate`, not
/// inside it — the evaluator itself stays pure.
pub fn accumulate_regret(estimated_regret_saved: f32, errors: i64, retries: i64, policy: &Policy) -> f32 {
    let delta = policy.regret_weights.alpha_errors * errors.max(0) as f64
        + policy.regret_weights.beta_retries * retries.max(0) as f64;
    estimated_regret_saved + delta as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryKind, OwnerType, Polarity, Scope};
    use uuid::Uuid;

    fn base_memory(kind: MemoryKind, status: MemoryStatus, tier: MemoryTier, expires_at: Option<DateTime<Utc>>) -> Memory {
        let now = Utc::now();
        Memory {
            id: Uuid::new_v4(),
            scope: Scope::Project,
            project_id: Some("proj".into()),
            owner_type: OwnerType::User,
            owner_id: "u1".into(),
            kind,
            tier,
            polarity: Polarity::Positive,
            key: None,
            text: "do the thing".into(),
            status,
            confidence: 0.9,
            expires_at,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn metrics(memory_id: Uuid, opp: u32, use_count: u32, hits: u32, last_used_days_ago: Option<i64>) -> MemoryMetrics {
        MemoryMetrics {
            memory_id,
            use_count,
            opportunities: opp,
            suspected_regret_hits: hits,
            estimated_regret_saved: 0.0,
            last_used_at: last_used_days_ago.map(|d| Utc::now() - Duration::days(d)),
            last_evaluated_at: None,
        }
    }

    #[test]
    fn promotes_to_long_term() {
        let now = Utc::now();
        let memory = base_memory(
            MemoryKind::Pattern,
            MemoryStatus::Provisional,
            MemoryTier::ShortTerm,
            Some(now + Duration::days(10)),
        );
        let m = metrics(memory.id, 10, 8, 3, Some(1));
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);

        assert_eq!(decision.result, EvalResult::Promote);
        assert_eq!(decision.new_status, Some(MemoryStatus::Active));
        assert_eq!(decision.new_tier, Some(MemoryTier::LongTerm));
        assert_eq!(decision.new_expires_at, Some(None));
        assert!(decision.reason.contains("use_ratio=0.80"));
        assert!(decision.reason.contains("hits=3"));
    }

    #[test]
    fn promotes_keeps_short_term_extends_ttl() {
        let now = Utc::now();
        let memory = base_memory(
            MemoryKind::Pattern,
            MemoryStatus::Provisional,
            MemoryTier::ShortTerm,
            Some(now + Duration::days(10)),
        );
        let m = metrics(memory.id, 10, 6, 2, Some(1));
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);

        assert_eq!(decision.result, EvalResult::Promote);
        assert_eq!(decision.new_status, Some(MemoryStatus::Active));
        assert_eq!(decision.new_tier, None);
        match decision.new_expires_at {
            Some(Some(expiry)) => {
                let delta = (expiry - now).num_days();
                assert_eq!(delta, 180);
            }
            other => panic!("expected extended expiry, got {other:?}"),
        }
    }

    #[test]
    fn deprecates_low_usage_note() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Note, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 10, 0, 0, None);
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);
        assert_eq!(decision.result, EvalResult::Deprecate);
    }

    #[test]
    fn decays_inactive_note() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Note, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 3, 2, 0, Some(100));
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);
        assert_eq!(decision.result, EvalResult::Deprecate);
        assert!(decision.reason.contains("inactive 100 days"));
    }

    #[test]
    fn invariant_never_decays() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Invariant, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 2, 1, 0, Some(365));
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);
        assert_eq!(decision.result, EvalResult::NoChange);
    }

    #[test]
    fn guard_needs_more_evidence() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Guard, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 5, 4, 3, None);
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);
        assert_eq!(decision.result, EvalResult::NoChange);
        assert_eq!(decision.reason, "not enough opportunities");
    }

    #[test]
    fn deprecated_memory_always_no_change() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Invariant, MemoryStatus::Deprecated, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 100, 100, 100, None);
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);
        assert_eq!(decision.result, EvalResult::NoChange);
        assert_eq!(decision.reason, "already deprecated");
    }

    #[test]
    fn zero_opportunities_never_promotes() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Pattern, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 0, 0, 0, None);
        let policy = Policy::default();
        let decision = evaluate(&memory, &m, now, &policy);
        assert_ne!(decision.result, EvalResult::Promote);
    }

    #[test]
    fn evaluation_is_pure_and_deterministic() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Pattern, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 10, 8, 3, Some(1));
        let policy = Policy::default();
        let first = evaluate(&memory, &m, now, &policy);
        let second = evaluate(&memory, &m, now, &policy);
        assert_eq!(first.result, second.result);
        assert_eq!(first.reason, second.reason);
    }

    #[test]
    fn evaluate_batch_maps_over_evaluate() {
        let now = Utc::now();
        let memory = base_memory(MemoryKind::Note, MemoryStatus::Provisional, MemoryTier::ShortTerm, None);
        let m = metrics(memory.id, 10, 0, 0, None);
        let policy = Policy::default();
        let decisions = evaluate_batch(&[(memory.clone(), m)], now, &policy);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].result, EvalResult::Deprecate);
    }

    #[test]
    fn accumulates_regret() {
        let policy = Policy::default();
        let total = accumulate_regret(0.0, 3, 2, &policy);
        assert!((total - (1.0 * 3.0 + 0.5 * 2.0) as f32).abs() < 1e-6);
    }
}
