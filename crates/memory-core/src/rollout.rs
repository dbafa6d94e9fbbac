//! Deterministic rollout decider consumed by `MemoryRuntime::search`.
//! Session stickiness: the same `session_id` always yields the same
//! decision for a given policy instance.

use crate::config::{RolloutConfig, RolloutMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    KeywordOnly,
    Hybrid,
    ShadowHybrid,
}

#[derive(Debug, Clone)]
pub struct RolloutPolicy {
    mode: RolloutMode,
    canary_percent: u32,
    #[allow(dead_code)]
    shadow_percent: u32,
}

impl RolloutPolicy {
    pub fn new(config: &RolloutConfig) -> Self {
        Self {
            mode: config.mode,
            canary_percent: config.canary_hybrid_percent,
            shadow_percent: config.shadow_hybrid_percent,
        }
    }

    pub fn decide(&self, session_id: Option<&str>) -> RetrievalMode {
        match self.mode {
            RolloutMode::Off => RetrievalMode::KeywordOnly,
            RolloutMode::On => RetrievalMode::Hybrid,
            RolloutMode::Shadow => RetrievalMode::ShadowHybrid,
            RolloutMode::Canary => match session_id {
                None => RetrievalMode::KeywordOnly,
                Some(id) if id.is_empty() => RetrievalMode::KeywordOnly,
                Some(id) => {
                    if fnv1a32(id) % 100 < self.canary_percent {
                        RetrievalMode::Hybrid
                    } else {
                        RetrievalMode::KeywordOnly
                    }
                }
            },
        }
    }
}

/// 32-bit FNV-1a hash, used for deterministic session-sticky bucketing.
pub fn fnv1a32(input: &str) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: RolloutMode, canary_percent: u32) -> RolloutConfig {
        RolloutConfig {
            mode,
            canary_hybrid_percent: canary_percent,
            shadow_hybrid_percent: 0,
        }
    }

    #[test]
    fn off_mode_is_always_keyword_only() {
        let policy = RolloutPolicy::new(&config(RolloutMode::Off, 100));
        assert_eq!(policy.decide(Some("anyone")), RetrievalMode::KeywordOnly);
    }

    #[test]
    fn on_mode_is_always_hybrid() {
        let policy = RolloutPolicy::new(&config(RolloutMode::On, 0));
        assert_eq!(policy.decide(None), RetrievalMode::Hybrid);
    }

    #[test]
    fn shadow_mode_reports_shadow_hybrid() {
        let policy = RolloutPolicy::new(&config(RolloutMode::Shadow, 0));
        assert_eq!(policy.decide(Some("s1")), RetrievalMode::ShadowHybrid);
    }

    #[test]
    fn canary_without_session_is_keyword_only() {
        let policy = RolloutPolicy::new(&config(RolloutMode::Canary, 100));
        assert_eq!(policy.decide(None), RetrievalMode::KeywordOnly);
        assert_eq!(policy.decide(Some("")), RetrievalMode::KeywordOnly);
    }

    #[test]
    fn canary_decision_is_sticky_across_repeated_calls() {
        let policy = RolloutPolicy::new(&config(RolloutMode::Canary, 50));
        let first = policy.decide(Some("session-42"));
        for _ in 0..3 {
            assert_eq!(policy.decide(Some("session-42")), first);
        }
    }

    #[test]
    fn canary_fraction_is_within_expected_band() {
        let policy = RolloutPolicy::new(&config(RolloutMode::Canary, 50));
        let hybrid_count = (0..1000)
            .filter(|i| policy.decide(Some(&format!("session-{i}"))) == RetrievalMode::Hybrid)
            .count();
        let fraction = hybrid_count as f64 / 1000.0;
        assert!((0.35..=0.65).contains(&fraction), "fraction was {fraction}");
    }
}
