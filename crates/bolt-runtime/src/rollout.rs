//! Deterministic stable/canary cohort selection.
//!
//! The bucket hash must stay byte-for-byte stable across releases: it pins
//! every (actor, chat) pair to the same cohort for the lifetime of a rollout
//! percentage. Do not change the constants.

use serde::{Deserialize, Serialize};

/// Which deploy cohort a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutCohort {
    Stable,
    Canary,
}

/// A cohort decision with its inputs, kept for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloutDecision {
    pub bucket: u32,
    pub percent: u32,
    pub cohort: RolloutCohort,
}

/// Pick the cohort for (actor, chat) at the given canary percentage.
/// Out-of-range percentages clamp into [0, 100].
pub fn select(actor_id: &str, chat_id: &str, percent: i64) -> RolloutDecision {
    let percent = percent.clamp(0, 100) as u32;
    let bucket = bucket_hash(&format!("{actor_id}:{chat_id}")) % 100;
    let cohort = if percent > 0 && bucket < percent {
        RolloutCohort::Canary
    } else {
        RolloutCohort::Stable
    };
    RolloutDecision {
        bucket,
        percent,
        cohort,
    }
}

fn bucket_hash(key: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in key.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_add(
            (hash << 1)
                .wrapping_add(hash << 4)
                .wrapping_add(hash << 7)
                .wrapping_add(hash << 8)
                .wrapping_add(hash << 24),
        );
    }
    hash
}
