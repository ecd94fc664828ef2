//! Session metadata embedded in the compose description field.
//!
//! The description is the only persistent slot the platform gives us, so the
//! session lease lives there as `BOLT_RUNTIME:<json>`. A compose whose
//! description does not parse is not owned by this system.

use crate::rollout::RolloutCohort;
use serde::{Deserialize, Serialize};

pub const METADATA_SENTINEL: &str = "BOLT_RUNTIME:";
pub const METADATA_VERSION: u32 = 1;

/// Lease metadata for one (actor, chat) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub version: u32,
    pub actor_id: String,
    pub chat_id: String,
    pub created_at: i64,
    pub last_seen_at: i64,
    pub idle_ttl_sec: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout_cohort: Option<RolloutCohort>,
}

impl SessionMetadata {
    /// Unix second at which this lease expires.
    pub fn expires_at(&self) -> i64 {
        self.last_seen_at + self.idle_ttl_sec
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at() < now
    }
}

/// Serialize metadata into the description slot.
pub fn format(metadata: &SessionMetadata) -> String {
    // Serialization of a plain struct with string/int fields cannot fail.
    let json = serde_json::to_string(metadata).unwrap_or_default();
    format!("{METADATA_SENTINEL}{json}")
}

/// Parse the description slot. Returns `None` for foreign composes: missing
/// sentinel, invalid JSON, wrong version, or missing actor/chat.
pub fn parse(description: Option<&str>) -> Option<SessionMetadata> {
    let raw = description?.strip_prefix(METADATA_SENTINEL)?;
    let metadata: SessionMetadata = serde_json::from_str(raw).ok()?;
    if metadata.version != METADATA_VERSION
        || metadata.actor_id.is_empty()
        || metadata.chat_id.is_empty()
    {
        return None;
    }
    Some(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionMetadata {
        SessionMetadata {
            version: 1,
            actor_id: "actor-1".into(),
            chat_id: "chat-1".into(),
            created_at: 1_700_000_000,
            last_seen_at: 1_700_000_600,
            idle_ttl_sec: 900,
            rollout_cohort: Some(RolloutCohort::Stable),
        }
    }

    #[test]
    fn format_parse_round_trip() {
        let encoded = format(&sample());
        assert!(encoded.starts_with(METADATA_SENTINEL));
        assert_eq!(parse(Some(&encoded)), Some(sample()));
    }

    #[test]
    fn parse_rejects_foreign_descriptions() {
        assert_eq!(parse(None), None);
        assert_eq!(parse(Some("a human-written description")), None);
        assert_eq!(parse(Some("BOLT_RUNTIME:not-json")), None);
        assert_eq!(
            parse(Some(r#"BOLT_RUNTIME:{"version":2,"actorId":"a","chatId":"c","createdAt":0,"lastSeenAt":0,"idleTtlSec":1}"#)),
            None
        );
        assert_eq!(
            parse(Some(r#"BOLT_RUNTIME:{"version":1,"actorId":"","chatId":"c","createdAt":0,"lastSeenAt":0,"idleTtlSec":1}"#)),
            None
        );
    }

    #[test]
    fn cohort_is_optional_on_parse() {
        let legacy = r#"BOLT_RUNTIME:{"version":1,"actorId":"a","chatId":"c","createdAt":1,"lastSeenAt":2,"idleTtlSec":900}"#;
        let parsed = parse(Some(legacy)).unwrap();
        assert_eq!(parsed.rollout_cohort, None);
        assert_eq!(parsed.expires_at(), 902);
    }

    #[test]
    fn expiry_horizon() {
        let meta = sample();
        assert!(!meta.is_expired(meta.expires_at()));
        assert!(meta.is_expired(meta.expires_at() + 1));
    }
}
