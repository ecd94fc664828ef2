//! Deterministic platform resource names derived from actor and chat ids.

use sha2::{Digest, Sha256};

const ACTOR_PROJECT_PREFIX: &str = "bolt-actor-";
const CHAT_APP_PREFIX: &str = "bolt-chat-";

/// Project name owning all of an actor's composes.
pub fn actor_project_name(actor_id: &str) -> String {
    format!("{ACTOR_PROJECT_PREFIX}{}", digest_prefix(actor_id, 10))
}

/// Compose and app name for one (actor, chat) session.
pub fn chat_app_name(actor_id: &str, chat_id: &str) -> String {
    let key = format!("{actor_id}:{chat_id}");
    format!("{CHAT_APP_PREFIX}{}", digest_prefix(&key, 12))
}

fn digest_prefix(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}
