//! Preview operational-state projection.
//!
//! A pure function from session-client state and prior projector memory to a
//! user-visible snapshot. Time is injected, so every transition is unit
//! testable. The projector decides when a stuck queued deployment earns one
//! automatic redeploy, and when a transient error shows as "reconnecting"
//! rather than a hard failure.

use crate::types::{DeploymentStatus, SessionStatus};
use serde::Serialize;

/// Queued this long with no deployment progress before intervening.
pub const QUEUED_TIMEOUT_MS: i64 = 180_000;
/// After a transient error, keep showing "reconnecting" for this long past
/// the last healthy observation.
pub const RECONNECT_GRACE_MS: i64 = 30_000;
/// Automatic redeploys per session before giving up.
pub const MAX_RETRIES: u32 = 1;

/// User-visible preview state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewState {
    Provisioning,
    Deploying,
    Ready,
    Error,
    Reconnecting,
}

/// Inputs observed from the session client.
#[derive(Debug, Clone, Default)]
pub struct PreviewInputs {
    pub chat_id: Option<String>,
    pub compose_id: Option<String>,
    pub runtime_token: Option<String>,
    pub preview_url: Option<String>,
    pub session_status: Option<SessionStatus>,
    pub deployment_status: Option<DeploymentStatus>,
    /// Transient transport/API failure from the last poll, if any.
    pub connection_error: Option<String>,
}

/// Carry-over state between projections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectorMemory {
    session_key: Option<(String, String)>,
    retry_count: u32,
    queued_since: Option<i64>,
    reconnect_since: Option<i64>,
    last_healthy_at: Option<i64>,
    last_transition_at: i64,
    last_state: Option<PreviewState>,
}

/// The projected snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewSnapshot {
    pub state: PreviewState,
    pub message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_since: Option<i64>,
    pub last_transition_at: i64,
}

/// Projection result: the snapshot, updated memory, and whether the caller
/// should queue an automatic redeploy.
#[derive(Debug, Clone)]
pub struct Projection {
    pub snapshot: PreviewSnapshot,
    pub memory: ProjectorMemory,
    pub should_auto_redeploy: bool,
}

/// Project the preview state at `now_ms` (unix milliseconds).
pub fn project(inputs: &PreviewInputs, memory: ProjectorMemory, now_ms: i64) -> Projection {
    let mut memory = memory;
    let mut should_auto_redeploy = false;

    // A different (chat, compose) is a different session; forget everything.
    let session_key = match (&inputs.chat_id, &inputs.compose_id) {
        (Some(chat), Some(compose)) => Some((chat.clone(), compose.clone())),
        _ => None,
    };
    if memory.session_key != session_key {
        memory = ProjectorMemory {
            session_key,
            last_transition_at: now_ms,
            ..ProjectorMemory::default()
        };
    }

    // Track how long the deployment has sat in the queue.
    if inputs.deployment_status == Some(DeploymentStatus::Queued) {
        memory.queued_since.get_or_insert(now_ms);
    } else {
        memory.queued_since = None;
    }

    let mut forced_error: Option<String> = None;
    if let Some(queued_since) = memory.queued_since {
        if now_ms - queued_since >= QUEUED_TIMEOUT_MS {
            if memory.retry_count < MAX_RETRIES {
                should_auto_redeploy = true;
                memory.retry_count += 1;
                memory.queued_since = Some(now_ms);
            } else {
                forced_error = Some(format!(
                    "Deployment has been queued for over {} minutes; giving up after {} retry",
                    QUEUED_TIMEOUT_MS / 60_000,
                    MAX_RETRIES
                ));
            }
        }
    }

    let state = select_state(inputs, &mut memory, forced_error.as_deref(), now_ms);
    let message = forced_error.unwrap_or_else(|| message_for(state));

    if memory.last_state != Some(state) {
        memory.last_transition_at = now_ms;
        memory.last_state = Some(state);
    }

    Projection {
        snapshot: PreviewSnapshot {
            state,
            message,
            retry_count: memory.retry_count,
            max_retries: MAX_RETRIES,
            queued_since: memory.queued_since,
            last_transition_at: memory.last_transition_at,
        },
        memory,
        should_auto_redeploy,
    }
}

fn select_state(
    inputs: &PreviewInputs,
    memory: &mut ProjectorMemory,
    forced_error: Option<&str>,
    now_ms: i64,
) -> PreviewState {
    if forced_error.is_some() {
        return PreviewState::Error;
    }

    if inputs.connection_error.is_some() {
        let within_grace = inputs.runtime_token.is_some()
            && memory
                .last_healthy_at
                .is_some_and(|at| now_ms - at < RECONNECT_GRACE_MS);
        if within_grace {
            memory.reconnect_since.get_or_insert(now_ms);
            return PreviewState::Reconnecting;
        }
        return PreviewState::Error;
    }
    memory.reconnect_since = None;

    if inputs.session_status == Some(SessionStatus::Error)
        || inputs.deployment_status == Some(DeploymentStatus::Error)
    {
        return PreviewState::Error;
    }

    if inputs.session_status == Some(SessionStatus::Creating) {
        return PreviewState::Provisioning;
    }

    if matches!(
        inputs.deployment_status,
        Some(DeploymentStatus::Queued) | Some(DeploymentStatus::Running)
    ) || inputs.session_status == Some(SessionStatus::Deploying)
    {
        return PreviewState::Deploying;
    }

    if inputs.session_status == Some(SessionStatus::Ready)
        && inputs.deployment_status == Some(DeploymentStatus::Done)
    {
        memory.last_healthy_at = Some(now_ms);
        return PreviewState::Ready;
    }

    if inputs.preview_url.is_some() {
        return PreviewState::Deploying;
    }

    PreviewState::Provisioning
}

fn message_for(state: PreviewState) -> String {
    match state {
        PreviewState::Provisioning => "Provisioning your workspace".to_string(),
        PreviewState::Deploying => "Deploying your preview".to_string(),
        PreviewState::Ready => "Preview is live".to_string(),
        PreviewState::Error => "Preview is unavailable".to_string(),
        PreviewState::Reconnecting => "Reconnecting to your workspace".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> PreviewInputs {
        PreviewInputs {
            chat_id: Some("chat-1".to_string()),
            compose_id: Some("compose-1".to_string()),
            runtime_token: Some("token".to_string()),
            preview_url: Some("http://app.example.dev".to_string()),
            session_status: Some(SessionStatus::Deploying),
            deployment_status: Some(DeploymentStatus::Running),
            connection_error: None,
        }
    }

    #[test]
    fn ready_marks_last_healthy() {
        let mut inputs = base_inputs();
        inputs.session_status = Some(SessionStatus::Ready);
        inputs.deployment_status = Some(DeploymentStatus::Done);

        let projection = project(&inputs, ProjectorMemory::default(), 1_000);
        assert_eq!(projection.snapshot.state, PreviewState::Ready);
        assert_eq!(projection.memory.last_healthy_at, Some(1_000));
        assert!(!projection.should_auto_redeploy);
    }

    #[test]
    fn queued_timeout_redeploys_once_then_errors() {
        let mut inputs = base_inputs();
        inputs.deployment_status = Some(DeploymentStatus::Queued);

        // First observation arms the timer.
        let p1 = project(&inputs, ProjectorMemory::default(), 0);
        assert_eq!(p1.snapshot.state, PreviewState::Deploying);
        assert!(!p1.should_auto_redeploy);

        // At the timeout the projector asks for one automatic redeploy.
        let p2 = project(&inputs, p1.memory, QUEUED_TIMEOUT_MS);
        assert!(p2.should_auto_redeploy);
        assert_eq!(p2.snapshot.retry_count, 1);
        assert_eq!(p2.snapshot.state, PreviewState::Deploying);

        // Still queued a full timeout later: hard error, no more redeploys.
        let p3 = project(&inputs, p2.memory, QUEUED_TIMEOUT_MS * 2);
        assert!(!p3.should_auto_redeploy);
        assert_eq!(p3.snapshot.state, PreviewState::Error);
        assert!(p3.snapshot.message.contains("minutes"));
        assert_eq!(p3.snapshot.retry_count, 1);
    }

    #[test]
    fn leaving_the_queue_disarms_the_timeout() {
        let mut inputs = base_inputs();
        inputs.deployment_status = Some(DeploymentStatus::Queued);
        let p1 = project(&inputs, ProjectorMemory::default(), 0);

        inputs.deployment_status = Some(DeploymentStatus::Running);
        let p2 = project(&inputs, p1.memory, 60_000);
        assert_eq!(p2.snapshot.queued_since, None);

        // Re-queued later: the timer starts over.
        inputs.deployment_status = Some(DeploymentStatus::Queued);
        let p3 = project(&inputs, p2.memory, 120_000);
        assert_eq!(p3.snapshot.queued_since, Some(120_000));
        assert!(!p3.should_auto_redeploy);
    }

    #[test]
    fn transient_error_within_grace_shows_reconnecting() {
        let mut inputs = base_inputs();
        inputs.session_status = Some(SessionStatus::Ready);
        inputs.deployment_status = Some(DeploymentStatus::Done);
        let healthy = project(&inputs, ProjectorMemory::default(), 1_000);

        inputs.connection_error = Some("fetch failed".to_string());
        let reconnecting = project(&inputs, healthy.memory, 1_000 + 10_000);
        assert_eq!(reconnecting.snapshot.state, PreviewState::Reconnecting);

        // Past the grace window the same failure is a hard error.
        let errored = project(
            &inputs,
            reconnecting.memory,
            1_000 + RECONNECT_GRACE_MS + 1,
        );
        assert_eq!(errored.snapshot.state, PreviewState::Error);
    }

    #[test]
    fn transient_error_without_prior_health_is_an_error() {
        let mut inputs = base_inputs();
        inputs.connection_error = Some("fetch failed".to_string());
        let projection = project(&inputs, ProjectorMemory::default(), 5_000);
        assert_eq!(projection.snapshot.state, PreviewState::Error);
    }

    #[test]
    fn switching_sessions_resets_memory() {
        let mut inputs = base_inputs();
        inputs.deployment_status = Some(DeploymentStatus::Queued);
        let p1 = project(&inputs, ProjectorMemory::default(), 0);
        let p2 = project(&inputs, p1.memory, QUEUED_TIMEOUT_MS);
        assert_eq!(p2.snapshot.retry_count, 1);

        inputs.compose_id = Some("compose-2".to_string());
        let p3 = project(&inputs, p2.memory, QUEUED_TIMEOUT_MS + 1);
        assert_eq!(p3.snapshot.retry_count, 0);
        assert_eq!(p3.snapshot.queued_since, Some(QUEUED_TIMEOUT_MS + 1));
    }

    #[test]
    fn transition_timestamp_moves_only_on_state_change() {
        let inputs = base_inputs();
        let p1 = project(&inputs, ProjectorMemory::default(), 1_000);
        assert_eq!(p1.snapshot.state, PreviewState::Deploying);
        assert_eq!(p1.snapshot.last_transition_at, 1_000);

        let p2 = project(&inputs, p1.memory, 2_000);
        assert_eq!(p2.snapshot.last_transition_at, 1_000);

        let mut ready = inputs.clone();
        ready.session_status = Some(SessionStatus::Ready);
        ready.deployment_status = Some(DeploymentStatus::Done);
        let p3 = project(&ready, p2.memory, 3_000);
        assert_eq!(p3.snapshot.state, PreviewState::Ready);
        assert_eq!(p3.snapshot.last_transition_at, 3_000);
    }
}
