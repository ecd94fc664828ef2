//! Editor-side session lifecycle.
//!
//! Owns the runtime token and drives create/refresh/heartbeat/teardown
//! against the runtime API. One session per chat: switching chats tears the
//! previous session down. Concurrent ensures for the same chat share one
//! in-flight request.

use crate::api::RuntimeApi;
use crate::error::Result;
use crate::preview::PreviewInputs;
use crate::types::{DeploymentStatus, RemoteSession, SessionPayload};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Timer cadences. Heartbeat renews the lease; refresh polls status.
#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    pub heartbeat_interval: Duration,
    pub refresh_interval: Duration,
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Creating,
    Connected,
    Failed,
}

/// Observable client state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub chat_id: Option<String>,
    pub runtime_token: Option<String>,
    pub session: Option<RemoteSession>,
    pub deployment_status: Option<DeploymentStatus>,
    pub expires_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Options for [`SessionClient::ensure_session`].
#[derive(Debug, Clone, Default)]
pub struct EnsureOptions {
    pub chat_id: Option<String>,
    pub template_id: Option<String>,
    pub force: bool,
}

type SharedEnsure = Shared<BoxFuture<'static, Result<SessionPayload>>>;

struct SessionInner {
    api: Arc<dyn RuntimeApi>,
    config: SessionClientConfig,
    state: Mutex<SessionState>,
    inflight: Mutex<Option<(String, SharedEnsure)>>,
    paused: AtomicBool,
    timers_started: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

/// The session client. Cheap to clone; clones share state and timers.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<SessionInner>,
}

impl SessionClient {
    pub fn new(api: Arc<dyn RuntimeApi>, config: SessionClientConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                config,
                state: Mutex::new(SessionState::default()),
                inflight: Mutex::new(None),
                paused: AtomicBool::new(false),
                timers_started: AtomicBool::new(false),
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().expect("session state lock").clone()
    }

    pub fn runtime_token(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .expect("session state lock")
            .runtime_token
            .clone()
    }

    /// Build projector inputs from the current state.
    pub fn preview_inputs(&self) -> PreviewInputs {
        let state = self.state();
        PreviewInputs {
            chat_id: state.chat_id,
            compose_id: state.session.as_ref().map(|s| s.compose_id.clone()),
            runtime_token: state.runtime_token,
            preview_url: state.session.as_ref().map(|s| s.preview_url.clone()),
            session_status: state.session.as_ref().map(|s| s.status),
            deployment_status: state.deployment_status,
            connection_error: state.last_error,
        }
    }

    /// Make sure a session exists for the chat. Reuses the live session when
    /// the chat matches, shares an in-flight ensure, and tears down the
    /// previous chat's session when switching.
    pub async fn ensure_session(&self, options: EnsureOptions) -> Result<SessionPayload> {
        let chat_id = options
            .chat_id
            .clone()
            .or_else(|| self.state().chat_id)
            .unwrap_or_else(|| format!("draft-{}", Uuid::new_v4()));

        loop {
            if !options.force {
                if let Some(payload) = self.live_session_for(&chat_id) {
                    return Ok(payload);
                }
            }

            let existing = self
                .inner
                .inflight
                .lock()
                .expect("inflight lock")
                .clone();
            if let Some((inflight_chat, task)) = existing {
                if inflight_chat == chat_id {
                    return task.await;
                }
                // A different chat's ensure is running; let it settle, then
                // start over for ours.
                let _ = task.clone().await;
                let mut inflight = self.inner.inflight.lock().expect("inflight lock");
                if inflight.as_ref().is_some_and(|(_, t)| t.ptr_eq(&task)) {
                    *inflight = None;
                }
                continue;
            }

            let previous_token = self.begin_create(&chat_id);
            if let Some(token) = previous_token {
                if let Err(err) = self.inner.api.delete_session(&token).await {
                    warn!(reason = %err, "failed to tear down previous chat session");
                }
            }

            let task: SharedEnsure = {
                let inner = Arc::clone(&self.inner);
                let chat = chat_id.clone();
                let template = options.template_id.clone();
                async move { create_and_store(inner, chat, template).await }
                    .boxed()
                    .shared()
            };
            {
                let mut inflight = self.inner.inflight.lock().expect("inflight lock");
                *inflight = Some((chat_id.clone(), task.clone()));
            }

            let result = task.clone().await;
            {
                let mut inflight = self.inner.inflight.lock().expect("inflight lock");
                if inflight.as_ref().is_some_and(|(_, t)| t.ptr_eq(&task)) {
                    *inflight = None;
                }
            }
            if result.is_ok() {
                self.start_timers();
            }
            return result;
        }
    }

    /// Poll the session's current status.
    pub async fn refresh_session(&self) {
        let Some(token) = self.runtime_token() else {
            return;
        };
        match self.inner.api.get_session(&token).await {
            Ok(snapshot) => {
                let mut state = self.inner.state.lock().expect("session state lock");
                state.connection = ConnectionState::Connected;
                state.session = Some(snapshot.session);
                state.deployment_status = Some(snapshot.deployment_status);
                state.last_error = None;
            }
            Err(err) if err.is_unauthorized() => {
                warn!("session token no longer valid; resetting");
                self.reset_state();
            }
            Err(err) => {
                let mut state = self.inner.state.lock().expect("session state lock");
                state.last_error = Some(err.to_string());
            }
        }
    }

    /// Renew the lease. Absorbs the re-issued sliding-TTL token.
    pub async fn heartbeat(&self) {
        let Some(token) = self.runtime_token() else {
            return;
        };
        match self.inner.api.heartbeat(&token).await {
            Ok(payload) => {
                let mut state = self.inner.state.lock().expect("session state lock");
                state.expires_at = Some(payload.expires_at);
                if let Some(fresh) = payload.runtime_token {
                    state.runtime_token = Some(fresh);
                }
                if let Some(session) = state.session.as_mut() {
                    session.status = payload.status;
                }
                state.last_error = None;
            }
            Err(err) if err.is_unauthorized() => {
                warn!("heartbeat rejected; resetting session");
                self.reset_state();
            }
            Err(err) => {
                let mut state = self.inner.state.lock().expect("session state lock");
                state.last_error = Some(err.to_string());
            }
        }
    }

    /// Queue a redeploy of the current session, e.g. when the preview
    /// projector reports `should_auto_redeploy`.
    pub async fn redeploy(&self, reason: Option<&str>) {
        let Some(token) = self.runtime_token() else {
            return;
        };
        if let Err(err) = self.inner.api.redeploy(&token, reason).await {
            warn!(reason = %err, "redeploy request failed");
        }
    }

    /// Delete the session and forget all local state.
    pub async fn teardown_session(&self) {
        self.stop_timers();
        let token = {
            let mut state = self.inner.state.lock().expect("session state lock");
            state.runtime_token.take()
        };
        if let Some(token) = token {
            if let Err(err) = self.inner.api.delete_session(&token).await {
                warn!(reason = %err, "session teardown failed");
            }
        }
        self.reset_state();
    }

    /// Visibility change. Hidden pauses the timers; visible resumes them and
    /// immediately heartbeats and refreshes.
    pub async fn set_visible(&self, visible: bool) {
        self.inner.paused.store(!visible, Ordering::SeqCst);
        if visible {
            self.heartbeat().await;
            self.refresh_session().await;
        }
    }

    fn live_session_for(&self, chat_id: &str) -> Option<SessionPayload> {
        let state = self.inner.state.lock().expect("session state lock");
        if state.connection != ConnectionState::Connected
            || state.chat_id.as_deref() != Some(chat_id)
        {
            return None;
        }
        Some(SessionPayload {
            runtime_token: state.runtime_token.clone()?,
            session: state.session.clone()?,
            deployment_status: state.deployment_status?,
        })
    }

    /// Move to the creating state. Returns the previous chat's token when
    /// this ensure switches chats.
    fn begin_create(&self, chat_id: &str) -> Option<String> {
        let mut state = self.inner.state.lock().expect("session state lock");
        let switching = state.chat_id.as_deref().is_some_and(|c| c != chat_id);
        let previous_token = if switching {
            state.runtime_token.take()
        } else {
            None
        };
        if switching {
            state.session = None;
            state.deployment_status = None;
            state.expires_at = None;
        }
        state.connection = ConnectionState::Creating;
        state.chat_id = Some(chat_id.to_string());
        state.last_error = None;
        previous_token
    }

    fn reset_state(&self) {
        let mut state = self.inner.state.lock().expect("session state lock");
        *state = SessionState::default();
    }

    fn start_timers(&self) {
        if self.inner.timers_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let heartbeat = {
            let weak = Arc::downgrade(&self.inner);
            let interval = self.inner.config.heartbeat_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if !inner.paused.load(Ordering::SeqCst) {
                        SessionClient { inner }.heartbeat().await;
                    }
                }
            })
        };
        let refresh = {
            let weak = Arc::downgrade(&self.inner);
            let interval = self.inner.config.refresh_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if !inner.paused.load(Ordering::SeqCst) {
                        SessionClient { inner }.refresh_session().await;
                    }
                }
            })
        };
        let mut timers = self.inner.timers.lock().expect("timers lock");
        timers.push(heartbeat);
        timers.push(refresh);
    }

    fn stop_timers(&self) {
        self.inner.timers_started.store(false, Ordering::SeqCst);
        let mut timers = self.inner.timers.lock().expect("timers lock");
        for timer in timers.drain(..) {
            timer.abort();
        }
    }
}

async fn create_and_store(
    inner: Arc<SessionInner>,
    chat_id: String,
    template_id: Option<String>,
) -> Result<SessionPayload> {
    let result = inner
        .api
        .create_session(&chat_id, template_id.as_deref())
        .await;
    let mut state = inner.state.lock().expect("session state lock");
    match &result {
        Ok(payload) => {
            state.connection = ConnectionState::Connected;
            state.chat_id = Some(chat_id);
            state.runtime_token = Some(payload.runtime_token.clone());
            state.session = Some(payload.session.clone());
            state.deployment_status = Some(payload.deployment_status);
            state.expires_at = Some(payload.session.expires_at);
            state.last_error = None;
        }
        Err(err) => {
            state.connection = ConnectionState::Failed;
            state.last_error = Some(err.to_string());
        }
    }
    result
}
