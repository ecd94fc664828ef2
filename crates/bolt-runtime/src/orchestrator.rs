//! Session lifecycle orchestration.
//!
//! One reusable compose per (actor, chat). Creation is single-flighted per
//! key: concurrent calls share one in-flight task and observe one platform
//! effect. The lease lives in the compose description (see [`crate::metadata`])
//! and every scoped operation trusts only the compose id carried in the
//! signed token.

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::metadata::{self, SessionMetadata, METADATA_VERSION};
use crate::names;
use crate::platform::Platform;
use crate::rollout::{self, RolloutCohort, RolloutDecision};
use crate::status::{
    derive_deployment_status, derive_session_status, DeploymentStatus, SessionStatus,
};
use crate::sweeper::IdleSweeper;
use crate::template;
use crate::token::{self, SessionClaims};
use chrono::Utc;
use dokploy::{
    Compose, CreateCompose, CreateDomain, CreateProject, Domain, Environment, GenerateDomain,
    Project, UpdateCompose, WriteFile,
};
use futures_util::future::Shared;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Port the preview domain routes to inside the compose.
const PREVIEW_PORT: u16 = 4173;
/// Compose service the preview domain points at.
const APP_SERVICE: &str = "app";
const COMPOSE_TYPE: &str = "docker-compose";
const COMPOSE_PATH: &str = "docker-compose.yml";

/// Orchestrator knobs carved out of [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub token_secret: String,
    pub server_id: Option<String>,
    pub canary_server_id: Option<String>,
    pub canary_rollout_percent: i64,
    pub session_idle_minutes: i64,
}

impl OrchestratorSettings {
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let token_secret = config
            .token_secret
            .clone()
            .ok_or_else(|| RuntimeError::internal("runtime token secret is not configured"))?;
        Ok(Self {
            token_secret,
            server_id: config.server_id.clone(),
            canary_server_id: config.canary_server_id.clone(),
            canary_rollout_percent: config.canary_rollout_percent,
            session_idle_minutes: config.session_idle_minutes,
        })
    }

    fn idle_ttl_sec(&self) -> i64 {
        self.session_idle_minutes * 60
    }
}

/// A session as reported to the editor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub project_id: String,
    pub environment_id: String,
    pub compose_id: String,
    pub domain: String,
    pub preview_url: String,
    pub status: SessionStatus,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub rollout_cohort: RolloutCohort,
}

/// Input to [`SessionOrchestrator::create`].
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub actor_id: String,
    pub chat_id: String,
    pub template_id: Option<String>,
    pub request_id: Option<String>,
}

/// A freshly issued (or renewed) lease.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLease {
    pub token: String,
    pub session: Session,
    pub deployment_status: DeploymentStatus,
}

/// Current view of an existing session.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub claims: SessionClaims,
    pub session: Session,
    pub deployment_status: DeploymentStatus,
}

/// Result of a heartbeat: lease extended, fresh token issued.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatOutcome {
    pub status: SessionStatus,
    pub expires_at: i64,
    pub token: String,
}

type SessionKey = (String, String);
type SharedCreate = Shared<Pin<Box<dyn Future<Output = Result<SessionLease>> + Send>>>;

struct Inner {
    platform: Arc<dyn Platform>,
    settings: OrchestratorSettings,
    sweeper: IdleSweeper,
    inflight: Mutex<HashMap<SessionKey, SharedCreate>>,
}

/// The session control plane. Cheap to clone; all clones share the
/// single-flight map and sweeper lock set.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        platform: Arc<dyn Platform>,
        settings: OrchestratorSettings,
        sweeper: IdleSweeper,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                settings,
                sweeper,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        &*self.inner.platform
    }

    pub fn sweeper(&self) -> &IdleSweeper {
        &self.inner.sweeper
    }

    pub fn idle_ttl_sec(&self) -> i64 {
        self.inner.settings.idle_ttl_sec()
    }

    /// Create or reuse the session for (actor, chat). Concurrent calls with
    /// the same key share one in-flight task and return the same lease.
    pub async fn create(&self, request: CreateSessionRequest) -> Result<SessionLease> {
        let key = (request.actor_id.clone(), request.chat_id.clone());
        let task = {
            let mut inflight = self.inner.inflight.lock().expect("inflight lock");
            match inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let request = request.clone();
                    let fut: SharedCreate =
                        (Box::pin(async move { create_session(inner, request).await })
                            as Pin<Box<dyn Future<Output = Result<SessionLease>> + Send>>)
                            .shared();
                    inflight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let result = task.clone().await;

        // Clear the key only if it still points at our task; a newer create
        // may already have replaced it.
        let mut inflight = self.inner.inflight.lock().expect("inflight lock");
        if inflight.get(&key).is_some_and(|current| current.ptr_eq(&task)) {
            inflight.remove(&key);
        }
        result
    }

    /// Look up the current state of the session carried by `token`.
    pub async fn get(&self, token: &str, request_id: Option<&str>) -> Result<SessionView> {
        let claims = self.with_claims(token)?;
        view_from_claims(&self.inner, claims, request_id).await
    }

    /// Extend the lease: advance `lastSeenAt`, rewrite the metadata slot, and
    /// issue a fresh token with a fresh expiry horizon (sliding TTL).
    pub async fn heartbeat(
        &self,
        token: &str,
        request_id: Option<&str>,
    ) -> Result<HeartbeatOutcome> {
        let inner = &self.inner;
        let claims = self.with_claims(token)?;
        let compose = inner
            .platform
            .compose_one(&claims.compose_id, request_id)
            .await?;
        let deployments = inner
            .platform
            .deployments_by_compose(&claims.compose_id, request_id)
            .await?;
        let deployment_status = derive_deployment_status(&deployments);
        let status = derive_session_status(deployment_status, compose.compose_status.as_deref());

        let now = Utc::now().timestamp();
        let current = metadata::parse(compose.description.as_deref())
            .unwrap_or_else(|| synthesize_metadata(&claims, inner.settings.idle_ttl_sec()));
        let decision = rollout::select(
            &claims.actor_id,
            &claims.chat_id,
            inner.settings.canary_rollout_percent,
        );
        let cohort = resolve_cohort(
            current.rollout_cohort,
            compose.server_id.as_deref(),
            &inner.settings,
            decision,
        );
        let next = SessionMetadata {
            version: METADATA_VERSION,
            actor_id: claims.actor_id.clone(),
            chat_id: claims.chat_id.clone(),
            created_at: current.created_at,
            last_seen_at: now,
            idle_ttl_sec: inner.settings.idle_ttl_sec(),
            rollout_cohort: Some(cohort),
        };
        inner
            .platform
            .compose_update(
                UpdateCompose {
                    compose_id: claims.compose_id.clone(),
                    description: Some(metadata::format(&next)),
                    ..Default::default()
                },
                request_id,
            )
            .await?;

        if let Err(err) = inner
            .sweeper
            .run(&*inner.platform, &claims.actor_id, request_id)
            .await
        {
            warn!(actor = %claims.actor_id, reason = %err, "heartbeat sweep failed");
        }

        let renewed = claims.renewed(inner.settings.idle_ttl_sec());
        let fresh_token = token::sign(&renewed, &inner.settings.token_secret)?;
        Ok(HeartbeatOutcome {
            status,
            expires_at: next.expires_at(),
            token: fresh_token,
        })
    }

    /// Tear the session down, deleting volumes with it.
    pub async fn delete(&self, token: &str, request_id: Option<&str>) -> Result<()> {
        let claims = self.with_claims(token)?;
        self.inner
            .platform
            .compose_delete(&claims.compose_id, true, request_id)
            .await?;
        Ok(())
    }

    /// Queue a redeploy of the session's compose.
    pub async fn redeploy(&self, token: &str, request_id: Option<&str>) -> Result<()> {
        let claims = self.with_claims(token)?;
        self.inner
            .platform
            .compose_redeploy(&claims.compose_id, request_id)
            .await?;
        Ok(())
    }

    /// Verify the token and return its claims. The compose and project ids
    /// used by every scoped operation come from here, never from the client.
    pub fn with_claims(&self, token: &str) -> Result<SessionClaims> {
        token::verify(token, &self.inner.settings.token_secret)
    }

    /// Sweep one actor's expired sessions.
    pub async fn sweep_actor(
        &self,
        actor_id: &str,
        request_id: Option<&str>,
    ) -> Result<crate::sweeper::SweepOutcome> {
        self.inner
            .sweeper
            .run(&*self.inner.platform, actor_id, request_id)
            .await
    }

    /// Sweep every actor known to the platform. Returns the actor count.
    pub async fn sweep_all(&self, request_id: Option<&str>) -> Result<usize> {
        self.inner
            .sweeper
            .run_all(&*self.inner.platform, request_id)
            .await
    }
}

async fn create_session(inner: Arc<Inner>, request: CreateSessionRequest) -> Result<SessionLease> {
    let request_id = request.request_id.as_deref();

    // Best-effort cleanup before provisioning anything new.
    if let Err(err) = inner
        .sweeper
        .run(&*inner.platform, &request.actor_id, request_id)
        .await
    {
        warn!(actor = %request.actor_id, reason = %err, "pre-create sweep failed");
    }

    let project = ensure_actor_project(&inner, &request.actor_id, request_id).await?;
    let environment = resolve_environment(&project)?;
    let decision = rollout::select(
        &request.actor_id,
        &request.chat_id,
        inner.settings.canary_rollout_percent,
    );

    let (winner, mut stale) = find_reusable(
        &inner,
        &project,
        &request.actor_id,
        &request.chat_id,
        request_id,
    )
    .await;

    let lease = match winner {
        Some(candidate) => {
            reuse_session(
                &inner,
                &request,
                &project,
                &environment,
                candidate,
                decision,
                request_id,
            )
            .await?
        }
        None => {
            match provision_session(
                &inner,
                &request,
                &project,
                &environment,
                decision,
                request_id,
            )
            .await
            {
                Ok(lease) => lease,
                Err(err) if err.code == "CONFLICT" => {
                    recover_from_conflict(
                        &inner,
                        &request,
                        &project,
                        decision,
                        err,
                        &mut stale,
                        request_id,
                    )
                    .await?
                }
                Err(err) => return Err(err),
            }
        }
    };

    delete_stale(&inner, &stale, request_id).await;
    Ok(lease)
}

/// A concurrent writer won the compose name. Re-scan and adopt their session
/// instead of failing the whole create.
async fn recover_from_conflict(
    inner: &Arc<Inner>,
    request: &CreateSessionRequest,
    project: &Project,
    decision: RolloutDecision,
    original: RuntimeError,
    stale: &mut Vec<String>,
    request_id: Option<&str>,
) -> Result<SessionLease> {
    let project = inner
        .platform
        .project_one(&project.project_id, request_id)
        .await?;
    let environment = resolve_environment(&project)?;
    let (winner, extra_stale) = find_reusable(
        inner,
        &project,
        &request.actor_id,
        &request.chat_id,
        request_id,
    )
    .await;
    stale.extend(extra_stale);
    match winner {
        Some(candidate) => {
            reuse_session(
                inner,
                request,
                &project,
                &environment,
                candidate,
                decision,
                request_id,
            )
            .await
        }
        None => Err(original),
    }
}

async fn ensure_actor_project(
    inner: &Arc<Inner>,
    actor_id: &str,
    request_id: Option<&str>,
) -> Result<Project> {
    let name = names::actor_project_name(actor_id);
    let projects = inner.platform.project_all(request_id).await?;
    let project_id = match projects.into_iter().find(|p| p.name == name) {
        Some(project) => project.project_id,
        None => {
            inner
                .platform
                .project_create(
                    CreateProject {
                        name,
                        description: Some("Bolt runtime workspaces".to_string()),
                    },
                    request_id,
                )
                .await?
                .project_id
        }
    };
    Ok(inner.platform.project_one(&project_id, request_id).await?)
}

fn resolve_environment(project: &Project) -> Result<Environment> {
    project
        .environments
        .iter()
        .find(|env| env.is_default || env.name == "production")
        .or_else(|| project.environments.first())
        .cloned()
        .ok_or_else(RuntimeError::no_environment)
}

struct ReuseCandidate {
    compose: Compose,
    metadata: SessionMetadata,
    deployment_status: DeploymentStatus,
    session_status: SessionStatus,
}

/// Enumerate this (actor, chat)'s composes in the project. Returns the
/// freshest reusable candidate and the ids to prune. A candidate whose
/// inspection fails goes on the stale list rather than failing the create.
async fn find_reusable(
    inner: &Arc<Inner>,
    project: &Project,
    actor_id: &str,
    chat_id: &str,
    request_id: Option<&str>,
) -> (Option<ReuseCandidate>, Vec<String>) {
    let mut candidates = Vec::new();
    let mut stale = Vec::new();

    for compose in project
        .environments
        .iter()
        .flat_map(|env| env.composes.iter())
    {
        let Some(meta) = metadata::parse(compose.description.as_deref()) else {
            continue;
        };
        if meta.actor_id != actor_id || meta.chat_id != chat_id {
            continue;
        }
        match inspect_candidate(inner, &compose.compose_id, request_id).await {
            Ok((full, deployment_status, session_status)) if session_status.is_reusable() => {
                candidates.push(ReuseCandidate {
                    compose: full,
                    metadata: meta,
                    deployment_status,
                    session_status,
                });
            }
            Ok(_) => stale.push(compose.compose_id.clone()),
            Err(err) => {
                warn!(
                    compose = %compose.compose_id,
                    reason = %err,
                    "reuse candidate inspection failed"
                );
                stale.push(compose.compose_id.clone());
            }
        }
    }

    candidates.sort_by_key(|c| c.metadata.last_seen_at);
    let winner = candidates.pop();
    stale.extend(candidates.into_iter().map(|c| c.compose.compose_id));
    (winner, stale)
}

async fn inspect_candidate(
    inner: &Arc<Inner>,
    compose_id: &str,
    request_id: Option<&str>,
) -> Result<(Compose, DeploymentStatus, SessionStatus)> {
    let compose = inner.platform.compose_one(compose_id, request_id).await?;
    let deployments = inner
        .platform
        .deployments_by_compose(compose_id, request_id)
        .await?;
    let deployment_status = derive_deployment_status(&deployments);
    let session_status =
        derive_session_status(deployment_status, compose.compose_status.as_deref());
    Ok((compose, deployment_status, session_status))
}

async fn reuse_session(
    inner: &Arc<Inner>,
    request: &CreateSessionRequest,
    project: &Project,
    environment: &Environment,
    candidate: ReuseCandidate,
    decision: RolloutDecision,
    request_id: Option<&str>,
) -> Result<SessionLease> {
    let now = Utc::now().timestamp();
    let compose_id = candidate.compose.compose_id.clone();
    let cohort = resolve_cohort(
        candidate.metadata.rollout_cohort,
        candidate.compose.server_id.as_deref(),
        &inner.settings,
        decision,
    );
    let next = SessionMetadata {
        version: METADATA_VERSION,
        actor_id: request.actor_id.clone(),
        chat_id: request.chat_id.clone(),
        created_at: candidate.metadata.created_at,
        last_seen_at: now,
        idle_ttl_sec: inner.settings.idle_ttl_sec(),
        rollout_cohort: Some(cohort),
    };
    inner
        .platform
        .compose_update(
            UpdateCompose {
                compose_id: compose_id.clone(),
                description: Some(metadata::format(&next)),
                ..Default::default()
            },
            request_id,
        )
        .await?;

    let app_name = candidate
        .compose
        .app_name
        .clone()
        .unwrap_or_else(|| names::chat_app_name(&request.actor_id, &request.chat_id));
    let domain = ensure_domain(
        inner,
        &compose_id,
        &app_name,
        candidate.compose.server_id.as_deref(),
        request_id,
    )
    .await?;

    let mut deployment_status = candidate.deployment_status;
    let mut session_status = candidate.session_status;
    if matches!(
        deployment_status,
        DeploymentStatus::Queued | DeploymentStatus::Error
    ) {
        inner
            .platform
            .compose_deploy(&compose_id, request_id)
            .await?;
        deployment_status = DeploymentStatus::Queued;
        session_status = SessionStatus::Deploying;
    }

    issue_lease(
        inner,
        request,
        project,
        environment,
        &compose_id,
        &domain,
        candidate.compose.server_id.clone(),
        cohort,
        session_status,
        deployment_status,
        next.expires_at(),
    )
}

async fn provision_session(
    inner: &Arc<Inner>,
    request: &CreateSessionRequest,
    project: &Project,
    environment: &Environment,
    decision: RolloutDecision,
    request_id: Option<&str>,
) -> Result<SessionLease> {
    let server_id = resolve_server_id(inner, decision.cohort, request_id).await?;
    let app_name = names::chat_app_name(&request.actor_id, &request.chat_id);
    let template = template::template_by_id(request.template_id.as_deref());
    let now = Utc::now().timestamp();
    let meta = SessionMetadata {
        version: METADATA_VERSION,
        actor_id: request.actor_id.clone(),
        chat_id: request.chat_id.clone(),
        created_at: now,
        last_seen_at: now,
        idle_ttl_sec: inner.settings.idle_ttl_sec(),
        rollout_cohort: Some(decision.cohort),
    };
    let description = metadata::format(&meta);

    let compose = inner
        .platform
        .compose_create(
            CreateCompose {
                name: app_name.clone(),
                app_name: app_name.clone(),
                environment_id: environment.environment_id.clone(),
                compose_type: COMPOSE_TYPE.to_string(),
                compose_file: template.compose_file.to_string(),
                description: description.clone(),
                server_id: server_id.clone(),
            },
            request_id,
        )
        .await?;

    inner
        .platform
        .compose_update(
            UpdateCompose {
                compose_id: compose.compose_id.clone(),
                source_type: Some("raw".to_string()),
                compose_path: Some(COMPOSE_PATH.to_string()),
                description: Some(description),
            },
            request_id,
        )
        .await?;

    for file in template.files {
        inner
            .platform
            .file_write(
                WriteFile {
                    compose_id: compose.compose_id.clone(),
                    path: file.path.to_string(),
                    content: file.content.to_string(),
                    encoding: dokploy::FileEncoding::Utf8,
                    overwrite: true,
                },
                request_id,
            )
            .await?;
    }

    let domain = ensure_domain(
        inner,
        &compose.compose_id,
        &app_name,
        server_id.as_deref(),
        request_id,
    )
    .await?;

    let deployments = inner
        .platform
        .deployments_by_compose(&compose.compose_id, request_id)
        .await?;
    let mut deployment_status = derive_deployment_status(&deployments);
    if matches!(
        deployment_status,
        DeploymentStatus::Queued | DeploymentStatus::Error
    ) {
        inner
            .platform
            .compose_deploy(&compose.compose_id, request_id)
            .await?;
        deployment_status = DeploymentStatus::Queued;
    }
    let session_status = derive_session_status(deployment_status, compose.compose_status.as_deref());

    issue_lease(
        inner,
        request,
        project,
        environment,
        &compose.compose_id,
        &domain,
        server_id,
        decision.cohort,
        session_status,
        deployment_status,
        meta.expires_at(),
    )
}

async fn resolve_server_id(
    inner: &Arc<Inner>,
    cohort: RolloutCohort,
    request_id: Option<&str>,
) -> Result<Option<String>> {
    match cohort {
        RolloutCohort::Canary => inner
            .settings
            .canary_server_id
            .clone()
            .map(Some)
            .ok_or_else(RuntimeError::no_canary_deploy_server),
        RolloutCohort::Stable => {
            if let Some(id) = &inner.settings.server_id {
                return Ok(Some(id.clone()));
            }
            match inner.platform.server_all(request_id).await {
                Ok(servers) => Ok(servers
                    .into_iter()
                    .find(dokploy::Server::ssh_enabled)
                    .map(|server| server.server_id)),
                Err(err) => {
                    warn!(reason = %err, "server discovery failed; using platform default");
                    Ok(None)
                }
            }
        }
    }
}

/// Make sure the compose has a preview domain; generate and attach one when
/// none exists yet.
async fn ensure_domain(
    inner: &Arc<Inner>,
    compose_id: &str,
    app_name: &str,
    server_id: Option<&str>,
    request_id: Option<&str>,
) -> Result<String> {
    let domains = inner
        .platform
        .domains_by_compose(compose_id, request_id)
        .await?;
    if let Some(existing) = domains.first() {
        return Ok(existing.host.clone());
    }

    let generated = inner
        .platform
        .domain_generate(
            GenerateDomain {
                app_name: app_name.to_string(),
                server_id: server_id.map(str::to_string),
            },
            request_id,
        )
        .await
        .map_err(|err| RuntimeError::domain_unavailable(err.to_string()))?;
    if generated.domain.trim().is_empty() {
        return Err(RuntimeError::domain_unavailable(
            "platform returned an empty domain",
        ));
    }
    inner
        .platform
        .domain_create(
            CreateDomain {
                compose_id: compose_id.to_string(),
                host: generated.domain.clone(),
                path: "/".to_string(),
                port: PREVIEW_PORT,
                https: false,
                certificate_type: "none".to_string(),
                service_name: APP_SERVICE.to_string(),
                domain_type: "compose".to_string(),
            },
            request_id,
        )
        .await
        .map_err(|err| RuntimeError::domain_unavailable(err.to_string()))?;
    Ok(generated.domain)
}

async fn delete_stale(inner: &Arc<Inner>, stale: &[String], request_id: Option<&str>) {
    for compose_id in stale {
        if let Err(err) = inner
            .platform
            .compose_delete(compose_id, true, request_id)
            .await
        {
            warn!(compose = %compose_id, reason = %err, "stale compose delete failed");
        }
    }
}

fn resolve_cohort(
    existing: Option<RolloutCohort>,
    server_id: Option<&str>,
    settings: &OrchestratorSettings,
    decision: RolloutDecision,
) -> RolloutCohort {
    if let Some(cohort) = existing {
        return cohort;
    }
    match (server_id, settings.canary_server_id.as_deref()) {
        (Some(sid), Some(canary)) if sid == canary => RolloutCohort::Canary,
        (Some(_), _) => RolloutCohort::Stable,
        _ => decision.cohort,
    }
}

#[allow(clippy::too_many_arguments)]
fn issue_lease(
    inner: &Arc<Inner>,
    request: &CreateSessionRequest,
    project: &Project,
    environment: &Environment,
    compose_id: &str,
    domain: &str,
    server_id: Option<String>,
    cohort: RolloutCohort,
    status: SessionStatus,
    deployment_status: DeploymentStatus,
    expires_at: i64,
) -> Result<SessionLease> {
    let claims = SessionClaims::new(
        &request.actor_id,
        &request.chat_id,
        &project.project_id,
        &environment.environment_id,
        compose_id,
        domain,
        inner.settings.idle_ttl_sec(),
    );
    let token = token::sign(&claims, &inner.settings.token_secret)?;
    Ok(SessionLease {
        token,
        session: Session {
            project_id: project.project_id.clone(),
            environment_id: environment.environment_id.clone(),
            compose_id: compose_id.to_string(),
            domain: domain.to_string(),
            preview_url: preview_url(domain, None),
            status,
            expires_at,
            server_id,
            rollout_cohort: cohort,
        },
        deployment_status,
    })
}

async fn view_from_claims(
    inner: &Arc<Inner>,
    claims: SessionClaims,
    request_id: Option<&str>,
) -> Result<SessionView> {
    let compose = inner
        .platform
        .compose_one(&claims.compose_id, request_id)
        .await?;
    let deployments = inner
        .platform
        .deployments_by_compose(&claims.compose_id, request_id)
        .await?;
    let domains = inner
        .platform
        .domains_by_compose(&claims.compose_id, request_id)
        .await?;

    let meta = metadata::parse(compose.description.as_deref())
        .unwrap_or_else(|| synthesize_metadata(&claims, inner.settings.idle_ttl_sec()));
    let domain = domains
        .first()
        .map(|d| d.host.clone())
        .unwrap_or_else(|| claims.domain.clone());
    let deployment_status = derive_deployment_status(&deployments);
    let status = derive_session_status(deployment_status, compose.compose_status.as_deref());
    let decision = rollout::select(
        &claims.actor_id,
        &claims.chat_id,
        inner.settings.canary_rollout_percent,
    );
    let cohort = resolve_cohort(
        meta.rollout_cohort,
        compose.server_id.as_deref(),
        &inner.settings,
        decision,
    );

    let session = Session {
        project_id: claims.project_id.clone(),
        environment_id: claims.environment_id.clone(),
        compose_id: claims.compose_id.clone(),
        domain: domain.clone(),
        preview_url: preview_url(&domain, domains.first()),
        status,
        expires_at: meta.expires_at(),
        server_id: compose.server_id.clone(),
        rollout_cohort: cohort,
    };
    Ok(SessionView {
        claims,
        session,
        deployment_status,
    })
}

/// Metadata stand-in for composes whose description was lost or overwritten:
/// the token's issue time anchors the lease.
fn synthesize_metadata(claims: &SessionClaims, idle_ttl_sec: i64) -> SessionMetadata {
    SessionMetadata {
        version: METADATA_VERSION,
        actor_id: claims.actor_id.clone(),
        chat_id: claims.chat_id.clone(),
        created_at: claims.iat,
        last_seen_at: claims.iat,
        idle_ttl_sec,
        rollout_cohort: None,
    }
}

fn preview_url(host: &str, domain: Option<&Domain>) -> String {
    let scheme = match domain {
        Some(d) if d.https => "https",
        _ => "http",
    };
    format!("{scheme}://{host}")
}
