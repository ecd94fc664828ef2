use crate::metadata::{self, SessionMetadata, METADATA_VERSION};
use crate::names;
use crate::orchestrator::{
    CreateSessionRequest, OrchestratorSettings, SessionOrchestrator,
};
use crate::platform::Platform;
use crate::rollout::RolloutCohort;
use crate::status::{DeploymentStatus, SessionStatus};
use crate::sweeper::IdleSweeper;
use crate::token;
use async_trait::async_trait;
use chrono::Utc;
use dokploy::{
    Compose, CreateCompose, CreateDomain, CreateProject, Deployment, DokployError, Domain,
    Environment, FileContent, FileEncoding, FileInfo, FileKind, GenerateDomain, GeneratedDomain,
    Project, Result, Server, UpdateCompose, WriteFile,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SECRET: &str = "test-secret";

fn not_found(procedure: &'static str) -> DokployError {
    DokployError::Api {
        status: 404,
        code: "NOT_FOUND".to_string(),
        message: "missing".to_string(),
        procedure,
    }
}

#[derive(Default)]
struct PlatformState {
    projects: Vec<Project>,
    deployments: HashMap<String, Vec<Deployment>>,
    domains: HashMap<String, Vec<Domain>>,
    servers: Vec<Server>,
    files: HashMap<String, HashMap<String, String>>,
    compose_create_calls: usize,
    compose_deploy_calls: Vec<String>,
    compose_redeploy_calls: Vec<String>,
    deleted_composes: Vec<String>,
    next_id: usize,
    conflict_once: Option<Compose>,
}

impl PlatformState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn compose_mut(&mut self, compose_id: &str) -> Option<&mut Compose> {
        self.projects
            .iter_mut()
            .flat_map(|p| p.environments.iter_mut())
            .flat_map(|env| env.composes.iter_mut())
            .find(|c| c.compose_id == compose_id)
    }

    fn compose(&self, compose_id: &str) -> Option<Compose> {
        self.projects
            .iter()
            .flat_map(|p| p.environments.iter())
            .flat_map(|env| env.composes.iter())
            .find(|c| c.compose_id == compose_id)
            .cloned()
    }
}

/// In-memory platform double with call recording.
#[derive(Default)]
struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn add_project(&self, name: &str) -> (String, String) {
        let mut state = self.state.lock().unwrap();
        let project_id = state.fresh_id("proj");
        let environment_id = state.fresh_id("env");
        state.projects.push(Project {
            project_id: project_id.clone(),
            name: name.to_string(),
            description: None,
            created_at: None,
            environments: vec![Environment {
                environment_id: environment_id.clone(),
                name: "production".to_string(),
                is_default: true,
                composes: Vec::new(),
            }],
        });
        (project_id, environment_id)
    }

    fn add_session_compose(
        &self,
        project_id: &str,
        meta: &SessionMetadata,
        compose_status: &str,
        deployment_status: Option<&str>,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        let compose_id = state.fresh_id("compose");
        let compose = Compose {
            compose_id: compose_id.clone(),
            name: names::chat_app_name(&meta.actor_id, &meta.chat_id),
            app_name: Some(names::chat_app_name(&meta.actor_id, &meta.chat_id)),
            description: Some(metadata::format(meta)),
            compose_status: Some(compose_status.to_string()),
            server_id: None,
            environment_id: None,
            created_at: None,
        };
        let deployment_id = state.fresh_id("dep");
        let project = state
            .projects
            .iter_mut()
            .find(|p| p.project_id == project_id)
            .expect("project exists");
        project.environments[0].composes.push(compose);
        if let Some(status) = deployment_status {
            state.deployments.insert(
                compose_id.clone(),
                vec![Deployment {
                    deployment_id,
                    status: Some(status.to_string()),
                    title: None,
                    created_at: Some("2026-01-01T00:00:00Z".to_string()),
                }],
            );
        }
        state.domains.insert(
            compose_id.clone(),
            vec![Domain {
                domain_id: None,
                host: "existing.apps.fake.dev".to_string(),
                path: Some("/".to_string()),
                port: Some(4173),
                https: false,
                service_name: Some("app".to_string()),
            }],
        );
        compose_id
    }

    fn fail_next_compose_create_with_conflict(&self, winner_meta: &SessionMetadata) {
        let mut state = self.state.lock().unwrap();
        let compose_id = state.fresh_id("compose");
        let deployment_id = state.fresh_id("dep");
        state.deployments.insert(
            compose_id.clone(),
            vec![Deployment {
                deployment_id,
                status: Some("done".to_string()),
                title: None,
                created_at: Some("2026-01-01T00:00:00Z".to_string()),
            }],
        );
        state.domains.insert(
            compose_id.clone(),
            vec![Domain {
                domain_id: None,
                host: "winner.apps.fake.dev".to_string(),
                path: Some("/".to_string()),
                port: Some(4173),
                https: false,
                service_name: Some("app".to_string()),
            }],
        );
        state.conflict_once = Some(Compose {
            compose_id,
            name: names::chat_app_name(&winner_meta.actor_id, &winner_meta.chat_id),
            app_name: Some(names::chat_app_name(&winner_meta.actor_id, &winner_meta.chat_id)),
            description: Some(metadata::format(winner_meta)),
            compose_status: Some("done".to_string()),
            server_id: None,
            environment_id: None,
            created_at: None,
        });
    }

    fn compose_create_calls(&self) -> usize {
        self.state.lock().unwrap().compose_create_calls
    }

    fn deploy_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().compose_deploy_calls.clone()
    }

    fn redeploy_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().compose_redeploy_calls.clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_composes.clone()
    }

    fn description_of(&self, compose_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .compose(compose_id)
            .and_then(|c| c.description)
    }

    fn file_content(&self, compose_id: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(compose_id)
            .and_then(|files| files.get(path).cloned())
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn project_all(&self, _request_id: Option<&str>) -> Result<Vec<Project>> {
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().projects.clone())
    }

    async fn project_create(
        &self,
        input: CreateProject,
        _request_id: Option<&str>,
    ) -> Result<Project> {
        tokio::task::yield_now().await;
        let (project_id, _) = self.add_project(&input.name);
        Ok(self
            .state
            .lock()
            .unwrap()
            .projects
            .iter()
            .find(|p| p.project_id == project_id)
            .cloned()
            .expect("created project"))
    }

    async fn project_one(&self, project_id: &str, _request_id: Option<&str>) -> Result<Project> {
        tokio::task::yield_now().await;
        self.state
            .lock()
            .unwrap()
            .projects
            .iter()
            .find(|p| p.project_id == project_id)
            .cloned()
            .ok_or_else(|| not_found("project.one"))
    }

    async fn compose_create(
        &self,
        input: CreateCompose,
        _request_id: Option<&str>,
    ) -> Result<Compose> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.compose_create_calls += 1;
        if let Some(winner) = state.conflict_once.take() {
            let environment_id = input.environment_id.clone();
            for project in state.projects.iter_mut() {
                for env in project.environments.iter_mut() {
                    if env.environment_id == environment_id {
                        env.composes.push(winner.clone());
                    }
                }
            }
            return Err(DokployError::Api {
                status: 409,
                code: "CONFLICT".to_string(),
                message: "compose name already exists".to_string(),
                procedure: "compose.create",
            });
        }
        let compose_id = state.fresh_id("compose");
        let compose = Compose {
            compose_id: compose_id.clone(),
            name: input.name,
            app_name: Some(input.app_name),
            description: Some(input.description),
            compose_status: Some("idle".to_string()),
            server_id: input.server_id,
            environment_id: Some(input.environment_id.clone()),
            created_at: None,
        };
        let environment_id = input.environment_id;
        for project in state.projects.iter_mut() {
            for env in project.environments.iter_mut() {
                if env.environment_id == environment_id {
                    env.composes.push(compose.clone());
                }
            }
        }
        Ok(compose)
    }

    async fn compose_one(&self, compose_id: &str, _request_id: Option<&str>) -> Result<Compose> {
        tokio::task::yield_now().await;
        self.state
            .lock()
            .unwrap()
            .compose(compose_id)
            .ok_or_else(|| not_found("compose.one"))
    }

    async fn compose_update(&self, input: UpdateCompose, _request_id: Option<&str>) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        let compose = state
            .compose_mut(&input.compose_id)
            .ok_or_else(|| not_found("compose.update"))?;
        if let Some(description) = input.description {
            compose.description = Some(description);
        }
        Ok(())
    }

    async fn compose_delete(
        &self,
        compose_id: &str,
        _delete_volumes: bool,
        _request_id: Option<&str>,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        for project in state.projects.iter_mut() {
            for env in project.environments.iter_mut() {
                env.composes.retain(|c| c.compose_id != compose_id);
            }
        }
        state.deleted_composes.push(compose_id.to_string());
        Ok(())
    }

    async fn compose_deploy(&self, compose_id: &str, _request_id: Option<&str>) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.compose_deploy_calls.push(compose_id.to_string());
        Ok(())
    }

    async fn compose_redeploy(&self, compose_id: &str, _request_id: Option<&str>) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.compose_redeploy_calls.push(compose_id.to_string());
        Ok(())
    }

    async fn deployments_by_compose(
        &self,
        compose_id: &str,
        _request_id: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        tokio::task::yield_now().await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployments
            .get(compose_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn domains_by_compose(
        &self,
        compose_id: &str,
        _request_id: Option<&str>,
    ) -> Result<Vec<Domain>> {
        tokio::task::yield_now().await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .domains
            .get(compose_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn domain_generate(
        &self,
        input: GenerateDomain,
        _request_id: Option<&str>,
    ) -> Result<GeneratedDomain> {
        tokio::task::yield_now().await;
        Ok(GeneratedDomain {
            domain: format!("{}.apps.fake.dev", input.app_name),
        })
    }

    async fn domain_create(&self, input: CreateDomain, _request_id: Option<&str>) -> Result<Domain> {
        tokio::task::yield_now().await;
        let domain = Domain {
            domain_id: None,
            host: input.host,
            path: Some(input.path),
            port: Some(input.port),
            https: input.https,
            service_name: Some(input.service_name),
        };
        self.state
            .lock()
            .unwrap()
            .domains
            .entry(input.compose_id)
            .or_default()
            .push(domain.clone());
        Ok(domain)
    }

    async fn server_all(&self, _request_id: Option<&str>) -> Result<Vec<Server>> {
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().servers.clone())
    }

    async fn file_list(
        &self,
        compose_id: &str,
        path: &str,
        _request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        let files = state.files.get(compose_id).cloned().unwrap_or_default();
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        Ok(files
            .iter()
            .filter(|(file_path, _)| file_path.starts_with(&prefix))
            .map(|(file_path, content)| FileInfo {
                name: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
                path: file_path.clone(),
                kind: FileKind::File,
                size: content.len() as u64,
                modified_at: None,
            })
            .collect())
    }

    async fn file_read(
        &self,
        compose_id: &str,
        path: &str,
        _request_id: Option<&str>,
    ) -> Result<FileContent> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        let content = state
            .files
            .get(compose_id)
            .and_then(|files| files.get(path))
            .ok_or_else(|| not_found("fileManager.readFile"))?;
        Ok(FileContent {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            content: content.clone(),
            encoding: FileEncoding::Utf8,
            is_binary: false,
            size: content.len() as u64,
            modified_at: None,
        })
    }

    async fn file_write(&self, input: WriteFile, _request_id: Option<&str>) -> Result<()> {
        tokio::task::yield_now().await;
        self.state
            .lock()
            .unwrap()
            .files
            .entry(input.compose_id)
            .or_default()
            .insert(input.path, input.content);
        Ok(())
    }

    async fn file_mkdir(
        &self,
        _compose_id: &str,
        _path: &str,
        _request_id: Option<&str>,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn file_delete(
        &self,
        compose_id: &str,
        path: &str,
        _recursive: bool,
        _request_id: Option<&str>,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        if let Some(files) = self.state.lock().unwrap().files.get_mut(compose_id) {
            files.retain(|file_path, _| {
                file_path != path && !file_path.starts_with(&format!("{path}/"))
            });
        }
        Ok(())
    }

    async fn file_search(
        &self,
        compose_id: &str,
        query: &str,
        _path: Option<&str>,
        _request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        let files = state.files.get(compose_id).cloned().unwrap_or_default();
        Ok(files
            .iter()
            .filter(|(file_path, _)| file_path.contains(query))
            .map(|(file_path, content)| FileInfo {
                name: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
                path: file_path.clone(),
                kind: FileKind::File,
                size: content.len() as u64,
                modified_at: None,
            })
            .collect())
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        token_secret: SECRET.to_string(),
        server_id: None,
        canary_server_id: None,
        canary_rollout_percent: 0,
        session_idle_minutes: 15,
    }
}

fn orchestrator(platform: Arc<FakePlatform>) -> SessionOrchestrator {
    SessionOrchestrator::new(platform, settings(), IdleSweeper::new())
}

fn orchestrator_with(
    platform: Arc<FakePlatform>,
    settings: OrchestratorSettings,
) -> SessionOrchestrator {
    SessionOrchestrator::new(platform, settings, IdleSweeper::new())
}

fn create_request(actor: &str, chat: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        actor_id: actor.to_string(),
        chat_id: chat.to_string(),
        template_id: None,
        request_id: None,
    }
}

fn session_meta(actor: &str, chat: &str, last_seen_at: i64) -> SessionMetadata {
    SessionMetadata {
        version: METADATA_VERSION,
        actor_id: actor.to_string(),
        chat_id: chat.to_string(),
        created_at: last_seen_at - 60,
        last_seen_at,
        idle_ttl_sec: 900,
        rollout_cohort: Some(RolloutCohort::Stable),
    }
}

#[tokio::test]
async fn create_provisions_project_compose_and_domain() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());

    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    assert_eq!(platform.compose_create_calls(), 1);
    assert_eq!(lease.deployment_status, DeploymentStatus::Queued);
    assert_eq!(lease.session.rollout_cohort, RolloutCohort::Stable);
    assert!(lease.session.preview_url.starts_with("http://"));
    assert_eq!(platform.deploy_calls().len(), 1);

    // The token binds the compose the platform created.
    let claims = token::verify(&lease.token, SECRET).unwrap();
    assert_eq!(claims.compose_id, lease.session.compose_id);
    assert_eq!(claims.actor_id, "actor-1");

    // Template files were seeded.
    assert!(platform
        .file_content(&lease.session.compose_id, "package.json")
        .is_some());
    assert!(platform
        .file_content(&lease.session.compose_id, "src/App.jsx")
        .is_some());

    // The compose carries parseable metadata.
    let description = platform.description_of(&lease.session.compose_id).unwrap();
    let meta = metadata::parse(Some(&description)).unwrap();
    assert_eq!(meta.actor_id, "actor-1");
    assert_eq!(meta.chat_id, "chat-1");
}

#[tokio::test]
async fn concurrent_creates_share_one_platform_effect() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());

    let (a, b) = tokio::join!(
        orch.create(create_request("actor-1", "chat-1")),
        orch.create(create_request("actor-1", "chat-1")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(platform.compose_create_calls(), 1);
    assert_eq!(a.token, b.token);
    assert_eq!(a.session.compose_id, b.session.compose_id);
}

#[tokio::test]
async fn distinct_chats_do_not_share_sessions() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());

    let (a, b) = tokio::join!(
        orch.create(create_request("actor-1", "chat-1")),
        orch.create(create_request("actor-1", "chat-2")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(platform.compose_create_calls(), 2);
    assert_ne!(a.session.compose_id, b.session.compose_id);
}

#[tokio::test]
async fn reusable_compose_is_adopted_not_recreated() {
    let platform = FakePlatform::shared();
    let (project_id, _) = platform.add_project(&names::actor_project_name("actor-1"));
    let now = Utc::now().timestamp();
    let compose_id = platform.add_session_compose(
        &project_id,
        &session_meta("actor-1", "chat-1", now),
        "done",
        Some("done"),
    );

    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    assert_eq!(platform.compose_create_calls(), 0);
    assert_eq!(lease.session.compose_id, compose_id);
    assert_eq!(lease.session.status, SessionStatus::Ready);
    assert_eq!(lease.deployment_status, DeploymentStatus::Done);
    assert!(platform.deploy_calls().is_empty());
    assert!(!platform.deleted().contains(&compose_id));

    // Metadata was rewritten with a fresh lastSeenAt.
    let description = platform.description_of(&compose_id).unwrap();
    let meta = metadata::parse(Some(&description)).unwrap();
    assert!(meta.last_seen_at >= now);
}

#[tokio::test]
async fn freshest_candidate_wins_and_duplicates_are_pruned() {
    let platform = FakePlatform::shared();
    let (project_id, _) = platform.add_project(&names::actor_project_name("actor-1"));
    let now = Utc::now().timestamp();
    let older = platform.add_session_compose(
        &project_id,
        &session_meta("actor-1", "chat-1", now - 300),
        "done",
        Some("done"),
    );
    let newer = platform.add_session_compose(
        &project_id,
        &session_meta("actor-1", "chat-1", now),
        "done",
        Some("done"),
    );

    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    assert_eq!(lease.session.compose_id, newer);
    assert!(platform.deleted().contains(&older));
    assert!(!platform.deleted().contains(&newer));
}

#[tokio::test]
async fn reused_session_without_a_deployment_is_deployed() {
    let platform = FakePlatform::shared();
    let (project_id, _) = platform.add_project(&names::actor_project_name("actor-1"));
    let now = Utc::now().timestamp();
    // No deployment yet: derived status is queued, still reusable.
    let compose_id = platform.add_session_compose(
        &project_id,
        &session_meta("actor-1", "chat-1", now),
        "idle",
        None,
    );

    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    assert_eq!(lease.session.compose_id, compose_id);
    assert_eq!(platform.deploy_calls(), vec![compose_id]);
    assert_eq!(lease.deployment_status, DeploymentStatus::Queued);
}

#[tokio::test]
async fn canary_without_server_fails_with_503() {
    let platform = FakePlatform::shared();
    let mut canary_settings = settings();
    canary_settings.canary_rollout_percent = 100;
    canary_settings.canary_server_id = None;
    let orch = orchestrator_with(platform, canary_settings);

    let err = orch
        .create(create_request("actor-1", "chat-1"))
        .await
        .unwrap_err();
    assert_eq!(err.status, 503);
    assert_eq!(err.code, "NO_CANARY_DEPLOY_SERVER");
}

#[tokio::test]
async fn create_conflict_recovers_by_adopting_the_winner() {
    let platform = FakePlatform::shared();
    platform.add_project(&names::actor_project_name("actor-1"));
    let now = Utc::now().timestamp();
    platform.fail_next_compose_create_with_conflict(&session_meta("actor-1", "chat-1", now));

    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    // One failed create, then adoption of the concurrent winner.
    assert_eq!(platform.compose_create_calls(), 1);
    assert_eq!(lease.session.status, SessionStatus::Ready);
    let claims = token::verify(&lease.token, SECRET).unwrap();
    assert_eq!(claims.compose_id, lease.session.compose_id);
}

#[tokio::test]
async fn heartbeat_slides_the_lease_horizon() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    let outcome = orch.heartbeat(&lease.token, None).await.unwrap();
    let now = Utc::now().timestamp();

    // expiresAt tracks now + idle TTL, not the original create time.
    assert!((outcome.expires_at - (now + 900)).abs() <= 2);

    // The fresh token verifies and carries a fresh horizon.
    let claims = token::verify(&outcome.token, SECRET).unwrap();
    assert_eq!(claims.exp - claims.iat, 900);
    assert!((claims.exp - (now + 900)).abs() <= 2);

    // Metadata lastSeenAt advanced.
    let description = platform.description_of(&lease.session.compose_id).unwrap();
    let meta = metadata::parse(Some(&description)).unwrap();
    assert!((meta.last_seen_at - now).abs() <= 2);
}

#[tokio::test]
async fn get_reports_current_platform_state() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    let view = orch.get(&lease.token, None).await.unwrap();
    assert_eq!(view.session.compose_id, lease.session.compose_id);
    assert_eq!(view.claims.chat_id, "chat-1");
    assert_eq!(view.session.domain, lease.session.domain);
}

#[tokio::test]
async fn delete_tears_down_the_compose() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    orch.delete(&lease.token, None).await.unwrap();
    assert!(platform.deleted().contains(&lease.session.compose_id));

    // The compose is gone; a subsequent get fails with NOT_FOUND.
    let err = orch.get(&lease.token, None).await.unwrap_err();
    assert_eq!(err.status, 404);
}

#[tokio::test]
async fn tampered_token_is_rejected() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform);
    let err = orch.get("not-a-token", None).await.unwrap_err();
    assert_eq!(err.status, 401);
}

#[tokio::test]
async fn manifest_write_triggers_redeploy() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    let outcome = orch
        .write_file(
            &lease.token,
            "/home/project/package.json",
            "{}".to_string(),
            FileEncoding::Utf8,
            None,
        )
        .await
        .unwrap();
    assert!(outcome.redeployed);
    assert_eq!(platform.redeploy_calls(), vec![lease.session.compose_id.clone()]);

    let outcome = orch
        .write_file(
            &lease.token,
            "/home/project/src/notes.md",
            "hello".to_string(),
            FileEncoding::Utf8,
            None,
        )
        .await
        .unwrap();
    assert!(!outcome.redeployed);
    assert_eq!(platform.redeploy_calls().len(), 1);
}

#[tokio::test]
async fn traversal_paths_are_rejected_before_dispatch() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    let err = orch
        .read_file(&lease.token, "/home/project/../secret", None)
        .await
        .unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.message, "Invalid runtime path");
}

#[tokio::test]
async fn listing_returns_virtual_paths() {
    let platform = FakePlatform::shared();
    let orch = orchestrator(platform.clone());
    let lease = orch.create(create_request("actor-1", "chat-1")).await.unwrap();

    let entries = orch
        .list_files(&lease.token, Some("/home/project/src"), None)
        .await
        .unwrap();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(entry.virtual_path.starts_with("/home/project/src/"));
        assert!(!entry.platform_path.starts_with('/'));
    }
}

#[tokio::test]
async fn sweeper_deletes_only_expired_sessions() {
    let platform = FakePlatform::shared();
    let (project_id, _) = platform.add_project(&names::actor_project_name("actor-1"));
    let now = Utc::now().timestamp();
    let expired = platform.add_session_compose(
        &project_id,
        &session_meta("actor-1", "chat-old", now - 3_600),
        "done",
        Some("done"),
    );
    let live = platform.add_session_compose(
        &project_id,
        &session_meta("actor-1", "chat-new", now),
        "done",
        Some("done"),
    );

    let sweeper = IdleSweeper::new();
    let outcome = sweeper.run(&*platform, "actor-1", None).await.unwrap();

    assert!(!outcome.skipped);
    assert_eq!(outcome.deleted, 1);
    assert!(platform.deleted().contains(&expired));
    assert!(!platform.deleted().contains(&live));
}

#[tokio::test]
async fn bulk_sweep_visits_every_actor() {
    let platform = FakePlatform::shared();
    let now = Utc::now().timestamp();
    let (project_a, _) = platform.add_project(&names::actor_project_name("actor-a"));
    platform.add_session_compose(
        &project_a,
        &session_meta("actor-a", "chat-1", now - 3_600),
        "done",
        Some("done"),
    );
    let (project_b, _) = platform.add_project(&names::actor_project_name("actor-b"));
    platform.add_session_compose(
        &project_b,
        &session_meta("actor-b", "chat-1", now - 3_600),
        "done",
        Some("done"),
    );

    let sweeper = IdleSweeper::new();
    let actor_count = sweeper.run_all(&*platform, None).await.unwrap();
    assert_eq!(actor_count, 2);
    assert_eq!(platform.deleted().len(), 2);
}
