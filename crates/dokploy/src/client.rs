//! HTTP client for the Dokploy tRPC API.
//!
//! Every procedure goes through the batched envelope: queries send
//! `input={"0":{"json":<input>}}` as a URL parameter with GET, mutations send
//! the same envelope as a JSON body with POST. Responses unwrap with the
//! precedence `result.data.json` -> `result.data` -> `result`.

use crate::error::{status_for_code, DokployError, Result};
use crate::models::*;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 20;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 2_000;
const BACKOFF_JITTER_MS: u64 = 120;
const REQUEST_ID_MAX_LEN: usize = 128;

/// Configuration for a [`DokployClient`].
#[derive(Debug, Clone)]
pub struct DokployConfig {
    pub base_url: String,
    pub api_key: String,
    /// Re-attempts after the first try.
    pub max_retries: u32,
    /// Per-attempt deadline.
    pub request_timeout: Duration,
}

impl DokployConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

/// Typed Dokploy API client. Stateless apart from configuration; safe to
/// share across tasks.
#[derive(Clone)]
pub struct DokployClient {
    config: DokployConfig,
    http: reqwest::Client,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Query,
    Mutation,
}

impl DokployClient {
    pub fn new(config: DokployConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, procedure: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/api/trpc/{procedure}")
    }

    // ---------- Projects ----------

    pub async fn project_all(&self, request_id: Option<&str>) -> Result<Vec<Project>> {
        self.call(CallKind::Query, "project.all", &json!({}), request_id)
            .await
    }

    pub async fn project_create(
        &self,
        input: CreateProject,
        request_id: Option<&str>,
    ) -> Result<Project> {
        require(&input.name, "project.create", "name")?;
        self.call(CallKind::Mutation, "project.create", &input, request_id)
            .await
    }

    pub async fn project_one(
        &self,
        project_id: &str,
        request_id: Option<&str>,
    ) -> Result<Project> {
        require(project_id, "project.one", "projectId")?;
        self.call(
            CallKind::Query,
            "project.one",
            &json!({ "projectId": project_id }),
            request_id,
        )
        .await
    }

    // ---------- Composes ----------

    pub async fn compose_create(
        &self,
        input: CreateCompose,
        request_id: Option<&str>,
    ) -> Result<Compose> {
        require(&input.name, "compose.create", "name")?;
        require(&input.environment_id, "compose.create", "environmentId")?;
        require(&input.compose_file, "compose.create", "composeFile")?;
        self.call(CallKind::Mutation, "compose.create", &input, request_id)
            .await
    }

    pub async fn compose_one(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Compose> {
        require(compose_id, "compose.one", "composeId")?;
        self.call(
            CallKind::Query,
            "compose.one",
            &json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    pub async fn compose_update(
        &self,
        input: UpdateCompose,
        request_id: Option<&str>,
    ) -> Result<()> {
        require(&input.compose_id, "compose.update", "composeId")?;
        let _: Value = self
            .call(CallKind::Mutation, "compose.update", &input, request_id)
            .await?;
        Ok(())
    }

    pub async fn compose_delete(
        &self,
        compose_id: &str,
        delete_volumes: bool,
        request_id: Option<&str>,
    ) -> Result<()> {
        require(compose_id, "compose.delete", "composeId")?;
        let _: Value = self
            .call(
                CallKind::Mutation,
                "compose.delete",
                &json!({ "composeId": compose_id, "deleteVolumes": delete_volumes }),
                request_id,
            )
            .await?;
        Ok(())
    }

    pub async fn compose_deploy(&self, compose_id: &str, request_id: Option<&str>) -> Result<()> {
        require(compose_id, "compose.deploy", "composeId")?;
        let _: Value = self
            .call(
                CallKind::Mutation,
                "compose.deploy",
                &json!({ "composeId": compose_id }),
                request_id,
            )
            .await?;
        Ok(())
    }

    pub async fn compose_redeploy(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<()> {
        require(compose_id, "compose.redeploy", "composeId")?;
        let _: Value = self
            .call(
                CallKind::Mutation,
                "compose.redeploy",
                &json!({ "composeId": compose_id }),
                request_id,
            )
            .await?;
        Ok(())
    }

    // ---------- Deployments ----------

    pub async fn deployments_by_compose(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        require(compose_id, "deployment.allByCompose", "composeId")?;
        self.call(
            CallKind::Query,
            "deployment.allByCompose",
            &json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    // ---------- Domains ----------

    pub async fn domains_by_compose(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<Domain>> {
        require(compose_id, "domain.byComposeId", "composeId")?;
        self.call(
            CallKind::Query,
            "domain.byComposeId",
            &json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    pub async fn domain_generate(
        &self,
        input: GenerateDomain,
        request_id: Option<&str>,
    ) -> Result<GeneratedDomain> {
        require(&input.app_name, "domain.generateDomain", "appName")?;
        self.call(
            CallKind::Mutation,
            "domain.generateDomain",
            &input,
            request_id,
        )
        .await
    }

    pub async fn domain_create(
        &self,
        input: CreateDomain,
        request_id: Option<&str>,
    ) -> Result<Domain> {
        require(&input.compose_id, "domain.create", "composeId")?;
        require(&input.host, "domain.create", "host")?;
        self.call(CallKind::Mutation, "domain.create", &input, request_id)
            .await
    }

    // ---------- Servers ----------

    pub async fn server_all(&self, request_id: Option<&str>) -> Result<Vec<Server>> {
        self.call(CallKind::Query, "server.all", &json!({}), request_id)
            .await
    }

    // ---------- File manager ----------

    pub async fn file_list(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        require(compose_id, "fileManager.listFiles", "composeId")?;
        self.call(
            CallKind::Query,
            "fileManager.listFiles",
            &json!({ "composeId": compose_id, "path": path }),
            request_id,
        )
        .await
    }

    pub async fn file_read(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<FileContent> {
        require(compose_id, "fileManager.readFile", "composeId")?;
        require(path, "fileManager.readFile", "path")?;
        self.call(
            CallKind::Query,
            "fileManager.readFile",
            &json!({ "composeId": compose_id, "path": path }),
            request_id,
        )
        .await
    }

    pub async fn file_write(&self, input: WriteFile, request_id: Option<&str>) -> Result<()> {
        require(&input.compose_id, "fileManager.writeFile", "composeId")?;
        require(&input.path, "fileManager.writeFile", "path")?;
        let _: Value = self
            .call(CallKind::Mutation, "fileManager.writeFile", &input, request_id)
            .await?;
        Ok(())
    }

    pub async fn file_mkdir(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<()> {
        require(compose_id, "fileManager.createDirectory", "composeId")?;
        require(path, "fileManager.createDirectory", "path")?;
        let _: Value = self
            .call(
                CallKind::Mutation,
                "fileManager.createDirectory",
                &json!({ "composeId": compose_id, "path": path }),
                request_id,
            )
            .await?;
        Ok(())
    }

    pub async fn file_delete(
        &self,
        compose_id: &str,
        path: &str,
        recursive: bool,
        request_id: Option<&str>,
    ) -> Result<()> {
        require(compose_id, "fileManager.deleteFileOrDirectory", "composeId")?;
        require(path, "fileManager.deleteFileOrDirectory", "path")?;
        let _: Value = self
            .call(
                CallKind::Mutation,
                "fileManager.deleteFileOrDirectory",
                &json!({ "composeId": compose_id, "path": path, "recursive": recursive }),
                request_id,
            )
            .await?;
        Ok(())
    }

    pub async fn file_search(
        &self,
        compose_id: &str,
        query: &str,
        path: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        require(compose_id, "fileManager.searchFiles", "composeId")?;
        require(query, "fileManager.searchFiles", "query")?;
        self.call(
            CallKind::Query,
            "fileManager.searchFiles",
            &json!({ "composeId": compose_id, "query": query, "path": path.unwrap_or("") }),
            request_id,
        )
        .await
    }

    // ---------- Core dispatch ----------

    async fn call<I: Serialize, O: DeserializeOwned>(
        &self,
        kind: CallKind,
        procedure: &'static str,
        input: &I,
        request_id: Option<&str>,
    ) -> Result<O> {
        let request_id = resolve_request_id(request_id);
        let envelope = json!({ "0": { "json": input } });
        let mut last_err: Option<DokployError> = None;

        for attempt in 0..=self.config.max_retries {
            debug!(procedure, attempt, request_id = %request_id, "dokploy request");
            match self
                .dispatch(kind, procedure, &envelope, &request_id)
                .await
            {
                Ok(value) => {
                    debug!(procedure, attempt, request_id = %request_id, "dokploy ok");
                    return serde_json::from_value(value).map_err(|err| {
                        DokployError::InvalidTrpcResponse {
                            procedure,
                            message: err.to_string(),
                        }
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        procedure,
                        attempt,
                        request_id = %request_id,
                        delay_ms = delay.as_millis() as u64,
                        reason = %err,
                        "dokploy retryable failure"
                    );
                    last_err = Some(err);
                    sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    error!(procedure, request_id = %request_id, reason = %err, "dokploy retries exhausted");
                    return Err(DokployError::RetryExhausted {
                        procedure,
                        attempts: self.config.max_retries + 1,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    error!(procedure, request_id = %request_id, reason = %err, "dokploy failure");
                    return Err(err);
                }
            }
        }

        // Unreachable: the loop always returns. Kept for the type checker.
        Err(last_err.unwrap_or(DokployError::Timeout { procedure }))
    }

    async fn dispatch(
        &self,
        kind: CallKind,
        procedure: &'static str,
        envelope: &Value,
        request_id: &str,
    ) -> Result<Value> {
        let builder = match kind {
            CallKind::Query => {
                let input = urlencoding::encode_binary(envelope.to_string().as_bytes()).into_owned();
                let url = format!("{}?batch=1&input={input}", self.url(procedure));
                self.http.get(url)
            }
            CallKind::Mutation => {
                let url = format!("{}?batch=1", self.url(procedure));
                self.http
                    .post(url)
                    .header("content-type", "application/json")
                    .json(envelope)
            }
        };

        let response = builder
            .header("x-api-key", &self.config.api_key)
            .header("x-request-id", request_id)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|err| transport_error(procedure, err))?;

        let http_status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| transport_error(procedure, err))?;
        let value: Value =
            serde_json::from_str(&body).map_err(|err| DokployError::InvalidJsonResponse {
                procedure,
                message: err.to_string(),
            })?;

        unwrap_envelope(procedure, value, http_status)
    }
}

fn transport_error(procedure: &'static str, err: reqwest::Error) -> DokployError {
    if err.is_timeout() {
        DokployError::Timeout { procedure }
    } else {
        DokployError::Network {
            procedure,
            message: err.to_string(),
        }
    }
}

fn require(value: &str, procedure: &'static str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        Err(DokployError::MissingField { procedure, field })
    } else {
        Ok(())
    }
}

fn resolve_request_id(candidate: Option<&str>) -> String {
    match candidate {
        Some(id) if is_valid_request_id(id) => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= REQUEST_ID_MAX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let jitter = rand::rng().random_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(base.saturating_add(jitter).min(BACKOFF_CAP_MS))
}

/// Unwrap the tRPC batched response. The payload is either an array with a
/// single envelope or a bare envelope.
fn unwrap_envelope(procedure: &'static str, value: Value, http_status: u16) -> Result<Value> {
    let envelope = match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(DokployError::InvalidTrpcResponse {
                    procedure,
                    message: "empty batch response".to_string(),
                });
            }
            items.swap_remove(0)
        }
        other => other,
    };

    if let Some(err) = envelope.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("platform error")
            .to_string();
        let code = err
            .get("data")
            .and_then(|data| data.get("code"))
            .and_then(Value::as_str)
            .unwrap_or("INTERNAL_SERVER_ERROR")
            .to_string();
        return Err(DokployError::Api {
            status: status_for_code(&code),
            code,
            message,
            procedure,
        });
    }

    match envelope.get("result") {
        Some(result) => {
            let unwrapped = match result.get("data") {
                Some(data) => data.get("json").unwrap_or(data),
                None => result,
            };
            Ok(unwrapped.clone())
        }
        None if http_status >= 400 => Err(DokployError::Api {
            status: http_status,
            code: code_for_status(http_status).to_string(),
            message: format!("HTTP {http_status} with no tRPC envelope"),
            procedure,
        }),
        None => Err(DokployError::InvalidTrpcResponse {
            procedure,
            message: "missing result field".to_string(),
        }),
    }
}

fn code_for_status(status: u16) -> &'static str {
    match status {
        400 => "BAD_REQUEST",
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        409 => "CONFLICT",
        413 => "PAYLOAD_TOO_LARGE",
        429 => "TOO_MANY_REQUESTS",
        501 => "NOT_IMPLEMENTED",
        _ => "INTERNAL_SERVER_ERROR",
    }
}
