use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use bolt_runtime::{RuntimeConfig, RuntimeError, SessionOrchestrator};
use dokploy::FileEncoding;

const ACTOR_COOKIE: &str = "bolt_actor_id";
const CLEANUP_SECRET_HEADER: &str = "x-runtime-cleanup-secret";
const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_PATH_BYTES: usize = 4096;
const MAX_QUERY_BYTES: usize = 512;
const MAX_ID_BYTES: usize = 256;

#[derive(Clone)]
pub struct AppState {
    config: Arc<RuntimeConfig>,
    orchestrator: Option<SessionOrchestrator>,
    started_at: chrono::DateTime<Utc>,
}

impl AppState {
    pub fn new(config: RuntimeConfig, orchestrator: Option<SessionOrchestrator>) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            started_at: Utc::now(),
        }
    }

    /// The remote control plane, or 400 when the configured provider is not
    /// dokploy.
    fn remote(&self) -> Result<&SessionOrchestrator, RuntimeError> {
        self.orchestrator
            .as_ref()
            .ok_or_else(|| RuntimeError::bad_request("runtime provider is not dokploy"))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/api/runtime/session",
            post(session_post).get(session_get).delete(session_delete),
        )
        .route("/api/runtime/session/heartbeat", post(session_heartbeat))
        .route("/api/runtime/files/list", get(files_list))
        .route("/api/runtime/files/read", get(files_read))
        .route("/api/runtime/files/write", put(files_write).post(files_write))
        .route("/api/runtime/files/mkdir", post(files_mkdir))
        .route("/api/runtime/files/delete", delete(files_delete))
        .route("/api/runtime/files/search", get(files_search))
        .route("/api/runtime/deploy/redeploy", post(deploy_redeploy))
        .route("/api/runtime/cleanup", post(cleanup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "ok",
        "provider": state.config.provider.as_str(),
        "uptime_seconds": uptime_seconds,
    }))
}

// ---------- Session ----------

#[derive(Debug, Deserialize)]
struct SessionPostQuery {
    intent: Option<String>,
    #[serde(rename = "runtimeToken")]
    runtime_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPostBody {
    chat_id: Option<String>,
    template_id: Option<String>,
    runtime_token: Option<String>,
}

async fn session_post(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<SessionPostQuery>,
    headers: HeaderMap,
    body: Option<Json<SessionPostBody>>,
) -> Result<Response, ApiError> {
    let orchestrator = state.remote()?;
    let request_id = request_id_from(&headers);
    let body = body.map(|Json(b)| b);

    // sendBeacon cannot issue DELETE; a POST with intent=delete stands in.
    if query.intent.as_deref() == Some("delete") {
        let token = resolve_token(
            &headers,
            body.as_ref().and_then(|b| b.runtime_token.as_deref()),
            query.runtime_token.as_deref(),
        )?;
        orchestrator.delete(&token, request_id.as_deref()).await?;
        return Ok(Json(json!({ "deleted": true })).into_response());
    }

    let body = body.ok_or_else(|| RuntimeError::bad_request("request body is required"))?;
    let chat_id = body
        .chat_id
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            RuntimeError::bad_request("chatId is required")
                .with_details(json!({ "field": "chatId" }))
        })?;
    check_len("chatId", chat_id, MAX_ID_BYTES)?;
    if let Some(template_id) = body.template_id.as_deref() {
        check_len("templateId", template_id, MAX_ID_BYTES)?;
    }

    let (jar, actor_id) = ensure_actor_cookie(jar);
    let lease = orchestrator
        .create(bolt_runtime::CreateSessionRequest {
            actor_id,
            chat_id: chat_id.to_string(),
            template_id: body.template_id.clone(),
            request_id,
        })
        .await?;

    let payload = Json(json!({
        "runtimeToken": lease.token,
        "session": lease.session,
        "deploymentStatus": lease.deployment_status,
    }));
    Ok((jar, payload).into_response())
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(rename = "runtimeToken")]
    runtime_token: Option<String>,
}

async fn session_get(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, None, query.runtime_token.as_deref())?;
    let request_id = request_id_from(&headers);
    let view = orchestrator.get(&token, request_id.as_deref()).await?;
    Ok(Json(json!({
        "sessionStatus": view.session.status,
        "previewUrl": view.session.preview_url,
        "deploymentStatus": view.deployment_status,
        "session": view.session,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    runtime_token: Option<String>,
}

async fn session_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TokenBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(
        &headers,
        body.as_ref().and_then(|b| b.runtime_token.as_deref()),
        None,
    )?;
    let request_id = request_id_from(&headers);
    orchestrator.delete(&token, request_id.as_deref()).await?;
    Ok(Json(json!({ "deleted": true })))
}

async fn session_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TokenBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(
        &headers,
        body.as_ref().and_then(|b| b.runtime_token.as_deref()),
        None,
    )?;
    let request_id = request_id_from(&headers);
    let outcome = orchestrator
        .heartbeat(&token, request_id.as_deref())
        .await?;
    Ok(Json(json!({
        "status": outcome.status,
        "expiresAt": outcome.expires_at,
        "runtimeToken": outcome.token,
    })))
}

// ---------- Files ----------

#[derive(Debug, Deserialize)]
struct FilePathQuery {
    path: Option<String>,
    #[serde(rename = "runtimeToken")]
    runtime_token: Option<String>,
}

async fn files_list(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, None, query.runtime_token.as_deref())?;
    if let Some(path) = query.path.as_deref() {
        check_len("path", path, MAX_PATH_BYTES)?;
    }
    let request_id = request_id_from(&headers);
    let entries = orchestrator
        .list_files(&token, query.path.as_deref(), request_id.as_deref())
        .await?;
    Ok(Json(json!({ "entries": entries })))
}

async fn files_read(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, None, query.runtime_token.as_deref())?;
    let path = require_field("path", query.path.as_deref())?;
    check_len("path", path, MAX_PATH_BYTES)?;
    let request_id = request_id_from(&headers);
    let file = orchestrator
        .read_file(&token, path, request_id.as_deref())
        .await?;
    Ok(Json(json!({ "file": file })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteBody {
    path: Option<String>,
    content: Option<String>,
    encoding: Option<FileEncoding>,
    runtime_token: Option<String>,
}

async fn files_write(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<WriteBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, body.runtime_token.as_deref(), None)?;
    let path = require_field("path", body.path.as_deref())?;
    check_len("path", path, MAX_PATH_BYTES)?;
    let content = body
        .content
        .ok_or_else(|| RuntimeError::bad_request("content is required"))?;
    let encoding = body.encoding.unwrap_or(FileEncoding::Utf8);
    let request_id = request_id_from(&headers);
    orchestrator
        .write_file(&token, path, content, encoding, request_id.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MkdirBody {
    path: Option<String>,
    runtime_token: Option<String>,
}

async fn files_mkdir(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MkdirBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, body.runtime_token.as_deref(), None)?;
    let path = require_field("path", body.path.as_deref())?;
    check_len("path", path, MAX_PATH_BYTES)?;
    let request_id = request_id_from(&headers);
    orchestrator
        .make_directory(&token, path, request_id.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
    runtime_token: Option<String>,
}

async fn files_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DeleteBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, body.runtime_token.as_deref(), None)?;
    let path = require_field("path", body.path.as_deref())?;
    check_len("path", path, MAX_PATH_BYTES)?;
    let request_id = request_id_from(&headers);
    orchestrator
        .delete_entry(&token, path, body.recursive, request_id.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    query: Option<String>,
    path: Option<String>,
    #[serde(rename = "runtimeToken")]
    runtime_token: Option<String>,
}

async fn files_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let token = resolve_token(&headers, None, query.runtime_token.as_deref())?;
    let needle = require_field("query", query.query.as_deref())?;
    check_len("query", needle, MAX_QUERY_BYTES)?;
    if let Some(path) = query.path.as_deref() {
        check_len("path", path, MAX_PATH_BYTES)?;
    }
    let request_id = request_id_from(&headers);
    let entries = orchestrator
        .search_files(&token, needle, query.path.as_deref(), request_id.as_deref())
        .await?;
    Ok(Json(json!({ "entries": entries })))
}

// ---------- Deploy and cleanup ----------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeployBody {
    reason: Option<String>,
    runtime_token: Option<String>,
}

async fn deploy_redeploy(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RedeployBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    let body = body.map(|Json(b)| b);
    let token = resolve_token(
        &headers,
        body.as_ref().and_then(|b| b.runtime_token.as_deref()),
        None,
    )?;
    let request_id = request_id_from(&headers);
    if let Some(reason) = body.as_ref().and_then(|b| b.reason.as_deref()) {
        check_len("reason", reason, MAX_ID_BYTES)?;
        tracing::info!(reason, "redeploy requested");
    }
    orchestrator
        .redeploy(&token, request_id.as_deref())
        .await?;
    Ok(Json(json!({ "queued": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupBody {
    actor_id: Option<String>,
}

async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CleanupBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = state.remote()?;
    if let Some(expected) = state.config.cleanup_secret.as_deref() {
        let presented = headers
            .get(CLEANUP_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            return Err(RuntimeError::new(403, "FORBIDDEN", "cleanup secret mismatch").into());
        }
    }

    let request_id = request_id_from(&headers);
    let body = body.map(|Json(b)| b);
    let actor_id = body.as_ref().and_then(|b| b.actor_id.as_deref());
    let actor_count = match actor_id {
        Some(actor_id) => {
            check_len("actorId", actor_id, MAX_ID_BYTES)?;
            let outcome = orchestrator
                .sweep_actor(actor_id, request_id.as_deref())
                .await?;
            if outcome.skipped {
                warn!(actor = %actor_id, "cleanup skipped: sweep already running");
            }
            1
        }
        None => orchestrator.sweep_all(request_id.as_deref()).await?,
    };
    Ok(Json(json!({ "ok": true, "actorCount": actor_count })))
}

// ---------- Shared helpers ----------

fn ensure_actor_cookie(jar: CookieJar) -> (CookieJar, String) {
    if let Some(existing) = jar.get(ACTOR_COOKIE) {
        let value = existing.value().to_string();
        if !value.is_empty() && value.len() <= MAX_ID_BYTES {
            return (jar, value);
        }
    }
    let actor_id = Uuid::new_v4().to_string();
    let cookie = Cookie::build((ACTOR_COOKIE, actor_id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(365))
        .build();
    (jar.add(cookie), actor_id)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Token precedence: Authorization bearer, then body, then query.
fn resolve_token(
    headers: &HeaderMap,
    body_token: Option<&str>,
    query_token: Option<&str>,
) -> Result<String, RuntimeError> {
    bearer_token(headers)
        .or_else(|| body_token.map(str::to_string))
        .or_else(|| query_token.map(str::to_string))
        .filter(|token| !token.is_empty())
        .ok_or_else(RuntimeError::missing_token)
}

fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn require_field<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, RuntimeError> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        RuntimeError::bad_request(format!("{field} is required"))
            .with_details(json!({ "field": field }))
    })
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), RuntimeError> {
    if value.len() > max {
        return Err(RuntimeError::bad_request(format!("{field} is too long"))
            .with_details(json!({ "field": field, "max": max })));
    }
    Ok(())
}

struct ApiError(RuntimeError);

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "error": self.0.message,
            "code": self.0.code,
        });
        if let Some(details) = self.0.details {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}
