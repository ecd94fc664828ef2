//! HTTP binding to the runtime API.
//!
//! The trait is the seam: everything above it (session client, files mirror,
//! write coalescer) is testable against an in-memory implementation.

use crate::error::{ClientError, Result};
use crate::types::*;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Runtime API surface the editor needs.
#[async_trait]
pub trait RuntimeApi: Send + Sync {
    async fn create_session(
        &self,
        chat_id: &str,
        template_id: Option<&str>,
    ) -> Result<SessionPayload>;
    async fn get_session(&self, token: &str) -> Result<SessionSnapshotPayload>;
    async fn heartbeat(&self, token: &str) -> Result<HeartbeatPayload>;
    async fn delete_session(&self, token: &str) -> Result<()>;
    async fn redeploy(&self, token: &str, reason: Option<&str>) -> Result<()>;

    async fn list(&self, token: &str, virtual_path: Option<&str>) -> Result<Vec<RemoteEntry>>;
    async fn read(&self, token: &str, virtual_path: &str) -> Result<RemoteFile>;
    async fn write(
        &self,
        token: &str,
        virtual_path: &str,
        content: &str,
        encoding: Encoding,
    ) -> Result<()>;
    async fn mkdir(&self, token: &str, virtual_path: &str) -> Result<()>;
    async fn delete_path(&self, token: &str, virtual_path: &str, recursive: bool) -> Result<()>;
    async fn search(&self, token: &str, query: &str) -> Result<Vec<RemoteEntry>>;
}

/// Reqwest-backed client for the runtime API.
#[derive(Clone)]
pub struct HttpRuntimeApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRuntimeApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}{path}")
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
        if status >= 400 {
            return Err(ClientError::Api {
                status,
                code: value
                    .get("code")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                message: value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }
        serde_json::from_value(value).map_err(|err| ClientError::InvalidResponse(err.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;
        Self::decode(response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: Value,
    ) -> Result<T> {
        let mut request = self.http.request(method, self.url(path)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;
        Self::decode(response).await
    }
}

fn encode_query(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl RuntimeApi for HttpRuntimeApi {
    async fn create_session(
        &self,
        chat_id: &str,
        template_id: Option<&str>,
    ) -> Result<SessionPayload> {
        let mut body = json!({ "chatId": chat_id });
        if let Some(template_id) = template_id {
            body["templateId"] = json!(template_id);
        }
        self.send_json(reqwest::Method::POST, "/api/runtime/session", None, body)
            .await
    }

    async fn get_session(&self, token: &str) -> Result<SessionSnapshotPayload> {
        self.get_json("/api/runtime/session", token).await
    }

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatPayload> {
        self.send_json(
            reqwest::Method::POST,
            "/api/runtime/session/heartbeat",
            Some(token),
            json!({}),
        )
        .await
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::DELETE,
                "/api/runtime/session",
                Some(token),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn redeploy(&self, token: &str, reason: Option<&str>) -> Result<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::POST,
                "/api/runtime/deploy/redeploy",
                Some(token),
                json!({ "reason": reason }),
            )
            .await?;
        Ok(())
    }

    async fn list(&self, token: &str, virtual_path: Option<&str>) -> Result<Vec<RemoteEntry>> {
        let path = match virtual_path {
            Some(p) => format!("/api/runtime/files/list?path={}", encode_query(p)),
            None => "/api/runtime/files/list".to_string(),
        };
        let value: Value = self.get_json(&path, token).await?;
        serde_json::from_value(value["entries"].clone())
            .map_err(|err| ClientError::InvalidResponse(err.to_string()))
    }

    async fn read(&self, token: &str, virtual_path: &str) -> Result<RemoteFile> {
        let path = format!("/api/runtime/files/read?path={}", encode_query(virtual_path));
        let value: Value = self.get_json(&path, token).await?;
        serde_json::from_value(value["file"].clone())
            .map_err(|err| ClientError::InvalidResponse(err.to_string()))
    }

    async fn write(
        &self,
        token: &str,
        virtual_path: &str,
        content: &str,
        encoding: Encoding,
    ) -> Result<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::PUT,
                "/api/runtime/files/write",
                Some(token),
                json!({
                    "path": virtual_path,
                    "content": content,
                    "encoding": encoding,
                }),
            )
            .await?;
        Ok(())
    }

    async fn mkdir(&self, token: &str, virtual_path: &str) -> Result<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::POST,
                "/api/runtime/files/mkdir",
                Some(token),
                json!({ "path": virtual_path }),
            )
            .await?;
        Ok(())
    }

    async fn delete_path(&self, token: &str, virtual_path: &str, recursive: bool) -> Result<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::DELETE,
                "/api/runtime/files/delete",
                Some(token),
                json!({ "path": virtual_path, "recursive": recursive }),
            )
            .await?;
        Ok(())
    }

    async fn search(&self, token: &str, query: &str) -> Result<Vec<RemoteEntry>> {
        let path = format!("/api/runtime/files/search?query={}", encode_query(query));
        let value: Value = self.get_json(&path, token).await?;
        serde_json::from_value(value["entries"].clone())
            .map_err(|err| ClientError::InvalidResponse(err.to_string()))
    }
}
