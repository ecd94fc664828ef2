//! Wire types mirrored from the runtime API.

use serde::{Deserialize, Serialize};

/// Session lifecycle status as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Deploying,
    Ready,
    Error,
    Deleted,
}

/// Deployment status as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Done,
    Error,
}

/// Content encoding for reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
    Base64,
}

/// Entry kind in a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// The session object inside API payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub project_id: String,
    pub environment_id: String,
    pub compose_id: String,
    pub domain: String,
    pub preview_url: String,
    pub status: SessionStatus,
    pub expires_at: i64,
    #[serde(default)]
    pub server_id: Option<String>,
}

/// Response of session create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub runtime_token: String,
    pub session: RemoteSession,
    pub deployment_status: DeploymentStatus,
}

/// Response of session get.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshotPayload {
    pub session_status: SessionStatus,
    pub preview_url: String,
    pub deployment_status: DeploymentStatus,
    pub session: RemoteSession,
}

/// Response of heartbeat.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub status: SessionStatus,
    pub expires_at: i64,
    #[serde(default)]
    pub runtime_token: Option<String>,
}

/// A directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub virtual_path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// A file read result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub virtual_path: String,
    pub content: String,
    pub encoding: Encoding,
    #[serde(default)]
    pub is_binary: bool,
    #[serde(default)]
    pub size: u64,
}
