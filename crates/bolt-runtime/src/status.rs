//! Status derivations from platform deployment and compose state.

use dokploy::Deployment;
use serde::{Deserialize, Serialize};

/// Derived state of the most recent deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Done,
    Error,
}

/// User-visible lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Deploying,
    Ready,
    Error,
    Deleted,
}

impl SessionStatus {
    /// Whether a compose in this state can back a reused session.
    pub fn is_reusable(self) -> bool {
        matches!(self, Self::Creating | Self::Deploying | Self::Ready)
    }
}

/// Derive the deployment status from the deployment list. No deployments
/// means the compose is still queued for its first deploy.
pub fn derive_deployment_status(deployments: &[Deployment]) -> DeploymentStatus {
    let latest = deployments
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at));
    match latest {
        None => DeploymentStatus::Queued,
        Some(deployment) => match deployment.status.as_deref() {
            Some("done") => DeploymentStatus::Done,
            Some("error") | Some("cancelled") => DeploymentStatus::Error,
            _ => DeploymentStatus::Running,
        },
    }
}

/// Derive the session status from deployment and compose state.
pub fn derive_session_status(
    deployment: DeploymentStatus,
    compose_status: Option<&str>,
) -> SessionStatus {
    if deployment == DeploymentStatus::Error || compose_status == Some("error") {
        SessionStatus::Error
    } else if deployment == DeploymentStatus::Done || compose_status == Some("done") {
        SessionStatus::Ready
    } else if deployment == DeploymentStatus::Running {
        SessionStatus::Deploying
    } else {
        SessionStatus::Creating
    }
}
