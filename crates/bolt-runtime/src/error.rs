//! The single error type flowing from the control plane to the HTTP adapter.

use dokploy::DokployError;
use serde_json::Value;
use thiserror::Error;

/// A runtime failure with an HTTP status and a stable machine code. The HTTP
/// adapter is the only layer that turns this into a response.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct RuntimeError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl RuntimeError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, "UNAUTHORIZED", message)
    }

    pub fn missing_token() -> Self {
        Self::new(401, "MISSING_RUNTIME_TOKEN", "runtime token is required")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, "NOT_FOUND", message)
    }

    pub fn no_environment() -> Self {
        Self::new(500, "NO_ENVIRONMENT", "project has no usable environment")
    }

    pub fn no_canary_deploy_server() -> Self {
        Self::new(
            503,
            "NO_CANARY_DEPLOY_SERVER",
            "canary rollout requires a canary deploy server",
        )
    }

    pub fn domain_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, "RUNTIME_DOMAIN_UNAVAILABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "INTERNAL_SERVER_ERROR", message)
    }

    pub fn invalid_path() -> Self {
        Self::bad_request("Invalid runtime path")
    }
}

impl From<DokployError> for RuntimeError {
    fn from(err: DokployError) -> Self {
        Self {
            status: err.status(),
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_errors_keep_status_and_code() {
        let err: RuntimeError = DokployError::Timeout {
            procedure: "compose.deploy",
        }
        .into();
        assert_eq!(err.status, 504);
        assert_eq!(err.code, "TIMEOUT");
    }
}
