//! Error types for the Dokploy API client.

use thiserror::Error;

/// Errors that can occur when talking to the Dokploy API.
#[derive(Debug, Error)]
pub enum DokployError {
    /// The platform rejected the call with a tRPC error envelope.
    #[error("{procedure}: API error ({code}): {message}")]
    Api {
        /// HTTP status this error maps to when surfaced outward.
        status: u16,
        /// Platform error code (e.g. `NOT_FOUND`).
        code: String,
        /// Error message from the platform.
        message: String,
        /// The tRPC procedure that failed.
        procedure: &'static str,
    },

    /// A required input field was empty; rejected before dispatch.
    #[error("{procedure}: missing required field `{field}`")]
    MissingField {
        procedure: &'static str,
        field: &'static str,
    },

    /// Response body was not valid JSON.
    #[error("{procedure}: invalid JSON response: {message}")]
    InvalidJsonResponse {
        procedure: &'static str,
        message: String,
    },

    /// Response parsed as JSON but did not match the tRPC envelope shape.
    #[error("{procedure}: invalid tRPC response: {message}")]
    InvalidTrpcResponse {
        procedure: &'static str,
        message: String,
    },

    /// The per-attempt deadline elapsed.
    #[error("{procedure}: request timed out")]
    Timeout { procedure: &'static str },

    /// Transport-level failure before a response was read.
    #[error("{procedure}: network error: {message}")]
    Network {
        procedure: &'static str,
        message: String,
    },

    /// All retry attempts were consumed by retryable failures.
    #[error("{procedure}: retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        procedure: &'static str,
        attempts: u32,
        last: Box<DokployError>,
    },
}

impl DokployError {
    /// HTTP status to surface for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Api { status, .. } => *status,
            Self::MissingField { .. } => 400,
            Self::InvalidJsonResponse { .. }
            | Self::InvalidTrpcResponse { .. }
            | Self::Network { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::RetryExhausted { last, .. } => last.status(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::Api { code, .. } => code,
            Self::MissingField { .. } => "BAD_REQUEST",
            Self::InvalidJsonResponse { .. } => "INVALID_JSON_RESPONSE",
            Self::InvalidTrpcResponse { .. } => "INVALID_TRPC_RESPONSE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
        }
    }

    /// The procedure this error came from.
    pub fn procedure(&self) -> &'static str {
        match self {
            Self::Api { procedure, .. }
            | Self::MissingField { procedure, .. }
            | Self::InvalidJsonResponse { procedure, .. }
            | Self::InvalidTrpcResponse { procedure, .. }
            | Self::Timeout { procedure }
            | Self::Network { procedure, .. }
            | Self::RetryExhausted { procedure, .. } => procedure,
        }
    }

    /// Whether another attempt may succeed. Follows the surfaced status:
    /// 408, 425, 429, 500, 502, 503 and 504 are retryable; everything else
    /// (including CONFLICT and the 4xx validation family) is not.
    pub fn is_retryable(&self) -> bool {
        if matches!(self, Self::RetryExhausted { .. }) {
            return false;
        }
        matches!(self.status(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
    }
}

/// Map a platform tRPC error code to the HTTP status surfaced outward.
pub(crate) fn status_for_code(code: &str) -> u16 {
    match code {
        "UNAUTHORIZED" => 401,
        "FORBIDDEN" => 403,
        "NOT_FOUND" => 404,
        "BAD_REQUEST" => 400,
        "CONFLICT" => 409,
        "PAYLOAD_TOO_LARGE" => 413,
        "TOO_MANY_REQUESTS" => 429,
        "NOT_IMPLEMENTED" => 501,
        _ => 502,
    }
}

/// Result type alias for Dokploy operations.
pub type Result<T> = std::result::Result<T, DokployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_not_retryable() {
        let err = DokployError::Api {
            status: status_for_code("CONFLICT"),
            code: "CONFLICT".into(),
            message: "name taken".into(),
            procedure: "compose.create",
        };
        assert_eq!(err.status(), 409);
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limit_and_transport_are_retryable() {
        let rate_limited = DokployError::Api {
            status: status_for_code("TOO_MANY_REQUESTS"),
            code: "TOO_MANY_REQUESTS".into(),
            message: "slow down".into(),
            procedure: "project.all",
        };
        assert!(rate_limited.is_retryable());

        let timeout = DokployError::Timeout {
            procedure: "compose.deploy",
        };
        assert_eq!(timeout.status(), 504);
        assert!(timeout.is_retryable());
    }

    #[test]
    fn unknown_platform_code_maps_to_bad_gateway() {
        assert_eq!(status_for_code("SOMETHING_ELSE"), 502);
        assert_eq!(status_for_code("INTERNAL_SERVER_ERROR"), 502);
    }

    #[test]
    fn retry_exhausted_keeps_last_status() {
        let err = DokployError::RetryExhausted {
            procedure: "compose.deploy",
            attempts: 3,
            last: Box::new(DokployError::Timeout {
                procedure: "compose.deploy",
            }),
        };
        assert_eq!(err.status(), 504);
        assert_eq!(err.code(), "RETRY_EXHAUSTED");
        assert!(!err.is_retryable());
    }
}
