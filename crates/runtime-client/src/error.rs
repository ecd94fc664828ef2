//! Client-side error type.

use thiserror::Error;

/// Failure talking to the runtime API. Cloneable so shared in-flight
/// operations can hand the same error to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The API answered with an error envelope.
    #[error("runtime API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Session is gone or the token no longer verifies.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
