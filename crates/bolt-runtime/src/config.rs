//! Runtime configuration from the environment.
//!
//! In remote (`dokploy`) mode the required values fail fast at startup;
//! nothing later in the request path should have to re-validate them.

use std::env;
use thiserror::Error;

const DEFAULT_SESSION_IDLE_MIN: i64 = 15;
const DEFAULT_HEARTBEAT_SEC: i64 = 30;

/// Which runtime backs `/api/runtime` endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeProvider {
    /// Legacy in-browser container runtime; remote endpoints are disabled.
    Webcontainer,
    /// Remote compose deployments on a Dokploy instance.
    Dokploy,
}

impl RuntimeProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webcontainer => "webcontainer",
            Self::Dokploy => "dokploy",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid RUNTIME_PROVIDER: {0}")]
    InvalidProvider(String),
    #[error("{0} is required when RUNTIME_PROVIDER=dokploy")]
    MissingRemoteValue(&'static str),
    #[error("invalid {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("RUNTIME_SESSION_IDLE_MIN must be >= 1")]
    IdleTooShort,
    #[error("RUNTIME_HEARTBEAT_SEC must be >= 5")]
    HeartbeatTooShort,
    #[error("DOKPLOY_CANARY_ROLLOUT_PERCENT must be within [0, 100]")]
    CanaryPercentOutOfRange,
    #[error("DOKPLOY_CANARY_SERVER_ID is required when the canary percent is > 0")]
    CanaryWithoutServer,
}

/// Fully validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub provider: RuntimeProvider,
    pub enable_webcontainer_legacy: bool,
    pub dokploy_base_url: Option<String>,
    pub dokploy_api_key: Option<String>,
    pub server_id: Option<String>,
    pub canary_server_id: Option<String>,
    pub canary_rollout_percent: i64,
    pub session_idle_minutes: i64,
    pub heartbeat_seconds: i64,
    pub token_secret: Option<String>,
    pub cleanup_secret: Option<String>,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = match env::var("RUNTIME_PROVIDER").ok().as_deref() {
            None | Some("") | Some("webcontainer") => RuntimeProvider::Webcontainer,
            Some("dokploy") => RuntimeProvider::Dokploy,
            Some(other) => return Err(ConfigError::InvalidProvider(other.to_string())),
        };

        let enable_webcontainer_legacy = match env::var("ENABLE_WEBCONTAINER_LEGACY").ok() {
            Some(raw) => parse_bool(&raw),
            None => provider == RuntimeProvider::Webcontainer,
        };

        let config = Self {
            provider,
            enable_webcontainer_legacy,
            dokploy_base_url: non_empty(env::var("DOKPLOY_BASE_URL").ok()),
            dokploy_api_key: non_empty(env::var("DOKPLOY_API_KEY").ok()),
            server_id: non_empty(env::var("DOKPLOY_SERVER_ID").ok()),
            canary_server_id: non_empty(env::var("DOKPLOY_CANARY_SERVER_ID").ok()),
            canary_rollout_percent: parse_number("DOKPLOY_CANARY_ROLLOUT_PERCENT", 0)?,
            session_idle_minutes: parse_number("RUNTIME_SESSION_IDLE_MIN", DEFAULT_SESSION_IDLE_MIN)?,
            heartbeat_seconds: parse_number("RUNTIME_HEARTBEAT_SEC", DEFAULT_HEARTBEAT_SEC)?,
            token_secret: non_empty(env::var("RUNTIME_TOKEN_SECRET").ok()),
            cleanup_secret: non_empty(env::var("RUNTIME_CLEANUP_SECRET").ok()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_idle_minutes < 1 {
            return Err(ConfigError::IdleTooShort);
        }
        if self.heartbeat_seconds < 5 {
            return Err(ConfigError::HeartbeatTooShort);
        }
        if !(0..=100).contains(&self.canary_rollout_percent) {
            return Err(ConfigError::CanaryPercentOutOfRange);
        }
        if self.provider == RuntimeProvider::Dokploy {
            if self.dokploy_base_url.is_none() {
                return Err(ConfigError::MissingRemoteValue("DOKPLOY_BASE_URL"));
            }
            if self.dokploy_api_key.is_none() {
                return Err(ConfigError::MissingRemoteValue("DOKPLOY_API_KEY"));
            }
            if self.token_secret.is_none() {
                return Err(ConfigError::MissingRemoteValue("RUNTIME_TOKEN_SECRET"));
            }
            if self.canary_rollout_percent > 0 && self.canary_server_id.is_none() {
                return Err(ConfigError::CanaryWithoutServer);
            }
        }
        Ok(())
    }

    /// Session lease length in seconds.
    pub fn idle_ttl_sec(&self) -> i64 {
        self.session_idle_minutes * 60
    }

    pub fn is_remote(&self) -> bool {
        self.provider == RuntimeProvider::Dokploy
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_number(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) if raw.trim().is_empty() => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
    }
}
