//! Session token signing and verification.
//!
//! Tokens are three dot-joined URL-safe base64 segments
//! (`header.claims.signature`) signed with HMAC-SHA256. They are opaque to
//! the client and never stored server-side; revocation is implicit via
//! compose deletion.

use crate::error::{Result, RuntimeError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ALG: &str = "HS256";
const TOKEN_TYP: &str = "BOLT";
pub const CLAIMS_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Claims bound into a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub v: u32,
    pub actor_id: String,
    pub chat_id: String,
    pub project_id: String,
    pub environment_id: String,
    pub compose_id: String,
    pub domain: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    /// Build claims with `iat = now` and `exp = iat + ttl_sec`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor_id: impl Into<String>,
        chat_id: impl Into<String>,
        project_id: impl Into<String>,
        environment_id: impl Into<String>,
        compose_id: impl Into<String>,
        domain: impl Into<String>,
        ttl_sec: i64,
    ) -> Self {
        let iat = Utc::now().timestamp();
        Self {
            v: CLAIMS_VERSION,
            actor_id: actor_id.into(),
            chat_id: chat_id.into(),
            project_id: project_id.into(),
            environment_id: environment_id.into(),
            compose_id: compose_id.into(),
            domain: domain.into(),
            iat,
            exp: iat + ttl_sec,
        }
    }

    /// The same subject re-stamped with a fresh `iat`/`exp` horizon.
    pub fn renewed(&self, ttl_sec: i64) -> Self {
        let iat = Utc::now().timestamp();
        Self {
            iat,
            exp: iat + ttl_sec,
            ..self.clone()
        }
    }
}

/// Sign claims under the given secret.
pub fn sign(claims: &SessionClaims, secret: &str) -> Result<String> {
    let header = TokenHeader {
        alg: TOKEN_ALG.to_string(),
        typ: TOKEN_TYP.to_string(),
    };
    let header_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&header).map_err(|err| RuntimeError::internal(err.to_string()))?,
    );
    let claims_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(claims).map_err(|err| RuntimeError::internal(err.to_string()))?,
    );
    let signing_input = format!("{header_b64}.{claims_b64}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| RuntimeError::internal("invalid token secret"))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}

/// Verify a token and return its claims. Rejects malformed shape, unknown
/// algorithm, bad signature, wrong version, and expiry.
pub fn verify(token: &str, secret: &str) -> Result<SessionClaims> {
    let mut parts = token.split('.');
    let (header_b64, claims_b64, signature_b64) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(RuntimeError::unauthorized("malformed runtime token")),
        };

    let header: TokenHeader = decode_segment(header_b64)?;
    if header.alg != TOKEN_ALG || header.typ != TOKEN_TYP {
        return Err(RuntimeError::unauthorized("unsupported token algorithm"));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| RuntimeError::unauthorized("malformed runtime token"))?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| RuntimeError::internal("invalid token secret"))?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| RuntimeError::unauthorized("invalid token signature"))?;

    let claims: SessionClaims = decode_segment(claims_b64)?;
    if claims.v != CLAIMS_VERSION {
        return Err(RuntimeError::unauthorized("unsupported token version"));
    }
    if claims.exp < Utc::now().timestamp() {
        return Err(RuntimeError::unauthorized("runtime token expired"));
    }
    Ok(claims)
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| RuntimeError::unauthorized("malformed runtime token"))?;
    serde_json::from_slice(&bytes).map_err(|_| RuntimeError::unauthorized("malformed runtime token"))
}
