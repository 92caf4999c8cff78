//! Bearer-token authentication for feed requests
//!
//! Provides:
//! - Service JWT decoding and verification (ES256K / ES256)
//! - Multibase signing-key parsing and the [`KeyResolver`] seam
//! - [`Authenticator`], which applies the configured [`AuthMode`]

pub mod jwt;
pub mod keys;

use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::FeedgenError;

pub use jwt::{extract_bearer, Algorithm, Audience, Claims, Token};
pub use keys::{KeyResolver, PublicKey};

/// What to do with a credential that fails verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Serve the request anonymously
    #[default]
    BestEffort,
    /// Answer 401
    Required,
}

/// Why a credential was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is missing")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    MalformedHeader,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("JWT 'iss' claim is missing")]
    MissingIssuer,

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token not valid yet")]
    NotYetValid,

    #[error("Invalid audience (expected {0})")]
    InvalidAudience(String),

    #[error("DID resolution failed: {0}")]
    Resolution(String),
}

impl From<AuthError> for FeedgenError {
    fn from(err: AuthError) -> Self {
        FeedgenError::Unauthorized(err.to_string())
    }
}

/// Verifies `Authorization` headers against the service DID
pub struct Authenticator {
    mode: AuthMode,
    service_did: String,
    keys: Arc<dyn KeyResolver>,
}

impl Authenticator {
    pub fn new(mode: AuthMode, service_did: impl Into<String>, keys: Arc<dyn KeyResolver>) -> Self {
        Self {
            mode,
            service_did: service_did.into(),
            keys,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn service_did(&self) -> &str {
        &self.service_did
    }

    /// Fully verify a header and return the issuer DID
    pub async fn verify(&self, header: Option<&str>) -> Result<String, AuthError> {
        self.verify_at(header, chrono::Utc::now().timestamp()).await
    }

    /// Same as [`Self::verify`] with an explicit clock, in unix seconds
    pub async fn verify_at(&self, header: Option<&str>, now: i64) -> Result<String, AuthError> {
        let header = header.filter(|h| !h.is_empty()).ok_or(AuthError::MissingHeader)?;
        let token = Token::decode(extract_bearer(header)?)?;
        let issuer = token.issuer()?.to_string();

        let key = self.keys.signing_key(&issuer).await?;
        token.verify_signature(&key)?;
        token.claims.check_time(now)?;
        token.claims.check_audience(&self.service_did)?;

        Ok(issuer)
    }

    /// DID of the caller, if one could be established.
    ///
    /// A missing header is always anonymous. A present but invalid one is
    /// anonymous in [`AuthMode::BestEffort`] and `Unauthorized` otherwise.
    pub async fn requester(&self, header: Option<&str>) -> Result<Option<String>, FeedgenError> {
        if header.map_or(true, str::is_empty) {
            return Ok(None);
        }
        match self.verify(header).await {
            Ok(did) => Ok(Some(did)),
            Err(e) => match self.mode {
                AuthMode::BestEffort => {
                    debug!(error = %e, "Ignoring invalid credential");
                    Ok(None)
                }
                AuthMode::Required => Err(e.into()),
            },
        }
    }
}
