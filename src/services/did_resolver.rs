//! DID document resolution
//!
//! Resolves `did:plc` (through the PLC directory) and `did:web` DIDs to their
//! DID documents and extracts the `#atproto` signing key. Successful and
//! failed resolutions are cached with separate lifetimes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::{AuthError, KeyResolver, PublicKey};

/// Configuration for the DID resolver
#[derive(Debug, Clone)]
pub struct DidResolverConfig {
    /// PLC directory base URL (default: https://plc.directory)
    pub plc_url: String,
    /// Cache TTL for resolved documents (default: 24 hours)
    pub hit_ttl: Duration,
    /// Cache TTL for failed resolutions (default: 5 minutes)
    pub error_ttl: Duration,
    /// Timeout for HTTP requests (default: 5 seconds)
    pub request_timeout: Duration,
    /// Maximum cache entries (default: 100000)
    pub max_cache_entries: usize,
}

impl Default for DidResolverConfig {
    fn default() -> Self {
        Self {
            plc_url: "https://plc.directory".to_string(),
            hit_ttl: Duration::from_secs(24 * 60 * 60),
            error_ttl: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(5),
            max_cache_entries: 100_000,
        }
    }
}

/// Cached resolution outcome with expiration
struct CachedResolution {
    outcome: Result<DidDocument, DidResolverError>,
    expires_at: Instant,
}

/// Caching resolver for `did:plc` and `did:web` identities
pub struct DidResolver {
    config: DidResolverConfig,
    cache: RwLock<HashMap<String, CachedResolution>>,
    http_client: reqwest::Client,
}

impl DidResolver {
    pub fn new() -> Self {
        Self::with_config(DidResolverConfig::default())
    }

    pub fn with_config(config: DidResolverConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("feedgen/1.0")
            .build()
            .unwrap_or_default();

        Self {
            config,
            cache: RwLock::new(HashMap::new()),
            http_client,
        }
    }

    /// Resolve a DID to its DID Document
    pub async fn resolve(&self, did: &str) -> Result<DidDocument, DidResolverError> {
        if let Some(outcome) = self.get_cached(did).await {
            debug!(did = %did, "DID resolved from cache");
            return outcome;
        }

        let outcome = self.resolve_uncached(did).await;
        let ttl = if outcome.is_ok() {
            self.config.hit_ttl
        } else {
            self.config.error_ttl
        };
        self.cache_outcome(did, outcome.clone(), ttl).await;

        outcome
    }

    async fn resolve_uncached(&self, did: &str) -> Result<DidDocument, DidResolverError> {
        let url = if did.starts_with("did:plc:") {
            format!("{}/{}", self.config.plc_url.trim_end_matches('/'), did)
        } else if did.starts_with("did:web:") {
            did_web_to_url(did)?
        } else {
            return Err(DidResolverError::UnsupportedMethod(did.to_string()));
        };
        debug!(did = %did, url = %url, "Resolving DID");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/did+ld+json, application/json")
            .send()
            .await
            .map_err(|e| DidResolverError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DidResolverError::ResolutionFailed(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let document: DidDocument = response
            .json()
            .await
            .map_err(|e| DidResolverError::InvalidDocument(e.to_string()))?;

        if document.id != did {
            warn!(
                expected = %did,
                actual = %document.id,
                "DID document ID mismatch"
            );
        }

        Ok(document)
    }

    async fn get_cached(&self, did: &str) -> Option<Result<DidDocument, DidResolverError>> {
        let cache = self.cache.read().await;
        cache.get(did).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.outcome.clone())
            } else {
                None
            }
        })
    }

    async fn cache_outcome(
        &self,
        did: &str,
        outcome: Result<DidDocument, DidResolverError>,
        ttl: Duration,
    ) {
        let mut cache = self.cache.write().await;

        if cache.len() >= self.config.max_cache_entries {
            cache.retain(|_, v| v.expires_at > Instant::now());

            // Still full: drop half
            if cache.len() >= self.config.max_cache_entries {
                let to_remove: Vec<_> = cache.keys().take(cache.len() / 2).cloned().collect();
                for key in to_remove {
                    cache.remove(&key);
                }
            }
        }

        cache.insert(
            did.to_string(),
            CachedResolution {
                outcome,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl Default for DidResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyResolver for DidResolver {
    async fn signing_key(&self, did: &str) -> Result<PublicKey, AuthError> {
        let document = self
            .resolve(did)
            .await
            .map_err(|e| AuthError::Resolution(format!("{}: {}", did, e)))?;
        document.signing_key()
    }
}

/// Convert a did:web DID to its resolution URL
fn did_web_to_url(did: &str) -> Result<String, DidResolverError> {
    let without_prefix = did
        .strip_prefix("did:web:")
        .ok_or_else(|| DidResolverError::InvalidDid("Missing did:web: prefix".to_string()))?;

    let parts: Vec<&str> = without_prefix.split(':').collect();
    if parts[0].is_empty() {
        return Err(DidResolverError::InvalidDid(
            "Empty domain in did:web".to_string(),
        ));
    }

    let domain = parts[0].replace("%3A", ":");

    let path = if parts.len() > 1 {
        format!("/{}/did.json", parts[1..].join("/"))
    } else {
        "/.well-known/did.json".to_string()
    };

    Ok(format!("https://{domain}{path}"))
}

/// DID Document structure (the parts atproto uses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,

    pub id: String,

    #[serde(rename = "alsoKnownAs", default)]
    pub also_known_as: Vec<String>,

    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,

    #[serde(default)]
    pub service: Vec<Service>,
}

impl DidDocument {
    /// The `#atproto` verification method's key
    pub fn signing_key(&self) -> Result<PublicKey, AuthError> {
        let method = self
            .verification_method
            .iter()
            .find(|m| m.id == "#atproto" || m.id == format!("{}#atproto", self.id))
            .ok_or_else(|| {
                AuthError::Resolution(format!("{} has no #atproto verification method", self.id))
            })?;
        let multibase = method.public_key_multibase.as_deref().ok_or_else(|| {
            AuthError::Resolution(format!("{} #atproto key has no publicKeyMultibase", self.id))
        })?;
        PublicKey::from_verification_method(&method.method_type, multibase)
    }
}

/// Verification method in DID Document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyMultibase", skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<String>,
}

/// Service endpoint in DID Document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// Errors from DID resolution
#[derive(Debug, Clone, thiserror::Error)]
pub enum DidResolverError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("Unsupported DID method: {0}")]
    UnsupportedMethod(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Invalid DID document: {0}")]
    InvalidDocument(String),
}
