//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! Key sets are cached per URL. An entry older than the refresh interval is
//! re-fetched on next use; if that fetch fails the cached set keeps serving
//! until the hard expiry evicts it.

use super::KeyProvider;
use crate::Error;
use crate::visa::KeyResolver;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::VerifyingKey;
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default refresh interval for cached key sets.
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(3600);

/// Default hard expiry for cached key sets.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(12 * 3600);

#[derive(Clone)]
struct CachedJwks {
    jwks: Arc<Jwks>,
    fetched_at: Instant,
}

/// Concurrent cache of key sets keyed by URL.
pub struct JwksCache {
    cache: Cache<String, CachedJwks>,
    refresh: Duration,
    http_client: reqwest::Client,
}

impl JwksCache {
    pub fn new(refresh: Duration, expiry: Duration) -> Result<Self, Error> {
        let cache = Cache::builder()
            .time_to_live(expiry)
            .max_capacity(64)
            .build();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            cache,
            refresh,
            http_client,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Jwks, Error> {
        tracing::debug!("fetching key set {}", url);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Upstream(format!("key set {} unavailable: {}", url, e)))?;

        response
            .json::<Jwks>()
            .await
            .map_err(|e| Error::Upstream(format!("key set {} unreadable: {}", url, e)))
    }

    /// Key set at `url`, served from cache while fresh.
    pub async fn get(&self, url: &str) -> Result<Arc<Jwks>, Error> {
        let cached = self.cache.get(url).await;

        if let Some(entry) = &cached {
            if entry.fetched_at.elapsed() < self.refresh {
                return Ok(entry.jwks.clone());
            }
        }

        match self.fetch(url).await {
            Ok(jwks) => {
                let entry = CachedJwks {
                    jwks: Arc::new(jwks),
                    fetched_at: Instant::now(),
                };
                self.cache.insert(url.to_string(), entry.clone()).await;
                Ok(entry.jwks)
            }
            Err(e) => match cached {
                Some(entry) => {
                    tracing::warn!("refreshing {} failed, serving stale keys: {}", url, e);
                    Ok(entry.jwks)
                }
                None => Err(e),
            },
        }
    }
}

/// Passport token keys from a single JWKS URL.
pub struct JwksKeyProvider {
    jwks_url: String,
    cache: Arc<JwksCache>,
}

impl JwksKeyProvider {
    pub fn new(jwks_url: String, cache: Arc<JwksCache>) -> Self {
        Self { jwks_url, cache }
    }
}

#[async_trait::async_trait]
impl KeyProvider for JwksKeyProvider {
    async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, Error> {
        let jwks = self.cache.get(&self.jwks_url).await?;

        let Some(key) = jwks.find(kid) else {
            tracing::debug!("passport key {:?} not in {}", kid, self.jwks_url);
            return Err(Error::InvalidAuthentication);
        };
        key.to_decoding_key().map_err(|e| {
            tracing::warn!("{}", e);
            Error::InvalidAuthentication
        })
    }
}

/// Visa signing keys, looked up at `{issuer}/.well-known/jwks`.
pub struct JwksKeyResolver {
    cache: Arc<JwksCache>,
}

impl JwksKeyResolver {
    pub fn new(cache: Arc<JwksCache>) -> Self {
        Self { cache }
    }

    pub fn jwks_url(issuer: &str) -> String {
        format!("{}/.well-known/jwks", issuer.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<VerifyingKey, Error> {
        let jwks = self.cache.get(&Self::jwks_url(issuer)).await?;
        let key = jwks
            .find(Some(kid))
            .ok_or_else(|| Error::Upstream(format!("no key {} published by {}", kid, issuer)))?;
        key.to_ed25519_key()
    }
}

/// A published key set.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Key with the given id, or the first key when no id is given.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None => self.keys.first(),
        }
    }
}

/// One key of a set. Only the public components this service can verify
/// with are read: RSA (`n`, `e`), EC P-256 (`x`, `y`) and OKP (`crv`, `x`).
#[derive(Debug, Default, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub crv: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

impl Jwk {
    fn component<'a>(&self, name: &str, value: &'a Option<String>) -> Result<&'a str, Error> {
        value.as_deref().ok_or_else(|| {
            Error::Upstream(format!("{} key {:?} has no '{}'", self.kty, self.kid, name))
        })
    }

    /// Passport verification key.
    pub fn to_decoding_key(&self) -> Result<DecodingKey, Error> {
        let key = match self.kty.as_str() {
            "RSA" => DecodingKey::from_rsa_components(
                self.component("n", &self.n)?,
                self.component("e", &self.e)?,
            ),
            "EC" => DecodingKey::from_ec_components(
                self.component("x", &self.x)?,
                self.component("y", &self.y)?,
            ),
            "OKP" => DecodingKey::from_ed_components(self.component("x", &self.x)?),
            other => {
                return Err(Error::Upstream(format!(
                    "key {:?} has unsupported type {}",
                    self.kid, other
                )));
            }
        };
        key.map_err(|e| Error::Upstream(format!("unusable {} key {:?}: {}", self.kty, self.kid, e)))
    }

    /// Visa verification key; only Ed25519 keys qualify.
    pub fn to_ed25519_key(&self) -> Result<VerifyingKey, Error> {
        if self.kty != "OKP" || self.crv.as_deref() != Some("Ed25519") {
            return Err(Error::Upstream(format!(
                "key {:?} is not an Ed25519 key",
                self.kid
            )));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(self.component("x", &self.x)?)
            .map_err(|e| Error::Upstream(format!("invalid OKP key encoding: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Upstream("Ed25519 key must be 32 bytes".to_string()))?;

        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::Upstream(format!("invalid Ed25519 key: {}", e)))
    }
}
