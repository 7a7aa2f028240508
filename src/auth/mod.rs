//! Passport authentication.
//!
//! Controlled-access routes require a Bearer token carrying a GA4GH
//! passport. The token is validated against a JWKS or a static public key;
//! the visas inside it are checked later by [`crate::visa`]. Local data
//! blocks are authorized separately by [`UrlSigner`] signatures.

mod extractor;
pub mod jwks;
mod jwt;
mod url_signing;

pub use extractor::Passport;
pub use jwks::{JwksCache, JwksKeyProvider, JwksKeyResolver};
pub use jwt::Claims;
pub use url_signing::{SignedRange, UrlSigner};

use crate::Error;
use std::sync::Arc;

/// Passport token validation settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// Key provider for JWT validation.
    pub key_provider: Arc<dyn KeyProvider>,
    /// Expected issuer claim.
    pub issuer: Option<String>,
    /// Expected audience claim.
    pub audience: Option<String>,
}

impl AuthConfig {
    /// Validate a passport token and return its claims.
    pub async fn validate(&self, token: &str) -> Result<Claims, Error> {
        let header = jwt::passport_header(token)?;
        let key = self.key_provider.get_key(header.kid.as_deref()).await?;

        jwt::validate_passport(
            token,
            &key,
            header.alg,
            self.issuer.as_deref(),
            self.audience.as_deref(),
        )
    }
}

/// Trait for JWT key providers.
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    /// Get the decoding key, optionally using the key ID from the token header.
    async fn get_key(&self, kid: Option<&str>) -> Result<jsonwebtoken::DecodingKey, Error>;
}

/// Static public key provider (PEM format).
pub struct StaticKeyProvider {
    key: jsonwebtoken::DecodingKey,
}

impl StaticKeyProvider {
    /// Create a new static key provider from a PEM-encoded RSA public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, Error> {
        let key = jsonwebtoken::DecodingKey::from_rsa_pem(pem)
            .map_err(|e| Error::Internal(format!("invalid RSA PEM key: {}", e)))?;
        Ok(Self { key })
    }

    /// Create a new static key provider from a PEM-encoded EC public key.
    pub fn from_ec_pem(pem: &[u8]) -> Result<Self, Error> {
        let key = jsonwebtoken::DecodingKey::from_ec_pem(pem)
            .map_err(|e| Error::Internal(format!("invalid EC PEM key: {}", e)))?;
        Ok(Self { key })
    }

    /// Create a new static key provider from a PEM-encoded Ed25519 public key.
    pub fn from_ed_pem(pem: &[u8]) -> Result<Self, Error> {
        let key = jsonwebtoken::DecodingKey::from_ed_pem(pem)
            .map_err(|e| Error::Internal(format!("invalid Ed25519 PEM key: {}", e)))?;
        Ok(Self { key })
    }

    /// Try each supported PEM key type in turn.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        Self::from_rsa_pem(pem)
            .or_else(|_| Self::from_ec_pem(pem))
            .or_else(|_| Self::from_ed_pem(pem))
            .map_err(|_| Error::Internal("unrecognised PEM public key".to_string()))
    }

    pub fn from_decoding_key(key: jsonwebtoken::DecodingKey) -> Self {
        Self { key }
    }
}

#[async_trait::async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn get_key(&self, _kid: Option<&str>) -> Result<jsonwebtoken::DecodingKey, Error> {
        Ok(self.key.clone())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use ed25519_dalek::SigningKey;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    /// PKCS#8 v1 prefix for an Ed25519 private key.
    const PKCS8_ED25519_PREFIX: [u8; 16] = [
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];

    pub fn passport_signing_key() -> SigningKey {
        SigningKey::from_bytes(&[42u8; 32])
    }

    /// Issue an EdDSA passport token with the given claims.
    pub fn passport_token(claims: &serde_json::Value) -> String {
        let mut der = PKCS8_ED25519_PREFIX.to_vec();
        der.extend_from_slice(passport_signing_key().as_bytes());
        jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            claims,
            &EncodingKey::from_ed_der(&der),
        )
        .unwrap()
    }

    pub fn passport_decoding_key() -> jsonwebtoken::DecodingKey {
        let x = URL_SAFE_NO_PAD.encode(passport_signing_key().verifying_key().as_bytes());
        jsonwebtoken::DecodingKey::from_ed_components(&x).unwrap()
    }
}
