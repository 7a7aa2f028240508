//! Passport token validation.

use crate::Error;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::Deserialize;

/// Signing algorithms a passport broker may use. Symmetric algorithms are
/// never accepted.
pub const PASSPORT_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::ES256, Algorithm::EdDSA];

/// Claims read from a passport token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub iss: Option<String>,
    pub exp: Option<u64>,
    /// Left as raw JSON; a malformed passport yields no visas rather than
    /// a rejected token.
    pub ga4gh_passport_v2: Option<serde_json::Value>,
}

/// Read the token header, refusing algorithms outside [`PASSPORT_ALGORITHMS`].
pub fn passport_header(token: &str) -> Result<Header, Error> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| {
        tracing::debug!("unreadable passport header: {}", e);
        Error::InvalidAuthentication
    })?;

    if !PASSPORT_ALGORITHMS.contains(&header.alg) {
        tracing::debug!("passport signed with {:?} refused", header.alg);
        return Err(Error::InvalidAuthentication);
    }

    Ok(header)
}

/// Check signature, expiry and the optional issuer/audience of a passport.
///
/// `algorithm` must come from [`passport_header`]; jsonwebtoken refuses a
/// validation whose algorithms span key families.
pub fn validate_passport(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
    issuer: Option<&str>,
    audience: Option<&str>,
) -> Result<Claims, Error> {
    let mut validation = Validation::new(algorithm);
    match issuer {
        Some(issuer) => validation.set_issuer(&[issuer]),
        None => validation.iss = None,
    }
    match audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    jsonwebtoken::decode::<Claims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("passport expired"),
                ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                    tracing::debug!("passport not meant for this service: {}", e)
                }
                _ => tracing::debug!("passport rejected: {}", e),
            }
            Error::InvalidAuthentication
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{passport_decoding_key, passport_token};
    use jsonwebtoken::{EncodingKey, encode};

    fn hs256_token() -> String {
        let claims = serde_json::json!({ "sub": "alice", "exp": 4_102_444_800u64 });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"shared-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_header_unreadable() {
        assert!(passport_header("not-a-jwt").is_err());
    }

    #[test]
    fn test_header_refuses_symmetric_algorithms() {
        assert!(passport_header(&hs256_token()).is_err());
    }

    #[test]
    fn test_header_accepts_eddsa() {
        let token = passport_token(&serde_json::json!({ "exp": 4_102_444_800u64 }));
        assert_eq!(passport_header(&token).unwrap().alg, Algorithm::EdDSA);
    }

    #[test]
    fn test_audience_checked_when_configured() {
        let token = passport_token(&serde_json::json!({
            "sub": "alice",
            "aud": ["https://htsget.example.org", "https://other.example.org"],
            "exp": 4_102_444_800u64
        }));
        let key = passport_decoding_key();

        let claims = validate_passport(
            &token,
            &key,
            Algorithm::EdDSA,
            None,
            Some("https://htsget.example.org"),
        )
        .unwrap();
        assert_eq!(claims.sub.as_deref(), Some("alice"));

        let wrong = validate_passport(
            &token,
            &key,
            Algorithm::EdDSA,
            None,
            Some("https://unrelated.example.org"),
        );
        assert!(matches!(wrong, Err(Error::InvalidAuthentication)));
    }
}
