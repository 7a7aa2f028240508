//! Axum extractor for passport-bearing requests.

use super::AuthConfig;
use crate::Error;
use crate::visa::{Visa, decode_passport};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;

/// A validated passport and the visas it carries.
///
/// Rejects the request when no valid Bearer token is present. A token whose
/// passport claim is missing or malformed still extracts, with no visas.
///
/// # Example
///
/// ```ignore
/// async fn controlled_handler(passport: Passport) -> impl IntoResponse {
///     format!("{} visas", passport.visas.len())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Passport {
    /// User subject (sub claim).
    pub subject: Option<String>,
    /// Token issuer (iss claim).
    pub issuer: Option<String>,
    pub visas: Vec<Visa>,
}

impl<S> FromRequestParts<S> for Passport
where
    Option<Arc<AuthConfig>>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_config = Option::<Arc<AuthConfig>>::from_ref(state).ok_or_else(|| {
            tracing::error!(
                "controlled access requested but passport validation is not configured"
            );
            Error::InvalidAuthentication
        })?;

        let token = extract_bearer_token(parts)?;
        let claims = auth_config.validate(token).await?;
        let visas = decode_passport(claims.ga4gh_passport_v2.as_ref());

        tracing::debug!(
            "passport for {:?} carries {} visas",
            claims.sub,
            visas.len()
        );

        Ok(Passport {
            subject: claims.sub,
            issuer: claims.iss,
            visas,
        })
    }
}

/// Extract Bearer token from Authorization header.
fn extract_bearer_token(parts: &Parts) -> Result<&str, Error> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(Error::InvalidAuthentication)?;

    let value = header.to_str().map_err(|_| Error::InvalidAuthentication)?;

    value
        .strip_prefix("Bearer ")
        .ok_or(Error::InvalidAuthentication)
}
