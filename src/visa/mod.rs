//! GA4GH passport visas and the authorization pipeline built on them.
//!
//! A visa is a signed, issuer-attributed scope string. Controlled-access
//! grants appear as `c:<datasetId>` tokens in its value.

mod manifest;
mod pipeline;
mod regions;

pub use manifest::{HttpManifestSource, MANIFEST_TIMEOUT, Manifest, ManifestRegion, ManifestSource};
#[cfg(test)]
pub(crate) use manifest::testing::StaticManifests;
pub use pipeline::{AuthorizationPipeline, Grant};
pub use regions::{normalize_reference_name, reference_names_match, resolve_regions};

use crate::Result;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Scope token prefix marking a controlled-access dataset.
pub const CONTROLLED_ACCESS_PREFIX: &str = "c:";

/// Resolves visa signing keys.
#[async_trait::async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<VerifyingKey>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visa {
    pub issuer: String,
    /// Space-delimited scope tokens; the signed payload.
    pub value: String,
    pub key_id: String,
    /// Base64url (unpadded) Ed25519 signature over `value`.
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct CompactVisa {
    v: String,
    i: String,
    k: String,
    s: String,
}

impl From<CompactVisa> for Visa {
    fn from(visa: CompactVisa) -> Self {
        Self {
            issuer: visa.i,
            value: visa.v,
            key_id: visa.k,
            signature: visa.s,
        }
    }
}

/// Decode the `ga4gh_passport_v2` claim into visas.
///
/// The claim maps a source name to a list of compact visas. Visas come back
/// ordered by source name, then list position. Anything malformed decodes to
/// no visas at all.
pub fn decode_passport(claim: Option<&serde_json::Value>) -> Vec<Visa> {
    let Some(claim) = claim else {
        return Vec::new();
    };

    match BTreeMap::<String, Vec<CompactVisa>>::deserialize(claim) {
        Ok(sources) => sources
            .into_values()
            .flatten()
            .map(Visa::from)
            .collect(),
        Err(e) => {
            tracing::warn!("ignoring malformed passport: {}", e);
            Vec::new()
        }
    }
}

impl Visa {
    /// Check the signature over the visa value.
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(&self.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        key.verify(self.value.as_bytes(), &signature).is_ok()
    }

    /// Dataset ids granted by the controlled-access tokens of this visa.
    pub fn controlled_datasets(&self) -> impl Iterator<Item = &str> {
        self.value
            .split_whitespace()
            .filter_map(|token| token.strip_prefix(CONTROLLED_ACCESS_PREFIX))
    }
}
