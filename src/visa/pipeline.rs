//! Visa evaluation for controlled-access ticket requests.

use super::{KeyResolver, ManifestSource, Visa, resolve_regions};
use crate::types::{Region, RequestedRegions};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::time::{Instant, timeout_at};

/// What a request is permitted to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    HeaderOnly,
    Regions(Vec<Region>),
}

/// Turns a passport's visas into a [`Grant`] for one dataset.
///
/// Visas are evaluated in order. One whose issuer is untrusted, whose key
/// cannot be resolved, whose signature does not verify, or whose manifest
/// cannot be fetched is skipped. The first visa whose manifest grants
/// anything decides the request.
pub struct AuthorizationPipeline {
    trusted_issuers: Vec<String>,
    keys: Arc<dyn KeyResolver>,
    manifests: Arc<dyn ManifestSource>,
    chr_prefix: bool,
}

impl AuthorizationPipeline {
    pub fn new(
        trusted_issuers: Vec<String>,
        keys: Arc<dyn KeyResolver>,
        manifests: Arc<dyn ManifestSource>,
    ) -> Self {
        Self {
            trusted_issuers,
            keys,
            manifests,
            chr_prefix: true,
        }
    }

    /// Whether manifest reference names gain a `chr` prefix.
    pub fn with_chr_prefix(mut self, chr_prefix: bool) -> Self {
        self.chr_prefix = chr_prefix;
        self
    }

    pub fn trusted_issuers(&self) -> &[String] {
        &self.trusted_issuers
    }

    fn is_trusted(&self, issuer: &str) -> bool {
        self.trusted_issuers.iter().any(|trusted| trusted == issuer)
    }

    pub async fn authorize(
        &self,
        visas: &[Visa],
        dataset_id: &str,
        requested: &RequestedRegions,
        deadline: Instant,
    ) -> Result<Grant> {
        for visa in visas {
            if !self.is_trusted(&visa.issuer) {
                tracing::info!("skipped visa from untrusted issuer {}", visa.issuer);
                continue;
            }

            let resolved =
                timeout_at(deadline, self.keys.resolve(&visa.issuer, &visa.key_id)).await;
            let key = match resolved {
                Ok(Ok(key)) => key,
                Ok(Err(e)) => {
                    tracing::error!(
                        "could not resolve key {} of {}: {}",
                        visa.key_id,
                        visa.issuer,
                        e
                    );
                    continue;
                }
                Err(_) => {
                    tracing::warn!("request deadline passed resolving key {}", visa.key_id);
                    break;
                }
            };

            if !visa.verify(&key) {
                tracing::error!("failed signature check for visa from {}", visa.issuer);
                continue;
            }

            if !visa.controlled_datasets().any(|dataset| dataset == dataset_id) {
                tracing::debug!("visa from {} does not cover {}", visa.issuer, dataset_id);
                continue;
            }

            tracing::info!("processing visa from {} for {}", visa.issuer, dataset_id);

            let fetched =
                timeout_at(deadline, self.manifests.fetch(&visa.issuer, dataset_id)).await;
            let manifest = match fetched {
                Ok(Ok(manifest)) => manifest,
                Ok(Err(e)) => {
                    tracing::error!("manifest for {} unavailable: {}", dataset_id, e);
                    continue;
                }
                Err(_) => {
                    tracing::warn!("request deadline passed fetching manifest for {}", dataset_id);
                    break;
                }
            };

            if let Some(grant) = resolve_regions(&manifest, requested, self.chr_prefix)? {
                tracing::debug!("visa from {} grants {:?}", visa.issuer, grant);
                return Ok(grant);
            }
        }

        Err(Error::PermissionDenied(format!(
            "no valid controlled access visa from trusted issuers ({}) \
             was found matching dataset {}",
            self.trusted_issuers.join(", "),
            dataset_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visa::ManifestRegion;
    use crate::visa::manifest::testing::StaticManifests;
    use crate::visa::testing::{ISSUER, StaticKeys, signed_visa, signing_key};
    use ed25519_dalek::SigningKey;
    use std::time::Duration;

    const OTHER_ISSUER: &str = "https://other-dac.example.org";

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn study_a_manifests() -> StaticManifests {
        StaticManifests::default().with_manifest(
            ISSUER,
            "studyA",
            vec![
                ManifestRegion::new("1", Some(1000), Some(2000)),
                ManifestRegion::new("2", Some(500), Some(900)),
            ],
        )
    }

    fn pipeline(keys: StaticKeys, manifests: Arc<StaticManifests>) -> AuthorizationPipeline {
        AuthorizationPipeline::new(vec![ISSUER.to_string()], Arc::new(keys), manifests)
    }

    fn trusted_keys() -> StaticKeys {
        StaticKeys::default().with_key(ISSUER, "k1", signing_key().verifying_key())
    }

    fn region(name: &str, start: u64, end: u64) -> RequestedRegions {
        RequestedRegions::Regions(vec![Region::new(name, Some(start), Some(end))])
    }

    #[tokio::test]
    async fn test_contained_region_is_granted() {
        let visas = vec![signed_visa(ISSUER, "k1", &signing_key(), "c:studyA")];
        let pipeline = pipeline(trusted_keys(), Arc::new(study_a_manifests()));

        let grant = pipeline
            .authorize(&visas, "studyA", &region("chr1", 1500, 1800), deadline())
            .await
            .unwrap();
        assert_eq!(grant, Grant::Regions(vec![Region::new("chr1", Some(1500), Some(1800))]));
    }

    #[tokio::test]
    async fn test_region_outside_manifest_is_denied() {
        let visas = vec![signed_visa(ISSUER, "k1", &signing_key(), "c:studyA")];
        let pipeline = pipeline(trusted_keys(), Arc::new(study_a_manifests()));

        let err = pipeline
            .authorize(&visas, "studyA", &region("chr2", 1, 100), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(ref msg) if msg.contains("chr2:1-100")));
    }

    #[tokio::test]
    async fn test_all_regions_request() {
        let visas = vec![signed_visa(ISSUER, "k1", &signing_key(), "c:studyA")];
        let pipeline = pipeline(trusted_keys(), Arc::new(study_a_manifests()));

        let grant = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::All, deadline())
            .await
            .unwrap();
        assert_eq!(
            grant,
            Grant::Regions(vec![
                Region::new("chr1", Some(1000), Some(2000)),
                Region::new("chr2", Some(500), Some(900)),
            ])
        );
    }

    #[tokio::test]
    async fn test_tampered_sole_visa_is_denied() {
        let mut visa = signed_visa(ISSUER, "k1", &signing_key(), "c:studyA");
        let replacement = if visa.signature.starts_with('A') { "B" } else { "A" };
        visa.signature.replace_range(0..1, replacement);
        let manifests = Arc::new(study_a_manifests());
        let pipeline = pipeline(trusted_keys(), manifests.clone());

        let err = pipeline
            .authorize(&[visa], "studyA", &RequestedRegions::HeaderOnly, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(manifests.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_untrusted_issuer_is_never_resolved() {
        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        let visas = vec![signed_visa(OTHER_ISSUER, "k1", &other_key, "c:studyA")];
        let keys = StaticKeys::default().with_key(OTHER_ISSUER, "k1", other_key.verifying_key());
        let keys = Arc::new(keys);
        let pipeline = AuthorizationPipeline::new(
            vec![ISSUER.to_string()],
            keys.clone(),
            Arc::new(study_a_manifests()),
        );

        let err = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::HeaderOnly, deadline())
            .await
            .unwrap_err();
        assert!(keys.lookups.lock().unwrap().is_empty());

        let Error::PermissionDenied(message) = err else {
            panic!("expected permission denied");
        };
        assert!(message.contains(ISSUER));
        assert!(message.contains("studyA"));
    }

    #[tokio::test]
    async fn test_dataset_must_match_request() {
        let visas = vec![signed_visa(ISSUER, "k1", &signing_key(), "c:studyB")];
        let manifests = Arc::new(study_a_manifests());
        let pipeline = pipeline(trusted_keys(), manifests.clone());

        assert!(pipeline
            .authorize(&visas, "studyA", &RequestedRegions::HeaderOnly, deadline())
            .await
            .is_err());
        assert_eq!(manifests.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_key_moves_to_next_visa() {
        let visas = vec![
            signed_visa(ISSUER, "missing", &signing_key(), "c:studyA"),
            signed_visa(ISSUER, "k1", &signing_key(), "c:studyA"),
        ];
        let pipeline = pipeline(trusted_keys(), Arc::new(study_a_manifests()));

        let grant = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::HeaderOnly, deadline())
            .await
            .unwrap();
        assert_eq!(grant, Grant::HeaderOnly);
    }

    #[tokio::test]
    async fn test_first_successful_visa_wins() {
        let second_issuer = "https://second-dac.example.org";
        let second_key = SigningKey::from_bytes(&[11u8; 32]);
        let visas = vec![
            signed_visa(ISSUER, "k1", &signing_key(), "c:studyA"),
            signed_visa(second_issuer, "k2", &second_key, "c:studyA"),
        ];
        let keys = trusted_keys().with_key(second_issuer, "k2", second_key.verifying_key());
        let manifests = Arc::new(study_a_manifests().with_manifest(
            second_issuer,
            "studyA",
            vec![ManifestRegion::new("3", None, None)],
        ));
        let pipeline = AuthorizationPipeline::new(
            vec![ISSUER.to_string(), second_issuer.to_string()],
            Arc::new(keys),
            manifests.clone(),
        );

        let grant = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::All, deadline())
            .await
            .unwrap();
        assert_eq!(
            grant,
            Grant::Regions(vec![
                Region::new("chr1", Some(1000), Some(2000)),
                Region::new("chr2", Some(500), Some(900)),
            ])
        );
        assert_eq!(manifests.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_grant_falls_through_to_next_visa() {
        let second_issuer = "https://second-dac.example.org";
        let second_key = SigningKey::from_bytes(&[11u8; 32]);
        let visas = vec![
            signed_visa(ISSUER, "k1", &signing_key(), "c:studyA"),
            signed_visa(second_issuer, "k2", &second_key, "c:studyA"),
        ];
        let keys = trusted_keys().with_key(second_issuer, "k2", second_key.verifying_key());
        let manifests = StaticManifests::default()
            .with_manifest(ISSUER, "studyA", vec![])
            .with_manifest(second_issuer, "studyA", vec![ManifestRegion::new("X", None, None)]);
        let pipeline = AuthorizationPipeline::new(
            vec![ISSUER.to_string(), second_issuer.to_string()],
            Arc::new(keys),
            Arc::new(manifests),
        );

        let grant = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::All, deadline())
            .await
            .unwrap();
        assert_eq!(grant, Grant::Regions(vec![Region::new("chrX", None, None)]));
    }

    #[tokio::test]
    async fn test_chr_prefix_can_be_disabled() {
        let visas = vec![signed_visa(ISSUER, "k1", &signing_key(), "c:studyA")];
        let pipeline =
            pipeline(trusted_keys(), Arc::new(study_a_manifests())).with_chr_prefix(false);

        let grant = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::All, deadline())
            .await
            .unwrap();
        assert_eq!(
            grant,
            Grant::Regions(vec![
                Region::new("1", Some(1000), Some(2000)),
                Region::new("2", Some(500), Some(900)),
            ])
        );
    }

    struct UnresponsiveKeys;

    #[async_trait::async_trait]
    impl KeyResolver for UnresponsiveKeys {
        async fn resolve(&self, _issuer: &str, _kid: &str) -> Result<ed25519_dalek::VerifyingKey> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_deadline_bounds_key_resolution() {
        let visas = vec![signed_visa(ISSUER, "k1", &signing_key(), "c:studyA")];
        let pipeline = AuthorizationPipeline::new(
            vec![ISSUER.to_string()],
            Arc::new(UnresponsiveKeys),
            Arc::new(study_a_manifests()),
        );

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = pipeline
            .authorize(&visas, "studyA", &RequestedRegions::HeaderOnly, deadline)
            .await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }
}
