//! Per-dataset manifests published by visa issuers.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default client timeout for manifest fetches.
pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The regions an access grant covers for one dataset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "patientIds", default)]
    pub patient_ids: Vec<String>,
    #[serde(rename = "htsgetUrl", default)]
    pub url: Option<String>,
    #[serde(rename = "htsgetArtifacts", default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "htsgetRegions", default)]
    pub regions: Vec<ManifestRegion>,
}

/// A granted interval. A missing start means 0; a missing end is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestRegion {
    pub chromosome: String,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
}

impl ManifestRegion {
    pub fn new(chromosome: impl Into<String>, start: Option<u64>, end: Option<u64>) -> Self {
        Self {
            chromosome: chromosome.into(),
            start,
            end,
        }
    }
}

#[async_trait::async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, issuer: &str, dataset_id: &str) -> Result<Manifest>;
}

/// Fetches `{issuer}/api/manifest/{datasetId}` over HTTP.
pub struct HttpManifestSource {
    http_client: reqwest::Client,
}

impl HttpManifestSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub fn manifest_url(issuer: &str, dataset_id: &str) -> String {
        format!("{}/api/manifest/{}", issuer.trim_end_matches('/'), dataset_id)
    }
}

#[async_trait::async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, issuer: &str, dataset_id: &str) -> Result<Manifest> {
        let url = Self::manifest_url(issuer, dataset_id);
        tracing::debug!("fetching manifest from {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("failed to fetch manifest {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "manifest fetch from {} failed with status: {}",
                url,
                response.status()
            )));
        }

        response
            .json::<Manifest>()
            .await
            .map_err(|e| Error::Upstream(format!("failed to parse manifest {}: {}", url, e)))
    }
}
