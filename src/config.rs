use crate::storage::{DEFAULT_BLOCK_SIZE, ObjectLocation};
use crate::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "htsget-visa")]
#[command(about = "htsget ticket server with GA4GH passport visa authorization")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "HTSGET_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "HTSGET_PORT", default_value = "8080")]
    pub port: u16,

    /// Base URL for ticket URLs (e.g., https://example.com)
    #[arg(long, env = "HTSGET_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory containing local data files; /file-bytes serves nothing outside it
    #[arg(long, env = "HTSGET_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Data source registry (JSON); defaults to serving <data-dir>/<id>.<ext>
    #[arg(long, env = "HTSGET_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Enable CORS for all origins
    #[arg(long, env = "HTSGET_CORS", default_value_t = true, action = ArgAction::Set)]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Visa issuers whose controlled-access grants are honoured (comma-separated)
    #[arg(long, env = "HTSGET_TRUSTED_ISSUERS", value_delimiter = ',')]
    pub trusted_issuers: Vec<String>,

    /// JWKS URL for validating passport tokens
    #[arg(long, env = "HTSGET_PASSPORT_JWKS_URL")]
    pub passport_jwks_url: Option<String>,

    /// PEM public key for validating passport tokens (alternative to a JWKS URL)
    #[arg(long, env = "HTSGET_PASSPORT_PUBLIC_KEY", conflicts_with = "passport_jwks_url")]
    pub passport_public_key: Option<PathBuf>,

    /// Expected passport issuer
    #[arg(long, env = "HTSGET_PASSPORT_ISSUER")]
    pub passport_issuer: Option<String>,

    /// Expected passport audience
    #[arg(long, env = "HTSGET_PASSPORT_AUDIENCE")]
    pub passport_audience: Option<String>,

    /// Seconds before cached issuer keys are re-fetched
    #[arg(long, env = "HTSGET_JWKS_REFRESH_SECS", default_value = "3600")]
    pub jwks_refresh_secs: u64,

    /// Seconds before cached issuer keys are discarded
    #[arg(long, env = "HTSGET_JWKS_EXPIRY_SECS", default_value = "43200")]
    pub jwks_expiry_secs: u64,

    /// Timeout for manifest fetches
    #[arg(long, env = "HTSGET_MANIFEST_TIMEOUT_SECS", default_value = "15")]
    pub manifest_timeout_secs: u64,

    /// Deadline for resolving one ticket request end to end
    #[arg(long, env = "HTSGET_REQUEST_DEADLINE_SECS", default_value = "60")]
    pub request_deadline_secs: u64,

    /// Lifetime of presigned object URLs
    #[arg(long, env = "HTSGET_PRESIGN_EXPIRY_SECS", default_value = "900")]
    pub presign_expiry_secs: u64,

    /// Secret for signing /file-bytes tickets; a random one is generated when unset
    #[arg(long, env = "HTSGET_FILE_BYTES_SECRET", hide_env_values = true)]
    pub file_bytes_secret: Option<String>,

    /// Object holding the BGZF EOF block (e.g., s3://bucket/eof.bin); inlined when unset
    #[arg(long, env = "HTSGET_EOF_OBJECT")]
    pub eof_object: Option<String>,

    /// Block size for whole-file tickets
    #[arg(long, env = "HTSGET_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    /// S3 region
    #[arg(long, env = "HTSGET_S3_REGION")]
    pub s3_region: Option<String>,

    /// S3 endpoint for S3-compatible stores
    #[arg(long, env = "HTSGET_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Prefix manifest reference names with "chr"
    #[arg(long, env = "HTSGET_CHR_PREFIX", default_value_t = true, action = ArgAction::Set)]
    pub chr_prefix: bool,
}

impl Config {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    pub fn jwks_refresh(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_secs)
    }

    pub fn jwks_expiry(&self) -> Duration {
        Duration::from_secs(self.jwks_expiry_secs)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    pub fn eof_object_location(&self) -> Result<Option<ObjectLocation>> {
        self.eof_object.as_deref().map(ObjectLocation::parse).transpose()
    }

    /// Trusted issuers with blanks dropped and trailing slashes trimmed.
    pub fn trusted_issuer_list(&self) -> Vec<String> {
        self.trusted_issuers
            .iter()
            .map(|issuer| issuer.trim().trim_end_matches('/').to_string())
            .filter(|issuer| !issuer.is_empty())
            .collect()
    }
}
