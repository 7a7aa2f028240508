use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use htsget_visa::{
    Config,
    auth::{
        AuthConfig, JwksCache, JwksKeyProvider, JwksKeyResolver, KeyProvider, StaticKeyProvider,
        UrlSigner,
    },
    handlers::{AppState, create_router},
    registry::DataSourceRegistry,
    storage::{BackendFactory, ObjectStore},
    visa::{AuthorizationPipeline, HttpManifestSource},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Data sources
    let registry = match &config.registry {
        Some(path) => DataSourceRegistry::from_file(path).await?,
        None => DataSourceRegistry::local(&config.data_dir),
    };

    // Storage backends; local blocks are signed for /file-bytes
    let signer = match &config.file_bytes_secret {
        Some(secret) => UrlSigner::new(secret.as_bytes(), config.presign_expiry()),
        None => {
            tracing::info!("no file-bytes secret configured; local tickets end with this process");
            UrlSigner::random(config.presign_expiry())
        }
    };
    let object_store = object_store(&config).await;
    let backends = BackendFactory::new(object_store, config.effective_base_url())
        .with_presign_expiry(config.presign_expiry())
        .with_eof_object(config.eof_object_location()?)
        .with_block_size(config.block_size)
        .with_signer(signer);

    // Visa authorization; one key cache shared by every request
    let jwks = Arc::new(JwksCache::new(config.jwks_refresh(), config.jwks_expiry())?);
    let trusted_issuers = config.trusted_issuer_list();
    if trusted_issuers.is_empty() {
        tracing::warn!("no trusted visa issuers configured; controlled access will be denied");
    }
    let pipeline = AuthorizationPipeline::new(
        trusted_issuers,
        Arc::new(JwksKeyResolver::new(jwks.clone())),
        Arc::new(HttpManifestSource::new(config.manifest_timeout())?),
    )
    .with_chr_prefix(config.chr_prefix);

    // Passport validation
    let key_provider: Option<Arc<dyn KeyProvider>> =
        match (&config.passport_jwks_url, &config.passport_public_key) {
            (Some(url), _) => Some(Arc::new(JwksKeyProvider::new(url.clone(), jwks.clone()))),
            (None, Some(path)) => {
                let pem = tokio::fs::read(path).await?;
                Some(Arc::new(StaticKeyProvider::from_pem(&pem)?))
            }
            (None, None) => {
                tracing::warn!("no passport key configured; controlled access will be rejected");
                None
            }
        };
    let auth = key_provider.map(|key_provider| {
        Arc::new(AuthConfig {
            key_provider,
            issuer: config.passport_issuer.clone(),
            audience: config.passport_audience.clone(),
        })
    });

    let state = AppState {
        registry: Arc::new(registry),
        backends: Arc::new(backends),
        pipeline: Arc::new(pipeline),
        auth,
        data_dir: config.data_dir.clone(),
        request_deadline: config.request_deadline(),
    };

    let app = create_router(state);

    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting htsget-visa server on {}", addr);
    tracing::info!("Data directory: {:?}", config.data_dir);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "s3")]
async fn object_store(config: &Config) -> Option<Arc<dyn ObjectStore>> {
    let store = htsget_visa::storage::S3ObjectStore::new(
        config.s3_region.clone(),
        config.s3_endpoint.clone(),
    )
    .await;
    Some(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
async fn object_store(_config: &Config) -> Option<Arc<dyn ObjectStore>> {
    tracing::info!("built without object store support; only local data sources are served");
    None
}
