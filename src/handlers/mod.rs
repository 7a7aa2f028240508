mod file_bytes;
mod service_info;
mod ticket;

pub use file_bytes::get_file_bytes;
pub use service_info::service_info;
pub use ticket::{
    controlled_blocks, get_controlled_variants, get_variants, open_blocks,
    post_controlled_variants, post_variants,
};

use crate::auth::AuthConfig;
use crate::registry::DataSourceRegistry;
use crate::storage::{BackendFactory, FILE_BYTES_PATH};
use crate::visa::AuthorizationPipeline;
use axum::{Router, extract::FromRef, routing::get};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Shared application state, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DataSourceRegistry>,
    pub backends: Arc<BackendFactory>,
    pub pipeline: Arc<AuthorizationPipeline>,
    /// Passport validation; controlled routes reject every request without it.
    pub auth: Option<Arc<AuthConfig>>,
    /// Root directory for `/file-bytes`.
    pub data_dir: PathBuf,
    pub request_deadline: Duration,
}

impl FromRef<AppState> for Option<Arc<AuthConfig>> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Controlled-access tickets
        .route(
            "/variants/{dataset}/{id}",
            get(get_controlled_variants).post(post_controlled_variants),
        )
        // Open-access tickets
        .route("/variants/{id}", get(get_variants).post(post_variants))
        // Local byte ranges (filesystem ticket URLs point here)
        .route(FILE_BYTES_PATH, get(get_file_bytes))
        // Service info
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
