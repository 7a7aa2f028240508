use super::AppState;
use crate::{
    Error, Result,
    auth::Passport,
    storage::Backend,
    ticket::TicketBuilder,
    types::{
        Format, HtsgetResponse, Region, RequestedRegions, UrlEntry, VariantsPostBody, VariantsQuery,
    },
    visa::Grant,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use std::future::Future;
use tokio::time::{Instant, timeout_at};

pub async fn get_variants(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VariantsQuery>,
) -> Result<Json<HtsgetResponse>> {
    let format = query.format.unwrap_or_default();
    open_ticket(&state, &id, format, query.requested_regions()?)
        .await
        .map(Json)
}

pub async fn post_variants(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<VariantsPostBody>,
) -> Result<Json<HtsgetResponse>> {
    let format = body.format.unwrap_or_default();
    open_ticket(&state, &id, format, body.requested_regions()?)
        .await
        .map(Json)
}

pub async fn get_controlled_variants(
    State(state): State<AppState>,
    Path((dataset, id)): Path<(String, String)>,
    passport: Passport,
    Query(query): Query<VariantsQuery>,
) -> Result<Json<HtsgetResponse>> {
    let format = query.format.unwrap_or_default();
    controlled_ticket(&state, &dataset, &id, format, query.requested_regions()?, &passport)
        .await
        .map(Json)
}

pub async fn post_controlled_variants(
    State(state): State<AppState>,
    Path((dataset, id)): Path<(String, String)>,
    passport: Passport,
    Json(body): Json<VariantsPostBody>,
) -> Result<Json<HtsgetResponse>> {
    let format = body.format.unwrap_or_default();
    controlled_ticket(&state, &dataset, &id, format, body.requested_regions()?, &passport)
        .await
        .map(Json)
}

async fn open_ticket(
    state: &AppState,
    id: &str,
    format: Format,
    requested: RequestedRegions,
) -> Result<HtsgetResponse> {
    let deadline = Instant::now() + state.request_deadline;

    let source = state.registry.resolve(id, format)?;
    if source.controlled {
        return Err(Error::PermissionDenied(format!(
            "{} is a controlled-access dataset and requires a passport visa",
            id
        )));
    }

    let backend = state.backends.backend_for(&source, format)?;
    tracing::debug!("open ticket for {} from {}", id, backend.describe());

    let builder =
        within_deadline(deadline, open_blocks(backend.as_ref(), format, &requested)).await?;
    Ok(builder.into_response(format))
}

async fn controlled_ticket(
    state: &AppState,
    dataset: &str,
    id: &str,
    format: Format,
    requested: RequestedRegions,
    passport: &Passport,
) -> Result<HtsgetResponse> {
    let deadline = Instant::now() + state.request_deadline;

    let source = state.registry.resolve(&format!("{}/{}", dataset, id), format)?;
    let backend = state.backends.backend_for(&source, format)?;

    let grant = state
        .pipeline
        .authorize(&passport.visas, dataset, &requested, deadline)
        .await?;
    tracing::info!(
        "serving {}/{} to {:?} from {}",
        dataset,
        id,
        passport.subject,
        backend.describe()
    );

    let builder =
        within_deadline(deadline, controlled_blocks(backend.as_ref(), format, &grant)).await?;
    Ok(builder.into_response(format))
}

async fn within_deadline<T>(deadline: Instant, work: impl Future<Output = Result<T>>) -> Result<T> {
    timeout_at(deadline, work).await.map_err(|_| {
        tracing::warn!("ticket resolution exceeded the request deadline");
        Error::Upstream("ticket resolution exceeded the request deadline".to_string())
    })?
}

fn require_region_support(format: Format) -> Result<()> {
    match format.index_extension() {
        Some(_) => Ok(()),
        None => Err(Error::UnsupportedFormat(format!(
            "{:?} does not support region requests",
            format
        ))),
    }
}

async fn region_body(backend: &dyn Backend, regions: &[Region]) -> Result<Vec<UrlEntry>> {
    backend.region_ranges(regions).await.map_err(|e| {
        tracing::error!("chunked blocks for {} failed: {}", backend.describe(), e);
        Error::NotFound(format!("no servable content for {}", backend.describe()))
    })
}

/// Blocks for an open-access request.
///
/// Header only is just the header block. No regions is the whole file in
/// fixed-size blocks with block counters. Regions are header, region body
/// blocks, then the EOF trailer; without an index they fall back to
/// whole-file blocks.
pub async fn open_blocks(
    backend: &dyn Backend,
    format: Format,
    requested: &RequestedRegions,
) -> Result<TicketBuilder> {
    match requested {
        RequestedRegions::HeaderOnly => {
            require_region_support(format)?;
            Ok(TicketBuilder::new().header(backend.header_range().await?))
        }
        RequestedRegions::All => Ok(TicketBuilder::new()
            .body(backend.whole_file_ranges().await?)
            .with_block_counters()),
        RequestedRegions::Regions(regions) => {
            require_region_support(format)?;

            if !backend.has_index().await {
                tracing::debug!("{} has no index, serving whole file", backend.describe());
                return Ok(TicketBuilder::new()
                    .body(region_body(backend, regions).await?)
                    .with_block_counters());
            }

            Ok(TicketBuilder::new()
                .header(backend.header_range().await?)
                .body(region_body(backend, regions).await?)
                .trailer(backend.trailer_range().await?))
        }
    }
}

/// Blocks for a granted controlled-access request: header, the granted
/// region blocks, then the EOF trailer. Never falls back to whole-file
/// blocks.
pub async fn controlled_blocks(
    backend: &dyn Backend,
    format: Format,
    grant: &Grant,
) -> Result<TicketBuilder> {
    require_region_support(format)?;

    if !backend.has_index().await {
        return Err(Error::NotFound(format!(
            "no index available for {}",
            backend.describe()
        )));
    }

    let builder = TicketBuilder::new().header(backend.header_range().await?);
    let builder = match grant {
        Grant::HeaderOnly => builder,
        Grant::Regions(regions) => builder.body(region_body(backend, regions).await?),
    };

    Ok(builder.trailer(backend.trailer_range().await?))
}
