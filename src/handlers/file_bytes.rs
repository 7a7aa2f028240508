use super::AppState;
use crate::storage::{ByteRange, FILE_EXPIRES_HEADER, FILE_PATH_HEADER, FILE_SIGNATURE_HEADER};
use crate::{Error, Result};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Serve a byte range of a local file - filesystem ticket URLs point here.
///
/// The file comes from the `HtsgetFilePath` header and the inclusive range
/// from `Range: bytes=<start>-<end>`. Both must be covered by the unexpired
/// `HtsgetSignature` a ticket issued for them, and files outside the data
/// directory are refused.
pub async fn get_file_bytes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let requested = header_str(&headers, FILE_PATH_HEADER)
        .ok_or_else(|| Error::InvalidInput(format!("missing {} header", FILE_PATH_HEADER)))?;

    let range = header_str(&headers, header::RANGE.as_str())
        .ok_or_else(|| Error::InvalidRange("missing Range header".to_string()))
        .and_then(ByteRange::parse_header)?;

    let expires = header_str(&headers, FILE_EXPIRES_HEADER).and_then(|v| v.parse::<u64>().ok());
    let signature = header_str(&headers, FILE_SIGNATURE_HEADER);
    let (Some(expires), Some(signature)) = (expires, signature) else {
        tracing::debug!("unsigned file-bytes request for {}", requested);
        return Err(Error::InvalidAuthentication);
    };
    state
        .backends
        .signer()
        .verify(requested, &range, expires, signature)?;

    let path = resolve_within(&state.data_dir, Path::new(requested)).await?;
    let mut file = File::open(&path).await.map_err(|e| {
        tracing::debug!("failed to open {:?}: {}", path, e);
        Error::NotFound(requested.to_string())
    })?;
    let length = file.metadata().await?.len();

    if range.start >= length {
        return Err(Error::InvalidRange(format!(
            "range {} starts beyond the end of a {} byte file",
            range.range_header(),
            length
        )));
    }
    let range = ByteRange::new(range.start, range.end.min(length - 1));

    file.seek(SeekFrom::Start(range.start)).await?;
    let stream = ReaderStream::new(file.take(range.len()));

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, range.len())
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", range.start, range.end, length),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(e.to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn resolve_within(root: &Path, requested: &Path) -> Result<PathBuf> {
    let root = fs::canonicalize(root).await.map_err(|e| {
        Error::Configuration(format!("data directory {:?} unavailable: {}", root, e))
    })?;
    let path = fs::canonicalize(requested)
        .await
        .map_err(|_| Error::NotFound(requested.display().to_string()))?;

    if !path.starts_with(&root) {
        tracing::warn!("refusing to serve {:?} outside {:?}", path, root);
        return Err(Error::PermissionDenied(format!(
            "{} is outside the data directory",
            requested.display()
        )));
    }

    Ok(path)
}
