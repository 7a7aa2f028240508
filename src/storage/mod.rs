//! Storage backend abstraction for genomic data files.
//!
//! A [`Backend`] knows where the bytes of one data source live and turns
//! genomic requests into ticket blocks a client fetches directly.
//!
//! # Implementations
//!
//! - [`ObjectBackend`] - object store; blocks are presigned range URLs
//! - [`FileBackend`] - local filesystem; blocks point back at `/file-bytes`
//!
//! # Example
//!
//! ```no_run
//! use htsget_visa::registry::{DataLocation, DataSource};
//! use htsget_visa::storage::BackendFactory;
//! use htsget_visa::types::Format;
//! use std::path::PathBuf;
//!
//! let factory = BackendFactory::new(None, "http://localhost:8080".to_string());
//! let source = DataSource {
//!     id: "sample1".to_string(),
//!     location: DataLocation::File(PathBuf::from("./data/sample1.vcf.gz")),
//!     controlled: false,
//! };
//! let backend = factory.backend_for(&source, Format::Vcf).unwrap();
//! ```

mod local;
mod object;
mod object_store;
#[cfg(feature = "s3")]
mod s3;

pub use local::FileBackend;
pub use object::ObjectBackend;
pub use object_store::{ObjectLocation, ObjectStore};
#[cfg(test)]
pub(crate) use object_store::testing::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use crate::auth::UrlSigner;
use crate::index::{Chunk, RegionIndex};
use crate::registry::{DataLocation, DataSource};
use crate::types::{Format, Region, UrlEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use std::sync::Arc;
use std::time::Duration;

/// BGZF end-of-file marker block.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Suggested byte size of a single whole-file block.
pub const DEFAULT_BLOCK_SIZE: u64 = 500_000_000;

/// Ticket header naming the local file a `/file-bytes` block reads from.
pub const FILE_PATH_HEADER: &str = "HtsgetFilePath";

/// Ticket header with the Unix time a `/file-bytes` signature expires.
pub const FILE_EXPIRES_HEADER: &str = "HtsgetExpires";

/// Ticket header with the signature over a block's path and range.
pub const FILE_SIGNATURE_HEADER: &str = "HtsgetSignature";

/// Path of the local byte-range endpoint.
pub const FILE_BYTES_PATH: &str = "/file-bytes";

/// Inclusive byte range within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Value for an HTTP `Range` header.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Parse an HTTP `Range` header of the form `bytes=start-end`.
    pub fn parse_header(value: &str) -> Result<Self> {
        let spec = value
            .strip_prefix("bytes=")
            .ok_or_else(|| Error::InvalidRange(format!("unsupported range unit: {}", value)))?;
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| Error::InvalidRange(format!("malformed range: {}", value)))?;
        let start = start
            .trim()
            .parse()
            .map_err(|_| Error::InvalidRange(format!("malformed range start: {}", value)))?;
        let end = end
            .trim()
            .parse()
            .map_err(|_| Error::InvalidRange(format!("malformed range end: {}", value)))?;
        let range = Self::new(start, end);
        if range.is_empty() {
            return Err(Error::InvalidRange(format!("empty range: {}", value)));
        }
        Ok(range)
    }
}

/// Capability set shared by every storage variant.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Size of the data file in bytes.
    async fn content_length(&self) -> Result<u64>;

    /// Whether a positional index is available for header and region lookups.
    async fn has_index(&self) -> bool;

    /// Block covering everything before the first indexed chunk.
    async fn header_range(&self) -> Result<UrlEntry>;

    /// The whole file as contiguous fixed-size blocks.
    async fn whole_file_ranges(&self) -> Result<Vec<UrlEntry>>;

    /// Body blocks covering each region, in request order.
    ///
    /// Blocks that fail individually are logged and skipped; an error means
    /// the index could not be used at all.
    async fn region_ranges(&self, regions: &[Region]) -> Result<Vec<UrlEntry>>;

    /// Dedicated block holding the BGZF end-of-file marker.
    async fn trailer_range(&self) -> Result<UrlEntry>;

    fn describe(&self) -> String;
}

/// Builds the backend for a resolved data source.
pub struct BackendFactory {
    object_store: Option<Arc<dyn ObjectStore>>,
    base_url: String,
    presign_expiry: Duration,
    eof_object: Option<ObjectLocation>,
    block_size: u64,
    signer: Arc<UrlSigner>,
}

impl BackendFactory {
    /// Local blocks are signed with a random secret until
    /// [`BackendFactory::with_signer`] supplies one.
    pub fn new(object_store: Option<Arc<dyn ObjectStore>>, base_url: String) -> Self {
        let presign_expiry = Duration::from_secs(900);
        Self {
            object_store,
            base_url: base_url.trim_end_matches('/').to_string(),
            presign_expiry,
            eof_object: None,
            block_size: DEFAULT_BLOCK_SIZE,
            signer: Arc::new(UrlSigner::random(presign_expiry)),
        }
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    pub fn with_eof_object(mut self, eof_object: Option<ObjectLocation>) -> Self {
        self.eof_object = eof_object;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    /// Verifies the signatures on `/file-bytes` blocks this factory issues.
    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    pub fn backend_for(&self, source: &DataSource, format: Format) -> Result<Box<dyn Backend>> {
        match &source.location {
            DataLocation::Object(location) => {
                let store = self.object_store.clone().ok_or_else(|| {
                    Error::Configuration(format!(
                        "no object store configured for {}",
                        location
                    ))
                })?;
                Ok(Box::new(
                    ObjectBackend::new(store, location.clone(), format)
                        .with_presign_expiry(self.presign_expiry)
                        .with_eof_object(self.eof_object.clone())
                        .with_block_size(self.block_size),
                ))
            }
            DataLocation::File(path) => Ok(Box::new(
                FileBackend::new(
                    path.clone(),
                    self.base_url.clone(),
                    format,
                    self.signer.clone(),
                )
                .with_block_size(self.block_size),
            )),
        }
    }
}

/// Split `[0, length)` into contiguous blocks of at most `block_size` bytes.
pub fn fixed_blocks(length: u64, block_size: u64) -> Vec<ByteRange> {
    let block_size = block_size.max(1);
    let mut blocks = Vec::with_capacity(length.div_ceil(block_size) as usize);
    let mut start = 0;
    while start < length {
        let end = (start + block_size).min(length) - 1;
        blocks.push(ByteRange::new(start, end));
        start = end + 1;
    }
    blocks
}

/// Byte ranges for a region's chunks.
///
/// Each range starts at its chunk's block and stops one byte before the
/// block where the following chunk starts, or before `next` for the last
/// chunk. A chunk whose block is shared with the following chunk is covered
/// by the following range.
pub fn body_ranges(chunks: &[Chunk], next: u64) -> Vec<ByteRange> {
    let mut ranges = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let end = chunks.get(i + 1).map(|c| c.begin.file).unwrap_or(next);
        if end <= chunk.begin.file {
            continue;
        }
        ranges.push(ByteRange::new(chunk.begin.file, end - 1));
    }
    ranges
}

/// Header block: every byte before the earliest chunk of any reference.
pub(crate) fn header_byte_range(index: &dyn RegionIndex) -> Result<ByteRange> {
    let mut first: Option<u64> = None;
    for name in index.reference_names() {
        if let Some(chunk) = index.chunks(&name, None, None)?.first() {
            first = Some(first.map_or(chunk.begin.file, |f| f.min(chunk.begin.file)));
        }
    }

    match first {
        Some(begin) if begin > 0 => {
            tracing::debug!("header was discovered to finish at {}", begin - 1);
            Ok(ByteRange::new(0, begin - 1))
        }
        _ => Err(Error::Upstream(
            "index has no chunks to bound the header".to_string(),
        )),
    }
}

/// Chunk lookup for one requested region.
pub(crate) struct RegionLookup {
    pub region: Region,
    pub chunks: Vec<Chunk>,
    pub next: Option<u64>,
}

pub(crate) fn lookup_regions(
    index: &dyn RegionIndex,
    regions: &[Region],
) -> Result<Vec<RegionLookup>> {
    regions
        .iter()
        .map(|region| {
            let (chunks, next) =
                index.chunks_with_next(&region.reference_name, region.start, region.end)?;
            tracing::debug!(
                "region {} resolved to {} BGZF chunks (next block {:?})",
                region,
                chunks.len(),
                next
            );
            Ok(RegionLookup {
                region: region.clone(),
                chunks,
                next,
            })
        })
        .collect()
}

pub(crate) fn needs_data_end(lookups: &[RegionLookup]) -> bool {
    lookups
        .iter()
        .any(|lookup| lookup.next.is_none() && !lookup.chunks.is_empty())
}

/// Offset just past the last data block, excluding the file's own EOF marker.
pub(crate) fn data_end(length: u64, tail: &[u8]) -> u64 {
    if tail == BGZF_EOF && length >= BGZF_EOF.len() as u64 {
        length - BGZF_EOF.len() as u64
    } else {
        length
    }
}

/// Inline ticket URL carrying the EOF marker.
pub(crate) fn eof_data_url() -> String {
    format!("data:application/octet-stream;base64,{}", STANDARD.encode(BGZF_EOF))
}
