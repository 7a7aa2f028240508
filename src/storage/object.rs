//! Object-store backend.
//!
//! Every block is a presigned, range-scoped URL pointing straight at the
//! object, so clients never stream data through this service.

use super::{
    BGZF_EOF, Backend, ByteRange, DEFAULT_BLOCK_SIZE, ObjectLocation, ObjectStore, body_ranges,
    data_end, eof_data_url, fixed_blocks, header_byte_range, lookup_regions, needs_data_end,
};
use crate::index::{RegionIndex, TabixIndex};
use crate::types::{DataClass, Format, Region, UrlEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    format: Format,
    presign_expiry: Duration,
    eof_object: Option<ObjectLocation>,
    block_size: u64,
    index: OnceCell<Arc<dyn RegionIndex>>,
}

impl ObjectBackend {
    pub fn new(store: Arc<dyn ObjectStore>, location: ObjectLocation, format: Format) -> Self {
        tracing::debug!("creating object backend for {}", location);
        Self {
            store,
            location,
            format,
            presign_expiry: Duration::from_secs(900),
            eof_object: None,
            block_size: DEFAULT_BLOCK_SIZE,
            index: OnceCell::new(),
        }
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    /// Object holding the BGZF EOF block; without one the trailer is inlined.
    pub fn with_eof_object(mut self, eof_object: Option<ObjectLocation>) -> Self {
        self.eof_object = eof_object;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Use an already loaded index instead of fetching `<object>.tbi`.
    pub fn with_index(mut self, index: Arc<dyn RegionIndex>) -> Self {
        self.index = OnceCell::new_with(Some(index));
        self
    }

    async fn index(&self) -> Result<&Arc<dyn RegionIndex>> {
        self.index
            .get_or_try_init(|| async {
                let extension = self.format.index_extension().ok_or_else(|| {
                    Error::UnsupportedFormat(format!(
                        "{:?} has no positional index for region lookups",
                        self.format
                    ))
                })?;
                let index_location = self.location.with_suffix(&format!(".{}", extension));

                let started = Instant::now();
                let bytes = self.store.get(&index_location).await.map_err(|e| {
                    tracing::error!("failed to fetch index {}: {}", index_location, e);
                    e
                })?;
                let index = TabixIndex::from_bytes(&bytes).map_err(|e| {
                    tracing::error!("failed to load index {}: {}", index_location, e);
                    e
                })?;
                tracing::debug!("loading index {} took {:?}", index_location, started.elapsed());

                Ok(Arc::new(index) as Arc<dyn RegionIndex>)
            })
            .await
    }

    async fn presigned_block(&self, range: ByteRange) -> Result<UrlEntry> {
        let url = self
            .store
            .presign(&self.location, Some(range), self.presign_expiry)
            .await?;
        Ok(UrlEntry::new(url).with_header("Range", range.range_header()))
    }

    /// End of the data blocks, stopping before the object's own EOF marker.
    async fn data_end(&self) -> Result<u64> {
        let length = self.content_length().await?;
        let marker = BGZF_EOF.len() as u64;
        if length < marker {
            return Ok(length);
        }
        let tail = self
            .store
            .get_range(&self.location, ByteRange::new(length - marker, length - 1))
            .await?;
        Ok(data_end(length, &tail))
    }
}

#[async_trait]
impl Backend for ObjectBackend {
    async fn content_length(&self) -> Result<u64> {
        self.store.head(&self.location).await.map_err(|e| {
            tracing::error!("content length of {} unavailable: {}", self.location, e);
            e
        })
    }

    async fn has_index(&self) -> bool {
        self.index().await.is_ok()
    }

    async fn header_range(&self) -> Result<UrlEntry> {
        let index = self.index().await?;
        let range = header_byte_range(index.as_ref())?;
        let block = self.presigned_block(range).await.map_err(|e| {
            tracing::error!("failed to presign header of {}: {}", self.location, e);
            e
        })?;
        Ok(block.with_class(DataClass::Header))
    }

    async fn whole_file_ranges(&self) -> Result<Vec<UrlEntry>> {
        let length = self.content_length().await?;
        let mut blocks = Vec::new();
        for range in fixed_blocks(length, self.block_size) {
            let block = self.presigned_block(range).await.map_err(|e| {
                tracing::error!("failed to presign block {:?} of {}: {}", range, self.location, e);
                e
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    async fn region_ranges(&self, regions: &[Region]) -> Result<Vec<UrlEntry>> {
        let index = self.index().await?;
        let lookups = lookup_regions(index.as_ref(), regions)?;

        let data_end = if needs_data_end(&lookups) {
            Some(self.data_end().await?)
        } else {
            None
        };

        let mut blocks = Vec::new();
        for lookup in lookups {
            let Some(next) = lookup.next.or(data_end) else {
                continue;
            };
            for range in body_ranges(&lookup.chunks, next) {
                match self.presigned_block(range).await {
                    Ok(block) => blocks.push(block.with_class(DataClass::Body)),
                    Err(e) => tracing::error!(
                        "skipping chunk {:?} of region {} due to error creating presigned URL: {}",
                        range,
                        lookup.region,
                        e
                    ),
                }
            }
        }
        Ok(blocks)
    }

    async fn trailer_range(&self) -> Result<UrlEntry> {
        let url = match &self.eof_object {
            Some(eof) => self
                .store
                .presign(eof, None, self.presign_expiry)
                .await
                .map_err(|e| {
                    tracing::error!("failed to presign EOF object {}: {}", eof, e);
                    e
                })?,
            None => eof_data_url(),
        };
        Ok(UrlEntry::new(url).with_class(DataClass::Body))
    }

    fn describe(&self) -> String {
        format!("ObjectBackend location={}", self.location)
    }
}
