//! Filesystem backend.
//!
//! Local files are not independently addressable, so blocks point at this
//! service's `/file-bytes` endpoint and carry the file path, byte range and
//! a signature over both as ticket headers.

use super::{
    BGZF_EOF, Backend, ByteRange, DEFAULT_BLOCK_SIZE, FILE_BYTES_PATH, FILE_EXPIRES_HEADER,
    FILE_PATH_HEADER, FILE_SIGNATURE_HEADER, body_ranges, data_end, eof_data_url, fixed_blocks,
    header_byte_range, lookup_regions, needs_data_end,
};
use crate::auth::UrlSigner;
use crate::index::{RegionIndex, TabixIndex};
use crate::types::{DataClass, Format, Region, UrlEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;

pub struct FileBackend {
    path: PathBuf,
    base_url: String,
    format: Format,
    block_size: u64,
    signer: Arc<UrlSigner>,
    index: OnceCell<Option<Arc<dyn RegionIndex>>>,
}

impl FileBackend {
    pub fn new(path: PathBuf, base_url: String, format: Format, signer: Arc<UrlSigner>) -> Self {
        Self {
            path,
            base_url: base_url.trim_end_matches('/').to_string(),
            format,
            block_size: DEFAULT_BLOCK_SIZE,
            signer,
            index: OnceCell::new(),
        }
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    fn index_path(&self) -> Option<PathBuf> {
        let extension = self.format.index_extension()?;
        Some(PathBuf::from(format!("{}.{}", self.path.display(), extension)))
    }

    /// The index next to the file, if there is one.
    async fn index(&self) -> Result<Option<&Arc<dyn RegionIndex>>> {
        let index = self
            .index
            .get_or_try_init(|| async {
                let Some(index_path) = self.index_path() else {
                    return Ok(None);
                };
                if !fs::try_exists(&index_path).await.unwrap_or(false) {
                    tracing::debug!("no index at {:?}", index_path);
                    return Ok(None);
                }
                let bytes = fs::read(&index_path).await?;
                let index = TabixIndex::from_bytes(&bytes).map_err(|e| {
                    tracing::error!("failed to load index {:?}: {}", index_path, e);
                    e
                })?;
                Ok::<_, Error>(Some(Arc::new(index) as Arc<dyn RegionIndex>))
            })
            .await?;
        Ok(index.as_ref())
    }

    fn block(&self, range: ByteRange) -> Result<UrlEntry> {
        let path = self.path.display().to_string();
        let signed = self.signer.sign(&path, &range)?;
        Ok(UrlEntry::new(format!("{}{}", self.base_url, FILE_BYTES_PATH))
            .with_header("Range", range.range_header())
            .with_header(FILE_PATH_HEADER, path)
            .with_header(FILE_EXPIRES_HEADER, signed.expires.to_string())
            .with_header(FILE_SIGNATURE_HEADER, signed.signature))
    }

    async fn data_end(&self) -> Result<u64> {
        let length = self.content_length().await?;
        let marker = BGZF_EOF.len() as u64;
        if length < marker {
            return Ok(length);
        }
        let mut file = fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(length - marker)).await?;
        let mut tail = [0u8; BGZF_EOF.len()];
        file.read_exact(&mut tail).await?;
        Ok(data_end(length, &tail))
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn content_length(&self) -> Result<u64> {
        let metadata = fs::metadata(&self.path).await.map_err(|e| {
            tracing::error!("failed to stat {:?}: {}", self.path, e);
            Error::NotFound(self.path.display().to_string())
        })?;
        Ok(metadata.len())
    }

    async fn has_index(&self) -> bool {
        matches!(self.index().await, Ok(Some(_)))
    }

    async fn header_range(&self) -> Result<UrlEntry> {
        let index = self.index().await?.ok_or_else(|| {
            Error::NotFound(format!("no index for {}", self.path.display()))
        })?;
        let range = header_byte_range(index.as_ref())?;
        Ok(self.block(range)?.with_class(DataClass::Header))
    }

    async fn whole_file_ranges(&self) -> Result<Vec<UrlEntry>> {
        let length = self.content_length().await?;
        fixed_blocks(length, self.block_size)
            .into_iter()
            .map(|range| self.block(range))
            .collect()
    }

    async fn region_ranges(&self, regions: &[Region]) -> Result<Vec<UrlEntry>> {
        let Some(index) = self.index().await? else {
            tracing::debug!(
                "{:?} has no index, serving regions as whole-file blocks",
                self.path
            );
            return self.whole_file_ranges().await;
        };

        let lookups = lookup_regions(index.as_ref(), regions)?;
        let data_end = if needs_data_end(&lookups) {
            Some(self.data_end().await?)
        } else {
            None
        };

        lookups
            .iter()
            .filter_map(|lookup| lookup.next.or(data_end).map(|next| (lookup, next)))
            .flat_map(|(lookup, next)| body_ranges(&lookup.chunks, next))
            .map(|range| Ok(self.block(range)?.with_class(DataClass::Body)))
            .collect()
    }

    async fn trailer_range(&self) -> Result<UrlEntry> {
        Ok(UrlEntry::new(eof_data_url()).with_class(DataClass::Body))
    }

    fn describe(&self) -> String {
        format!("FileBackend path={}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::indexed_vcf;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn temp_file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![1u8; len]).unwrap();
        file
    }

    fn signer() -> Arc<UrlSigner> {
        Arc::new(UrlSigner::new(b"local-secret".to_vec(), Duration::from_secs(60)))
    }

    fn backend(path: PathBuf, base_url: &str) -> FileBackend {
        FileBackend::new(path, base_url.to_string(), Format::Vcf, signer())
    }

    #[tokio::test]
    async fn test_content_length() {
        let file = temp_file(1234);
        let backend = backend(file.path().to_path_buf(), "http://localhost:8080");
        assert_eq!(backend.content_length().await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_whole_file_blocks_point_at_file_bytes() {
        let file = temp_file(250);
        let backend =
            backend(file.path().to_path_buf(), "http://localhost:8080/").with_block_size(100);

        let blocks = backend.whole_file_ranges().await.unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.url == "http://localhost:8080/file-bytes"));
        assert_eq!(blocks[2].header("Range"), Some("bytes=200-249"));
        assert_eq!(
            blocks[0].header(FILE_PATH_HEADER),
            Some(file.path().display().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_blocks_carry_verifiable_signatures() {
        let file = temp_file(250);
        let backend =
            backend(file.path().to_path_buf(), "http://localhost:8080").with_block_size(100);
        let path = file.path().display().to_string();

        for block in backend.whole_file_ranges().await.unwrap() {
            let range = ByteRange::parse_header(block.header("Range").unwrap()).unwrap();
            let expires: u64 = block.header(FILE_EXPIRES_HEADER).unwrap().parse().unwrap();
            let signature = block.header(FILE_SIGNATURE_HEADER).unwrap();
            assert!(signer().verify(&path, &range, expires, signature).is_ok());
        }
    }

    #[tokio::test]
    async fn test_regions_without_index_fall_back_to_whole_file() {
        let file = temp_file(250);
        let backend =
            backend(file.path().to_path_buf(), "http://localhost:8080").with_block_size(100);

        let blocks = backend
            .region_ranges(&[Region::new("chr1", Some(0), Some(10))])
            .await
            .unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(!backend.has_index().await);
        assert!(backend.header_range().await.is_err());
    }

    #[tokio::test]
    async fn test_indexed_file_header_and_region_blocks() {
        let vcf = indexed_vcf(&[("chr1", 1500), ("chr1", 1700), ("chr2", 50)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.vcf.gz");
        std::fs::write(&path, &vcf.data).unwrap();
        std::fs::write(dir.path().join("sample.vcf.gz.tbi"), &vcf.index).unwrap();

        let backend = backend(path, "http://localhost:8080");
        assert!(backend.has_index().await);

        let header = backend.header_range().await.unwrap();
        assert_eq!(header.class, Some(DataClass::Header));
        let expected = format!("bytes=0-{}", vcf.record_blocks[0] - 1);
        assert_eq!(header.header("Range"), Some(expected.as_str()));

        let blocks = backend
            .region_ranges(&[Region::new("chr2", Some(0), None)])
            .await
            .unwrap();
        let expected = format!("bytes={}-{}", vcf.record_blocks[2], vcf.eof_start - 1);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].header("Range"), Some(expected.as_str()));
        assert_eq!(blocks[0].class, Some(DataClass::Body));

        let unknown = backend
            .region_ranges(&[Region::whole("chrX")])
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let backend = backend(
            PathBuf::from("/nonexistent/sample.vcf.gz"),
            "http://localhost:8080",
        );
        assert!(matches!(
            backend.content_length().await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_trailer_is_inline_eof() {
        let backend = backend(PathBuf::from("sample.vcf.gz"), "http://localhost:8080");
        let trailer = backend.trailer_range().await.unwrap();
        assert!(trailer.url.starts_with("data:application/octet-stream;base64,"));
    }
}
