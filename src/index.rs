//! Positional index lookups.
//!
//! A [`RegionIndex`] translates a reference name and a genomic interval into
//! the BGZF chunks that cover it. [`TabixIndex`] implements it over a tabix
//! (`.tbi`) index using noodles.

use crate::{Error, Result};
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi::binning_index::BinningIndex;
use noodles::tabix;
use std::collections::BTreeSet;
use std::fmt;

/// A position inside a BGZF file: the compressed offset of a block and the
/// offset within its decompressed contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualOffset {
    pub file: u64,
    pub block: u16,
}

impl VirtualOffset {
    pub fn new(file: u64, block: u16) -> Self {
        Self { file, block }
    }

    pub fn is_block_aligned(&self) -> bool {
        self.block == 0
    }
}

impl From<noodles::bgzf::VirtualPosition> for VirtualOffset {
    fn from(position: noodles::bgzf::VirtualPosition) -> Self {
        Self::new(position.compressed(), position.uncompressed())
    }
}

/// A run of BGZF data, from the start of one record to the end of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub begin: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(begin: VirtualOffset, end: VirtualOffset) -> Self {
        Self { begin, end }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.begin.file, self.begin.block, self.end.file, self.end.block
        )
    }
}

/// Lookup capability over a positional index.
pub trait RegionIndex: Send + Sync {
    /// Reference sequence names in index order.
    fn reference_names(&self) -> Vec<String>;

    /// Chunks overlapping `[start, end)` on `name`, in file order.
    fn chunks(&self, name: &str, start: Option<u64>, end: Option<u64>) -> Result<Vec<Chunk>>;

    /// Like [`RegionIndex::chunks`], plus the file offset of the first block
    /// that begins after the last chunk, when one is known.
    fn chunks_with_next(
        &self,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<(Vec<Chunk>, Option<u64>)>;
}

/// Tabix index held in memory.
pub struct TabixIndex {
    index: tabix::Index,
    names: Vec<String>,
    block_starts: BTreeSet<u64>,
}

impl TabixIndex {
    /// Parse a BGZF-compressed tabix index.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = tabix::io::Reader::new(bytes);
        let index = reader
            .read_index()
            .map_err(|e| Error::Upstream(format!("failed to read tabix index: {}", e)))?;

        let header = index
            .header()
            .ok_or_else(|| Error::Upstream("tabix index has no header".to_string()))?;

        let names = header
            .reference_sequence_names()
            .iter()
            .map(|name| {
                let name: &[u8] = name.as_ref();
                String::from_utf8_lossy(name).into_owned()
            })
            .collect();

        let mut block_starts = BTreeSet::new();
        for reference_sequence in index.reference_sequences() {
            for bin in reference_sequence.bins().values() {
                for chunk in bin.chunks() {
                    block_starts.insert(chunk.start().compressed());
                }
            }
        }

        Ok(Self {
            index,
            names,
            block_starts,
        })
    }
}

impl RegionIndex for TabixIndex {
    fn reference_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn chunks(&self, name: &str, start: Option<u64>, end: Option<u64>) -> Result<Vec<Chunk>> {
        let Some(reference_sequence_id) = self.names.iter().position(|n| n == name) else {
            tracing::debug!("reference sequence {} not present in index", name);
            return Ok(Vec::new());
        };

        let Some(interval) = query_interval(start, end)? else {
            return Ok(Vec::new());
        };

        let chunks = self
            .index
            .query(reference_sequence_id, interval)
            .map_err(|e| Error::Upstream(format!("index query failed: {}", e)))?;

        Ok(chunks
            .into_iter()
            .map(|chunk| Chunk::new(chunk.start().into(), chunk.end().into()))
            .collect())
    }

    fn chunks_with_next(
        &self,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<(Vec<Chunk>, Option<u64>)> {
        let chunks = self.chunks(name, start, end)?;
        let next = chunks
            .last()
            .and_then(|last| next_block_after(&self.block_starts, last.end));
        Ok((chunks, next))
    }
}

/// File offset of the first block that starts at or after `end` without
/// splitting the block `end` points into.
pub(crate) fn next_block_after(block_starts: &BTreeSet<u64>, end: VirtualOffset) -> Option<u64> {
    if end.is_block_aligned() {
        return Some(end.file);
    }
    block_starts.range(end.file + 1..).next().copied()
}

/// Largest position a tabix binning scheme (min shift 14, depth 5) can address.
const MAX_INDEXED_POSITION: u64 = (1 << 29) - 1;

/// Convert 0-based half-open coordinates to the 1-based closed interval noodles expects.
///
/// An open or out-of-scheme end becomes an open interval. `None` means the
/// interval starts past anything the index can hold.
fn query_interval(start: Option<u64>, end: Option<u64>) -> Result<Option<Interval>> {
    let first = start.unwrap_or(0).saturating_add(1);
    if let Some(end) = end {
        if end < first {
            return Err(Error::InvalidRange(format!(
                "end {} precedes start {}",
                end, first
            )));
        }
    }
    if first > MAX_INDEXED_POSITION {
        return Ok(None);
    }

    let first = Position::try_from(first as usize)
        .map_err(|e| Error::InvalidRange(format!("invalid start position: {}", e)))?;
    match end {
        Some(end) if end < MAX_INDEXED_POSITION => {
            let last = Position::try_from(end as usize)
                .map_err(|e| Error::InvalidRange(format!("invalid end position: {}", e)))?;
            Ok(Some(Interval::from(first..=last)))
        }
        _ => Ok(Some(Interval::from(first..))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_block_after_aligned_end() {
        let starts: BTreeSet<u64> = [0, 100, 200].into_iter().collect();
        assert_eq!(next_block_after(&starts, VirtualOffset::new(150, 0)), Some(150));
    }

    #[test]
    fn test_next_block_after_mid_block_end() {
        let starts: BTreeSet<u64> = [0, 100, 200, 300].into_iter().collect();
        assert_eq!(next_block_after(&starts, VirtualOffset::new(100, 12)), Some(200));
        assert_eq!(next_block_after(&starts, VirtualOffset::new(300, 1)), None);
    }

    #[test]
    fn test_query_interval_bounds() {
        let interval = query_interval(Some(0), Some(10)).unwrap().unwrap();
        assert_eq!(interval.start(), Some(Position::MIN));
        assert_eq!(interval.end(), Position::new(10));

        assert!(query_interval(Some(20), Some(10)).is_err());
        assert!(query_interval(None, Some(0)).is_err());
    }

    #[test]
    fn test_query_interval_open_end_stays_within_scheme() {
        let interval = query_interval(None, None).unwrap().unwrap();
        assert_eq!(interval.start(), Some(Position::MIN));
        assert_eq!(interval.end(), None);

        let interval = query_interval(Some(100), Some(u64::MAX)).unwrap().unwrap();
        assert_eq!(interval.start(), Position::new(101));
        assert_eq!(interval.end(), None);

        assert!(query_interval(Some(MAX_INDEXED_POSITION), None).unwrap().is_none());
    }

    fn sample_index() -> (testing::IndexedVcf, TabixIndex) {
        let vcf = testing::indexed_vcf(&[("chr1", 1500), ("chr1", 1700), ("chr2", 50)]);
        let index = TabixIndex::from_bytes(&vcf.index).unwrap();
        (vcf, index)
    }

    #[test]
    fn test_tabix_reference_names() {
        let (_, index) = sample_index();
        assert_eq!(index.reference_names(), vec!["chr1", "chr2"]);
    }

    #[test]
    fn test_tabix_header_range_ends_before_first_record() {
        let (vcf, index) = sample_index();
        let header = crate::storage::header_byte_range(&index).unwrap();
        assert_eq!(header.start, 0);
        assert_eq!(header.end, vcf.record_blocks[0] - 1);
    }

    #[test]
    fn test_tabix_region_body_ends_before_next_block() {
        let (vcf, index) = sample_index();
        let (chunks, next) = index.chunks_with_next("chr1", Some(1499), Some(1800)).unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].begin, VirtualOffset::new(vcf.record_blocks[0], 0));
        assert_eq!(next, Some(vcf.record_blocks[2]));

        let ranges = crate::storage::body_ranges(&chunks, next.unwrap());
        assert_eq!(ranges.first().unwrap().start, vcf.record_blocks[0]);
        assert_eq!(ranges.last().unwrap().end, vcf.record_blocks[2] - 1);
    }

    #[test]
    fn test_tabix_last_reference_runs_to_eof_block() {
        let (vcf, index) = sample_index();
        let (chunks, next) = index.chunks_with_next("chr2", None, None).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(next, Some(vcf.eof_start));

        let ranges = crate::storage::body_ranges(&chunks, vcf.eof_start);
        assert_eq!(
            ranges,
            vec![crate::storage::ByteRange::new(vcf.record_blocks[2], vcf.eof_start - 1)]
        );
    }

    #[test]
    fn test_tabix_unknown_reference_is_empty() {
        let (_, index) = sample_index();
        let (chunks, next) = index.chunks_with_next("chrX", Some(0), Some(100)).unwrap();
        assert!(chunks.is_empty());
        assert_eq!(next, None);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(TabixIndex::from_bytes(b"definitely not an index").is_err());
    }
}
