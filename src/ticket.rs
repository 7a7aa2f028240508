//! Ticket assembly.
//!
//! Orders blocks as header, body blocks in backend order, then trailer.

use crate::types::{DataClass, Format, HtsgetResponse, HtsgetResponseBody, UrlEntry};

pub const CURRENT_BLOCK_HEADER: &str = "HtsgetCurrentBlock";
pub const TOTAL_BLOCKS_HEADER: &str = "HtsgetTotalBlocks";

#[derive(Debug, Default)]
pub struct TicketBuilder {
    header: Option<UrlEntry>,
    body: Vec<UrlEntry>,
    trailer: Option<UrlEntry>,
    block_counters: bool,
}

impl TicketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, header: UrlEntry) -> Self {
        self.header = Some(header.with_class(DataClass::Header));
        self
    }

    pub fn body(mut self, blocks: impl IntoIterator<Item = UrlEntry>) -> Self {
        self.body.extend(blocks);
        self
    }

    pub fn trailer(mut self, trailer: UrlEntry) -> Self {
        self.trailer = Some(trailer);
        self
    }

    /// Number every block with current/total counters.
    pub fn with_block_counters(mut self) -> Self {
        self.block_counters = true;
        self
    }

    pub fn build(self) -> Vec<UrlEntry> {
        let mut urls: Vec<UrlEntry> = self
            .header
            .into_iter()
            .chain(self.body)
            .chain(self.trailer)
            .collect();

        if self.block_counters {
            let total = urls.len();
            urls = urls
                .into_iter()
                .enumerate()
                .map(|(i, url)| {
                    url.with_header(CURRENT_BLOCK_HEADER, i.to_string())
                        .with_header(TOTAL_BLOCKS_HEADER, total.to_string())
                })
                .collect();
        }

        urls
    }

    pub fn into_response(self, format: Format) -> HtsgetResponse {
        HtsgetResponse {
            htsget: HtsgetResponseBody {
                format,
                urls: self.build(),
            },
        }
    }
}
