//! HTML parsing and extraction
//!
//! One synchronous pass per fetched page: the document is parsed once and
//! used for title/meta/text assembly, link extraction and the optional
//! selector-driven data extraction. The parsed DOM never crosses an await
//! point.

mod data;
mod links;
mod page;

pub use data::{DataExtractor, ExtractedValue, ExtractionRule};
pub use links::{LinkExtractionConfig, LinkExtractor};
pub use page::PageData;

use crate::middleware::CrawlResponse;
use crate::ConfigError;
use scraper::Html;
use std::collections::HashMap;
use url::Url;

/// Compiled extraction pipeline applied to every HTML page
pub struct Extractor {
    links: LinkExtractor,
    data: DataExtractor,
}

impl Extractor {
    pub fn new(
        link_config: &LinkExtractionConfig,
        rules: &HashMap<String, ExtractionRule>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            links: LinkExtractor::new(link_config)?,
            data: DataExtractor::new(rules)?,
        })
    }

    /// Builds the page record for a fetched response
    ///
    /// Non-HTML responses produce a record with headers and status but no
    /// parsed content or links.
    pub fn process(&self, response: &CrawlResponse) -> PageData {
        if !response.is_html() || response.body.is_empty() {
            let mut page = PageData::empty(response.url.to_string(), response.status);
            page.headers = response.headers.clone();
            page.fetched_at = response.fetched_at;
            page.duration_ms = response.elapsed.as_millis() as u64;
            return page;
        }

        let document = Html::parse_document(&response.body);
        let base_url: &Url = &response.url;

        let extracted = if self.data.is_empty() {
            None
        } else {
            Some(self.data.extract(&document))
        };

        PageData {
            url: response.url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            title: page::extract_title(&document),
            fetched_at: response.fetched_at,
            duration_ms: response.elapsed.as_millis() as u64,
            text: page::extract_text(&document),
            meta: page::extract_meta(&document),
            extracted,
            links: self.links.extract(&document, base_url),
        }
    }
}
