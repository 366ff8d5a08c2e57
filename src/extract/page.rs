//! Page data assembly
//!
//! Converts a fetched response into the immutable record streamed to the
//! sink: title, semantic meta tags (including OpenGraph and Twitter),
//! canonical link, and the visible text body.

use crate::middleware::CrawlResponse;
use crate::ErrorCategory;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashMap;

/// Immutable record of one crawled page
#[derive(Debug, Clone, Serialize)]
pub struct PageData {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status; 0 when no response was received (network/timeout)
    pub status: u16,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Visible text content, whitespace-collapsed
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Semantic meta tags (name/property -> content) plus "canonical"
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    /// Selector-driven extraction output, when rules are configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<HashMap<String, super::ExtractedValue>>,
    /// Absolute URLs discovered on the page
    pub links: Vec<String>,
}

impl PageData {
    /// A record carrying no content, used for failed fetches
    pub fn empty(url: String, status: u16) -> Self {
        Self {
            url,
            status,
            headers: HashMap::new(),
            title: None,
            fetched_at: Utc::now(),
            duration_ms: 0,
            text: String::new(),
            meta: HashMap::new(),
            extracted: None,
            links: Vec::new(),
        }
    }

    /// A record for a failed task, with headers from whatever response was
    /// observed
    pub fn failure(url: String, response: Option<&CrawlResponse>, _category: ErrorCategory) -> Self {
        match response {
            Some(resp) => Self {
                url,
                status: resp.status,
                headers: resp.headers.clone(),
                title: None,
                fetched_at: resp.fetched_at,
                duration_ms: resp.elapsed.as_millis() as u64,
                text: String::new(),
                meta: HashMap::new(),
                extracted: None,
                links: Vec::new(),
            },
            None => Self::empty(url, 0),
        }
    }
}

/// Extracts the document title
pub fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts semantic meta tags: `<meta name=... content=...>` and
/// `<meta property=... content=...>` (OpenGraph/Twitter), plus the
/// canonical link under the "canonical" key
pub fn extract_meta(document: &Html) -> HashMap<String, String> {
    let mut meta = HashMap::new();

    if let Ok(selector) = Selector::parse("meta[content]") {
        for element in document.select(&selector) {
            let value = element.value();
            let Some(content) = value.attr("content") else {
                continue;
            };
            let key = value.attr("name").or_else(|| value.attr("property"));
            if let Some(key) = key {
                let key = key.trim();
                if !key.is_empty() {
                    meta.insert(key.to_lowercase(), content.to_string());
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        if let Some(element) = document.select(&selector).next() {
            if let Some(href) = element.value().attr("href") {
                meta.insert("canonical".to_string(), href.to_string());
            }
        }
    }

    meta
}

/// Extracts the visible text of the document body, collapsing whitespace
pub fn extract_text(document: &Html) -> String {
    let body_text = Selector::parse("body")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|body| body.text().collect::<Vec<_>>().join(" "))
        })
        .unwrap_or_else(|| document.root_element().text().collect::<Vec<_>>().join(" "));

    body_text.split_whitespace().collect::<Vec<_>>().join(" ")
}
