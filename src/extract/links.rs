//! Link extraction
//!
//! Reads configured (tag, attribute) pairs from a parsed document,
//! optionally restricted to subtrees matching CSS selectors, resolves
//! values against the page's final URL and yields absolute http(s) URLs.
//! Invalid or empty values are dropped silently.

use crate::ConfigError;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Link extraction configuration
#[derive(Debug, Clone)]
pub struct LinkExtractionConfig {
    /// Element names to inspect
    pub tags: Vec<String>,
    /// Attributes read from each element
    pub attrs: Vec<String>,
    /// When non-empty, only elements inside a matching ancestor count
    pub restrict_css: Vec<String>,
}

impl Default for LinkExtractionConfig {
    fn default() -> Self {
        Self {
            tags: vec!["a".to_string(), "area".to_string()],
            attrs: vec!["href".to_string()],
            restrict_css: Vec::new(),
        }
    }
}

/// Compiled link extractor
pub struct LinkExtractor {
    selectors: Vec<(Selector, String)>,
    restrict: Vec<Selector>,
}

impl LinkExtractor {
    pub fn new(config: &LinkExtractionConfig) -> Result<Self, ConfigError> {
        let mut selectors = Vec::new();
        for tag in &config.tags {
            for attr in &config.attrs {
                let source = format!("{}[{}]", tag, attr);
                let selector = Selector::parse(&source).map_err(|e| {
                    ConfigError::Validation(format!("bad link selector {}: {:?}", source, e))
                })?;
                selectors.push((selector, attr.clone()));
            }
        }

        let restrict = config
            .restrict_css
            .iter()
            .map(|css| {
                Selector::parse(css).map_err(|e| {
                    ConfigError::Validation(format!("bad restrict-css {}: {:?}", css, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            selectors,
            restrict,
        })
    }

    /// Extracts absolute link URLs from a document, in document order,
    /// de-duplicated
    pub fn extract(&self, document: &Html, base_url: &Url) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        if self.restrict.is_empty() {
            for (selector, attr) in &self.selectors {
                for element in document.select(selector) {
                    collect(element.value().attr(attr), base_url, &mut seen, &mut links);
                }
            }
        } else {
            for scope_selector in &self.restrict {
                for scope in document.select(scope_selector) {
                    for (selector, attr) in &self.selectors {
                        for element in scope.select(selector) {
                            collect(
                                element.value().attr(attr),
                                base_url,
                                &mut seen,
                                &mut links,
                            );
                        }
                    }
                }
            }
        }

        links
    }
}

fn collect(
    raw: Option<&str>,
    base_url: &Url,
    seen: &mut HashSet<String>,
    links: &mut Vec<String>,
) {
    let Some(absolute) = resolve_link(raw, base_url) else {
        return;
    };
    if seen.insert(absolute.clone()) {
        links.push(absolute);
    }
}

/// Resolves an attribute value against the base URL
///
/// Empty values, fragment-only anchors, non-http(s) schemes and values
/// that fail to resolve yield None.
fn resolve_link(raw: Option<&str>, base_url: &Url) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let absolute = base_url.join(raw).ok()?;
    if absolute.scheme() == "http" || absolute.scheme() == "https" {
        Some(absolute.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page").unwrap()
    }

    fn extractor(config: LinkExtractionConfig) -> LinkExtractor {
        LinkExtractor::new(&config).unwrap()
    }

    fn default_extractor() -> LinkExtractor {
        extractor(LinkExtractionConfig::default())
    }

    #[test]
    fn test_absolute_and_relative_links() {
        let html = r#"<html><body>
            <a href="https://other.com/x">abs</a>
            <a href="/root">root-relative</a>
            <a href="sibling">relative</a>
        </body></html>"#;
        let links = default_extractor().extract(&Html::parse_document(html), &base());
        assert_eq!(
            links,
            vec![
                "https://other.com/x",
                "https://example.com/root",
                "https://example.com/dir/sibling",
            ]
        );
    }

    #[test]
    fn test_invalid_values_dropped_silently() {
        let html = r##"<html><body>
            <a href="javascript:void(0)">js</a>
            <a href="mailto:x@example.com">mail</a>
            <a href="#anchor">anchor</a>
            <a href="">empty</a>
            <a href="/ok">ok</a>
        </body></html>"##;
        let links = default_extractor().extract(&Html::parse_document(html), &base());
        assert_eq!(links, vec!["https://example.com/ok"]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let html = r#"<html><body>
            <a href="/a">one</a>
            <a href="/a">two</a>
        </body></html>"#;
        let links = default_extractor().extract(&Html::parse_document(html), &base());
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_area_tags_included() {
        let html = r#"<html><body>
            <map><area href="/mapped"></map>
        </body></html>"#;
        let links = default_extractor().extract(&Html::parse_document(html), &base());
        assert_eq!(links, vec!["https://example.com/mapped"]);
    }

    #[test]
    fn test_custom_tag_attr_pairs() {
        let config = LinkExtractionConfig {
            tags: vec!["img".to_string()],
            attrs: vec!["src".to_string()],
            restrict_css: Vec::new(),
        };
        let html = r#"<html><body>
            <img src="/pic.png">
            <a href="/ignored">link</a>
        </body></html>"#;
        let links = extractor(config).extract(&Html::parse_document(html), &base());
        assert_eq!(links, vec!["https://example.com/pic.png"]);
    }

    #[test]
    fn test_restrict_css_scopes_extraction() {
        let config = LinkExtractionConfig {
            restrict_css: vec!["nav".to_string(), ".content".to_string()],
            ..LinkExtractionConfig::default()
        };
        let html = r#"<html><body>
            <nav><a href="/nav-link">in nav</a></nav>
            <div class="content"><a href="/content-link">in content</a></div>
            <footer><a href="/footer-link">outside</a></footer>
        </body></html>"#;
        let links = extractor(config).extract(&Html::parse_document(html), &base());
        assert_eq!(
            links,
            vec![
                "https://example.com/nav-link",
                "https://example.com/content-link",
            ]
        );
    }

    #[test]
    fn test_bad_selector_rejected_at_build() {
        let config = LinkExtractionConfig {
            restrict_css: vec!["[[[".to_string()],
            ..LinkExtractionConfig::default()
        };
        assert!(LinkExtractor::new(&config).is_err());
    }
}
