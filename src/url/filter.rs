//! URL admission filter
//!
//! Pure function of the candidate URL and the configuration; no I/O.
//! Checks run in a fixed order and short-circuit on the first rejection.

use crate::config::{FileExtensionFilters, FilterConfig};
use crate::url::matcher::in_domain_list;
use regex::Regex;
use url::Url;

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "bz2", "7z", "rar", "xz"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tif", "tiff",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "mpeg"];
const OFFICE_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf",
];
const OTHER_EXTENSIONS: &[&str] = &["exe", "dmg", "iso", "bin", "apk", "msi", "deb", "rpm"];

/// Outcome of a filter evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub follow: bool,
    pub reason: &'static str,
}

impl Verdict {
    fn reject(reason: &'static str) -> Self {
        Self {
            follow: false,
            reason,
        }
    }

    fn accept() -> Self {
        Self {
            follow: true,
            reason: "ok",
        }
    }
}

/// Compiled URL admission filter
#[derive(Debug)]
pub struct UrlFilter {
    allowed_domains: Vec<String>,
    blocked_domains: Vec<String>,
    custom_filters: Vec<Regex>,
    extension_filters: FileExtensionFilters,
    skip_extensions: Vec<String>,
    filter_unsupported_schemes: bool,
    filter_malformed_urls: bool,
    filter_long_urls: bool,
    max_url_length: usize,
}

impl UrlFilter {
    /// Compiles a filter from the configuration
    ///
    /// Custom filter patterns were already validated at config load; a
    /// failure here is still surfaced rather than silently dropped.
    pub fn new(config: &FilterConfig) -> Result<Self, crate::ConfigError> {
        let custom_filters = config
            .custom_url_filters
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| crate::ConfigError::InvalidFilter(format!("{}: {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allowed_domains: config
                .allowed_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            blocked_domains: config
                .blocked_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            custom_filters,
            extension_filters: config.file_extension_filters.clone(),
            skip_extensions: config
                .skip_file_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            filter_unsupported_schemes: config.technical_filters.filter_unsupported_schemes,
            filter_malformed_urls: config.technical_filters.filter_malformed_urls,
            filter_long_urls: config.technical_filters.filter_long_urls,
            max_url_length: config.technical_filters.max_url_length,
        })
    }

    /// Evaluates a raw candidate, returning the parsed URL on admission
    ///
    /// Check order (first rejection wins): parse, scheme, length, domain
    /// allowlist, domain blocklist, file extension, custom regex.
    pub fn admit(&self, raw: &str) -> Result<Url, Verdict> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => {
                if self.filter_malformed_urls {
                    return Err(Verdict::reject("malformed"));
                }
                return Err(Verdict::reject("unparseable"));
            }
        };

        let verdict = self.evaluate(&url);
        if verdict.follow {
            Ok(url)
        } else {
            Err(verdict)
        }
    }

    /// Evaluates an already-parsed URL
    pub fn evaluate(&self, url: &Url) -> Verdict {
        if self.filter_unsupported_schemes && url.scheme() != "http" && url.scheme() != "https" {
            return Verdict::reject("unsupported-scheme");
        }

        if self.filter_long_urls && url.as_str().len() > self.max_url_length {
            return Verdict::reject("url-too-long");
        }

        let host = match url.host_str() {
            Some(host) => host.to_lowercase(),
            None => return Verdict::reject("missing-host"),
        };

        if !self.allowed_domains.is_empty() && !in_domain_list(&self.allowed_domains, &host) {
            return Verdict::reject("domain-not-allowed");
        }

        if in_domain_list(&self.blocked_domains, &host) {
            return Verdict::reject("domain-blocked");
        }

        if let Some(ext) = path_extension(url.path()) {
            if self.extension_rejected(&ext) {
                return Verdict::reject("file-extension");
            }
        }

        for pattern in &self.custom_filters {
            if pattern.is_match(url.as_str()) {
                return Verdict::reject("custom-filter");
            }
        }

        Verdict::accept()
    }

    fn extension_rejected(&self, ext: &str) -> bool {
        let f = &self.extension_filters;
        (f.archives && ARCHIVE_EXTENSIONS.contains(&ext))
            || (f.images && IMAGE_EXTENSIONS.contains(&ext))
            || (f.audio && AUDIO_EXTENSIONS.contains(&ext))
            || (f.video && VIDEO_EXTENSIONS.contains(&ext))
            || (f.office && OFFICE_EXTENSIONS.contains(&ext))
            || (f.other && OTHER_EXTENSIONS.contains(&ext))
            || self.skip_extensions.iter().any(|s| s == ext)
    }
}

/// Extracts the lowercase extension of the final path segment, if any
fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;

    fn filter_for(config: FilterConfig) -> UrlFilter {
        UrlFilter::new(&config).unwrap()
    }

    fn default_filter() -> UrlFilter {
        filter_for(FilterConfig::default())
    }

    #[test]
    fn test_admits_plain_http_url() {
        let filter = default_filter();
        assert!(filter.admit("https://example.com/page").is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        let filter = default_filter();
        let verdict = filter.admit("not a url").unwrap_err();
        assert_eq!(verdict.reason, "malformed");
    }

    #[test]
    fn test_rejects_unsupported_schemes() {
        let filter = default_filter();
        for raw in [
            "javascript:void(0)",
            "mailto:someone@example.com",
            "ftp://example.com/file",
        ] {
            let verdict = filter.admit(raw).unwrap_err();
            assert_eq!(verdict.reason, "unsupported-scheme", "for {}", raw);
        }
    }

    #[test]
    fn test_rejects_long_urls() {
        let mut config = FilterConfig::default();
        config.technical_filters.max_url_length = 40;
        let filter = filter_for(config);
        let long = format!("https://example.com/{}", "a".repeat(100));
        let verdict = filter.admit(&long).unwrap_err();
        assert_eq!(verdict.reason, "url-too-long");
    }

    #[test]
    fn test_allowlist_covers_subdomains() {
        let mut config = FilterConfig::default();
        config.allowed_domains = vec!["example.com".to_string()];
        let filter = filter_for(config);

        assert!(filter.admit("https://example.com/").is_ok());
        assert!(filter.admit("https://blog.example.com/post").is_ok());

        let verdict = filter.admit("https://other.org/").unwrap_err();
        assert_eq!(verdict.reason, "domain-not-allowed");
    }

    #[test]
    fn test_blocklist_wins_over_allowlist() {
        let mut config = FilterConfig::default();
        config.allowed_domains = vec!["example.com".to_string()];
        config.blocked_domains = vec!["ads.example.com".to_string()];
        let filter = filter_for(config);

        assert!(filter.admit("https://example.com/").is_ok());
        let verdict = filter.admit("https://ads.example.com/banner").unwrap_err();
        assert_eq!(verdict.reason, "domain-blocked");
    }

    #[test]
    fn test_extension_categories() {
        let mut config = FilterConfig::default();
        config.file_extension_filters.images = true;
        config.file_extension_filters.archives = true;
        let filter = filter_for(config);

        assert_eq!(
            filter.admit("https://example.com/photo.JPG").unwrap_err().reason,
            "file-extension"
        );
        assert_eq!(
            filter.admit("https://example.com/dump.tar").unwrap_err().reason,
            "file-extension"
        );
        // Unfiltered category passes
        assert!(filter.admit("https://example.com/movie.mp4").is_ok());
        // No extension passes
        assert!(filter.admit("https://example.com/page").is_ok());
    }

    #[test]
    fn test_legacy_skip_extensions() {
        let mut config = FilterConfig::default();
        config.skip_file_extensions = vec![".css".to_string(), "js".to_string()];
        let filter = filter_for(config);

        assert!(filter.admit("https://example.com/style.css").is_err());
        assert!(filter.admit("https://example.com/app.js").is_err());
        assert!(filter.admit("https://example.com/page.html").is_ok());
    }

    #[test]
    fn test_custom_regex_rejects() {
        let mut config = FilterConfig::default();
        config.custom_url_filters = vec![r"/logout".to_string(), r"\?print=1".to_string()];
        let filter = filter_for(config);

        assert_eq!(
            filter.admit("https://example.com/logout").unwrap_err().reason,
            "custom-filter"
        );
        assert_eq!(
            filter
                .admit("https://example.com/page?print=1")
                .unwrap_err()
                .reason,
            "custom-filter"
        );
        assert!(filter.admit("https://example.com/login").is_ok());
    }

    #[test]
    fn test_check_ordering_scheme_before_domain() {
        // A blocked domain with a bad scheme reports the scheme first.
        let mut config = FilterConfig::default();
        config.blocked_domains = vec!["example.com".to_string()];
        let filter = filter_for(config);
        let verdict = filter.admit("ftp://example.com/").unwrap_err();
        assert_eq!(verdict.reason, "unsupported-scheme");
    }

    #[test]
    fn test_path_extension_helper() {
        assert_eq!(path_extension("/a/b/file.pdf"), Some("pdf".to_string()));
        assert_eq!(path_extension("/a/b/file"), None);
        assert_eq!(path_extension("/a/.hidden"), None);
        assert_eq!(path_extension("/"), None);
        assert_eq!(path_extension("/archive.TAR"), Some("tar".to_string()));
    }
}
