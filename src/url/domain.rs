use url::Url;

/// Extracts the lowercase domain (host) from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use rivulet::url::extract_domain;
///
/// let url = Url::parse("https://Blog.Example.COM/post").unwrap();
/// assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the origin key (`scheme://host[:port]`) used by the rate limiter
/// and the robots registry
pub fn origin_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Some(format!("{}://{}", url.scheme(), host)),
    }
}
