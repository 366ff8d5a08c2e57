use url::Url;

/// Canonicalizes a URL for deduplication
///
/// The canonical form is used only as a dedup key, never for fetching:
///
/// 1. Lowercase the host
/// 2. Remove the default port (80 for http, 443 for https)
/// 3. Strip the fragment
/// 4. Sort query parameters by key (stable within equal keys)
/// 5. Optionally drop the trailing slash on non-root paths
///
/// # Examples
///
/// ```
/// use url::Url;
/// use rivulet::url::normalize_url;
///
/// let url = Url::parse("http://EXAMPLE.com:80/page?b=2&a=1#frag").unwrap();
/// assert_eq!(normalize_url(&url, false), "http://example.com/page?a=1&b=2");
/// ```
pub fn normalize_url(url: &Url, drop_trailing_slash: bool) -> String {
    let mut normalized = url.clone();

    // The url crate lowercases registered domain names on parse; IP hosts
    // and ports come back as written, so lowercase explicitly.
    if let Some(host) = normalized.host_str() {
        let lower = host.to_lowercase();
        if lower != host {
            // set_host only fails for cannot-be-a-base URLs, which cannot
            // reach this point.
            let _ = normalized.set_host(Some(&lower));
        }
    }

    // Url::port() already returns None when the port matches the scheme
    // default; setting None strips an explicit default port from the text.
    let effective_port = normalized.port();
    let _ = normalized.set_port(effective_port);

    normalized.set_fragment(None);

    if normalized.query().is_some() {
        let mut params: Vec<(String, String)> = normalized
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        // Vec::sort_by is stable, so duplicate keys keep their order.
        params.sort_by(|a, b| a.0.cmp(&b.0));

        if params.is_empty() {
            normalized.set_query(None);
        } else {
            let query = params
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            normalized.set_query(Some(&query));
        }
    }

    if drop_trailing_slash {
        let path = normalized.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path[..path.len() - 1].to_string();
            normalized.set_path(&trimmed);
        }
    }

    normalized.to_string()
}

/// Returns the dedup key for a URL, honoring the normalization toggle
///
/// With normalization disabled the key is the URL text as parsed.
pub fn dedup_key(url: &Url, normalize: bool, drop_trailing_slash: bool) -> String {
    if normalize {
        normalize_url(url, drop_trailing_slash)
    } else {
        url.to_string()
    }
}
