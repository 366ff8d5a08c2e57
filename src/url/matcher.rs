/// Checks whether a host is covered by a domain list entry
///
/// An entry covers the host itself and every subdomain:
/// `example.com` covers `example.com`, `blog.example.com`,
/// `api.v2.example.com`, but not `notexample.com` or `example.org`.
///
/// # Examples
///
/// ```
/// use rivulet::url::domain_covers;
///
/// assert!(domain_covers("example.com", "example.com"));
/// assert!(domain_covers("example.com", "blog.example.com"));
/// assert!(!domain_covers("example.com", "notexample.com"));
/// ```
pub fn domain_covers(entry: &str, host: &str) -> bool {
    let entry = entry.trim_start_matches("*.");
    host == entry || host.ends_with(&format!(".{}", entry))
}

/// Checks a host against a list of domain entries
pub fn in_domain_list(list: &[String], host: &str) -> bool {
    list.iter().any(|entry| domain_covers(entry, host))
}
