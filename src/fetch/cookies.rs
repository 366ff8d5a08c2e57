//! Session cookie jar
//!
//! A minimal per-origin cookie store wired into reqwest through its
//! `CookieStore` trait. Cookies live for the session and can be exported
//! and re-imported across a resume. Writes are serialized behind one lock
//! and applied atomically per Set-Cookie header; reads share the lock.

use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use url::Url;

/// Exported form of the jar, for persistence
pub type CookieSnapshot = HashMap<String, BTreeMap<String, String>>;

#[derive(Debug, Default)]
pub struct SessionCookieJar {
    // origin -> cookie name -> value
    store: RwLock<CookieSnapshot>,
}

impl SessionCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn origin_key(url: &Url) -> Option<String> {
        crate::url::origin_of(url)
    }

    /// Exports all cookies
    pub fn export(&self) -> CookieSnapshot {
        self.store.read().expect("cookie jar poisoned").clone()
    }

    /// Replaces the jar content
    pub fn import(&self, snapshot: CookieSnapshot) {
        *self.store.write().expect("cookie jar poisoned") = snapshot;
    }

    /// Number of cookies stored for an origin
    pub fn cookie_count(&self, url: &Url) -> usize {
        let Some(origin) = Self::origin_key(url) else {
            return 0;
        };
        self.store
            .read()
            .expect("cookie jar poisoned")
            .get(&origin)
            .map_or(0, BTreeMap::len)
    }
}

impl CookieStore for SessionCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let Some(origin) = Self::origin_key(url) else {
            return;
        };
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            // Only the name=value pair matters for a session jar; attributes
            // (Path, Expires, ...) are ignored.
            let Some(pair) = raw.split(';').next() else {
                continue;
            };
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let mut store = self.store.write().expect("cookie jar poisoned");
            store
                .entry(origin.clone())
                .or_default()
                .insert(name.to_string(), value.trim().to_string());
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let origin = Self::origin_key(url)?;
        let store = self.store.read().expect("cookie jar poisoned");
        let cookies = store.get(&origin)?;
        if cookies.is_empty() {
            return None;
        }
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn set(jar: &SessionCookieJar, url: &Url, raw: &str) {
        let header = HeaderValue::from_str(raw).unwrap();
        let headers = [header];
        jar.set_cookies(&mut headers.iter(), url);
    }

    #[test]
    fn test_capture_and_attach() {
        let jar = SessionCookieJar::new();
        let page = url("https://example.com/login");
        set(&jar, &page, "sid=abc123; Path=/; HttpOnly");

        let header = jar.cookies(&page).unwrap();
        assert_eq!(header.to_str().unwrap(), "sid=abc123");
    }

    #[test]
    fn test_cookies_are_per_origin() {
        let jar = SessionCookieJar::new();
        set(&jar, &url("https://a.example/"), "x=1");

        assert!(jar.cookies(&url("https://b.example/")).is_none());
        assert!(jar.cookies(&url("http://a.example/")).is_none());
        assert!(jar.cookies(&url("https://a.example/other")).is_some());
    }

    #[test]
    fn test_overwrite_same_name() {
        let jar = SessionCookieJar::new();
        let page = url("https://example.com/");
        set(&jar, &page, "sid=old");
        set(&jar, &page, "sid=new");

        assert_eq!(jar.cookies(&page).unwrap().to_str().unwrap(), "sid=new");
        assert_eq!(jar.cookie_count(&page), 1);
    }

    #[test]
    fn test_multiple_cookies_joined_sorted() {
        let jar = SessionCookieJar::new();
        let page = url("https://example.com/");
        set(&jar, &page, "b=2");
        set(&jar, &page, "a=1");

        assert_eq!(
            jar.cookies(&page).unwrap().to_str().unwrap(),
            "a=1; b=2"
        );
    }

    #[test]
    fn test_export_import_roundtrip() {
        let jar = SessionCookieJar::new();
        let page = url("https://example.com/");
        set(&jar, &page, "sid=abc");

        let snapshot = jar.export();
        let restored = SessionCookieJar::new();
        restored.import(snapshot);

        assert_eq!(
            restored.cookies(&page).unwrap().to_str().unwrap(),
            "sid=abc"
        );
    }

    #[test]
    fn test_malformed_headers_ignored() {
        let jar = SessionCookieJar::new();
        let page = url("https://example.com/");
        set(&jar, &page, "no-equals-sign");
        set(&jar, &page, "=value-without-name");
        assert!(jar.cookies(&page).is_none());
    }
}
