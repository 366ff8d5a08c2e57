//! HTTP client construction

use crate::fetch::cookies::SessionCookieJar;
use crate::CrawlError;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

const MAX_REDIRECT_HOPS: usize = 10;

/// Builds the shared HTTP client used by the fetcher and the robots
/// registry
///
/// Redirect handling follows the configured policy: automatic following
/// (capped hops) or manual, where 3xx responses are returned as-is.
/// Per-request deadlines are applied by the fetcher, not here.
pub fn build_http_client(
    user_agent: &str,
    follow_redirects: bool,
    jar: Arc<SessionCookieJar>,
) -> Result<Client, CrawlError> {
    let redirect = if follow_redirects {
        Policy::limited(MAX_REDIRECT_HOPS)
    } else {
        Policy::none()
    };

    Ok(Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(redirect)
        .cookie_provider(jar)
        .gzip(true)
        .brotli(true)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_follow_redirects() {
        let jar = Arc::new(SessionCookieJar::new());
        assert!(build_http_client("TestBot/1.0", true, jar).is_ok());
    }

    #[test]
    fn test_build_manual_redirects() {
        let jar = Arc::new(SessionCookieJar::new());
        assert!(build_http_client("TestBot/1.0", false, jar).is_ok());
    }
}
