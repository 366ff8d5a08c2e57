//! HTTP layer: client construction, session cookie jar, retrying fetcher

mod client;
mod cookies;
mod fetcher;

pub use client::build_http_client;
pub use cookies::{CookieSnapshot, SessionCookieJar};
pub use fetcher::Fetcher;
