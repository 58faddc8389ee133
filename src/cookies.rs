//! Cookie jar boundary.
//!
//! The dispatch layer only ever asks a jar two things: the `Cookie` header
//! for a URL before dispatch, and to absorb `Set-Cookie` values after a
//! successful exchange. Matching and storage semantics live behind the
//! [`CookieJar`] trait; the in-memory implementation delegates to reqwest's
//! jar so the third-party handler can share the exact same store.

use std::sync::Arc;

use http::HeaderValue;
use url::Url;

/// An opaque cookie store shared by all requests through one director.
pub trait CookieJar: Send + Sync {
    /// The `Cookie` header value for a URL, if any cookies match.
    fn cookie_header(&self, url: &Url) -> Option<String>;

    /// Absorbs the `Set-Cookie` values of a response.
    fn store_response_cookies(&self, url: &Url, set_cookie: &[String]);
}

/// In-memory cookie jar backed by reqwest's store.
#[derive(Default)]
pub struct MemoryCookieJar {
    inner: reqwest::cookie::Jar,
}

impl MemoryCookieJar {
    /// Creates an empty jar.
    pub fn new() -> Self {
        MemoryCookieJar::default()
    }

    /// Inserts one cookie string (`name=value; Domain=...`) for a URL.
    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        self.inner.add_cookie_str(cookie, url);
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        reqwest::cookie::CookieStore::cookies(&self.inner, url)
            .and_then(|value| value.to_str().map(str::to_string).ok())
    }

    fn store_response_cookies(&self, url: &Url, set_cookie: &[String]) {
        for cookie in set_cookie {
            self.inner.add_cookie_str(cookie, url);
        }
    }
}

/// Adapter exposing any [`CookieJar`] as a reqwest cookie store, so a
/// reqwest client session can be wired to the same jar identity the
/// director uses.
pub struct ReqwestJarAdapter {
    jar: Arc<dyn CookieJar>,
}

impl ReqwestJarAdapter {
    /// Wraps a jar.
    pub fn new(jar: Arc<dyn CookieJar>) -> Self {
        ReqwestJarAdapter { jar }
    }
}

impl reqwest::cookie::CookieStore for ReqwestJarAdapter {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let values: Vec<String> = cookie_headers
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        if !values.is_empty() {
            self.jar.store_response_cookies(url, &values);
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar
            .cookie_header(url)
            .and_then(|header| HeaderValue::from_str(&header).ok())
    }
}

/// Stable identity for a jar, used to key per-jar transport sessions.
pub fn jar_identity(jar: &Arc<dyn CookieJar>) -> usize {
    Arc::as_ptr(jar) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jar_round_trips_cookies() {
        let jar = MemoryCookieJar::new();
        let url = Url::parse("http://example.com/headers").unwrap();
        jar.store_response_cookies(&url, &["session=abc123; Path=/".to_string()]);
        assert_eq!(jar.cookie_header(&url).as_deref(), Some("session=abc123"));
    }

    #[test]
    fn jar_returns_none_for_unrelated_host() {
        let jar = MemoryCookieJar::new();
        let url = Url::parse("http://example.com/").unwrap();
        jar.store_response_cookies(&url, &["a=b".to_string()]);
        let other = Url::parse("http://other.test/").unwrap();
        assert_eq!(jar.cookie_header(&other), None);
    }

    #[test]
    fn distinct_jars_have_distinct_identities() {
        let a: Arc<dyn CookieJar> = Arc::new(MemoryCookieJar::new());
        let b: Arc<dyn CookieJar> = Arc::new(MemoryCookieJar::new());
        assert_ne!(jar_identity(&a), jar_identity(&b));
        assert_eq!(jar_identity(&a), jar_identity(&a.clone()));
    }
}
