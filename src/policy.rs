//! Proxy selection and redirect-method policy.
//!
//! These are pure functions so every handler behaves identically regardless
//! of which transport library sits underneath. The redirect-method table
//! encodes RFC 7231 §6.4 semantics and must not be simplified to
//! "always GET".

use std::collections::BTreeMap;
use std::env;

use http::Method;
use http::StatusCode;
use url::Url;

/// Mapping from URL scheme, `"all"`, or `"no"` to a proxy target.
///
/// Values are kept as raw strings: scheme keys map to proxy URLs, the `no`
/// key maps to a comma-separated bypass pattern list. A `None` value
/// explicitly disables proxying for that key, which lets a per-request map
/// cancel an environment- or configuration-level proxy.
///
/// A `BTreeMap` keeps iteration deterministic so proxy sets can serve as
/// connection-cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMap {
    entries: BTreeMap<String, Option<String>>,
}

impl ProxyMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        ProxyMap::default()
    }

    /// Sets the proxy for a key (a URL scheme, `all`, or `no`).
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(key.into().to_ascii_lowercase(), Some(value.into()));
    }

    /// Explicitly disables proxying for a key.
    pub fn disable(&mut self, key: impl Into<String>) {
        self.entries.insert(key.into().to_ascii_lowercase(), None);
    }

    /// Looks up a key. The outer `Option` distinguishes "absent" from
    /// "explicitly disabled" (`Some(None)`).
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|v| v.as_deref())
    }

    /// Whether no entries exist at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Overlays `other` on top of `self`; entries in `other` win, including
    /// explicit disables.
    pub fn merge(&mut self, other: &ProxyMap) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Deterministic key for connection caches keyed by proxy set.
    pub fn cache_key(&self) -> Vec<(String, Option<String>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Collects proxies from the process environment.
///
/// Reads `http_proxy`, `https_proxy`, `all_proxy`, and `no_proxy` in both
/// lower- and upper-case forms (lower-case wins, matching the common Unix
/// convention).
pub fn env_proxies() -> ProxyMap {
    let mut map = ProxyMap::new();
    for (key, scheme) in [
        ("http_proxy", "http"),
        ("https_proxy", "https"),
        ("all_proxy", "all"),
        ("no_proxy", "no"),
    ] {
        let value = env::var(key)
            .or_else(|_| env::var(key.to_ascii_uppercase()))
            .ok()
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            map.insert(scheme, value);
        }
    }
    map
}

/// Whether `url`'s host matches a no-proxy pattern list.
///
/// Patterns are comma-separated `host` or `host:port` entries; a lone `*`
/// bypasses everything, and entries match whole hosts or domain suffixes
/// (`example.com` covers `sub.example.com`).
pub fn should_bypass_proxy(url: &Url, no_proxy: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let hostport = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.clone(),
    };

    for pattern in no_proxy.split(',') {
        let pattern = pattern.trim().trim_start_matches('.').to_ascii_lowercase();
        if pattern.is_empty() {
            continue;
        }
        if pattern == "*" {
            return true;
        }
        for candidate in [host.as_str(), hostport.as_str()] {
            if candidate == pattern || candidate.ends_with(&format!(".{pattern}")) {
                return true;
            }
        }
    }
    false
}

/// Selects the proxy for a URL from a merged proxy map.
///
/// The `no` entry is consulted first: a bypassed host gets no proxy
/// regardless of other entries. Otherwise the URL's scheme takes priority
/// over the `all` entry. An explicitly disabled entry (`None` value) stops
/// the lookup for its key.
pub fn select_proxy(url: &Url, proxies: &ProxyMap) -> Option<String> {
    if let Some(Some(no_proxy)) = proxies.get("no") {
        if should_bypass_proxy(url, no_proxy) {
            return None;
        }
    }

    for key in [url.scheme(), "all"] {
        if let Some(entry) = proxies.get(key) {
            // An explicit disable stops the fallback to "all".
            return entry.map(str::to_string);
        }
    }
    None
}

/// Computes the method for a redirected request.
///
/// Per RFC 7231 §6.4: a 303 forces GET unless the method was HEAD; 301 and
/// 302 downgrade POST to GET (matching universal browser behavior); 307 and
/// 308 always preserve the original method and payload.
pub fn redirect_method(method: &Method, status: StatusCode) -> Method {
    let mut method = method.clone();
    if status == StatusCode::SEE_OTHER && method != Method::HEAD {
        method = Method::GET;
    }
    if (status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
        && method == Method::POST
    {
        method = Method::GET;
    }
    method
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn scheme_entry_beats_all_entry() {
        let mut proxies = ProxyMap::new();
        proxies.insert("all", "http://proxy-a:8080");
        proxies.insert("http", "http://proxy-b:8080");
        assert_eq!(
            select_proxy(&url("https://example.com"), &proxies).as_deref(),
            Some("http://proxy-a:8080")
        );
        assert_eq!(
            select_proxy(&url("http://example.com"), &proxies).as_deref(),
            Some("http://proxy-b:8080")
        );
    }

    #[test]
    fn no_proxy_pattern_bypasses_all_entry() {
        let mut proxies = ProxyMap::new();
        proxies.insert("all", "http://proxy:8080");
        proxies.insert("no", "example.com,other.test");
        assert_eq!(select_proxy(&url("http://example.com/x"), &proxies), None);
        assert_eq!(select_proxy(&url("http://sub.example.com/x"), &proxies), None);
        assert!(select_proxy(&url("http://unrelated.io/x"), &proxies).is_some());
    }

    #[test]
    fn no_proxy_wildcard_bypasses_everything() {
        let mut proxies = ProxyMap::new();
        proxies.insert("all", "http://proxy:8080");
        proxies.insert("no", "*");
        assert_eq!(select_proxy(&url("http://anything.net"), &proxies), None);
    }

    #[test]
    fn no_proxy_matches_host_with_port() {
        let mut proxies = ProxyMap::new();
        proxies.insert("all", "http://proxy:8080");
        proxies.insert("no", "127.0.0.1:8000");
        assert_eq!(select_proxy(&url("http://127.0.0.1:8000/x"), &proxies), None);
        assert!(select_proxy(&url("http://127.0.0.1:9000/x"), &proxies).is_some());
    }

    #[test]
    fn explicit_disable_stops_fallback() {
        let mut proxies = ProxyMap::new();
        proxies.insert("all", "http://proxy:8080");
        proxies.disable("http");
        assert_eq!(select_proxy(&url("http://example.com"), &proxies), None);
        assert!(select_proxy(&url("https://example.com"), &proxies).is_some());
    }

    #[test]
    fn merge_lets_later_entries_win() {
        let mut base = ProxyMap::new();
        base.insert("http", "http://old:1");
        let mut overlay = ProxyMap::new();
        overlay.insert("http", "http://new:2");
        overlay.disable("https");
        base.merge(&overlay);
        assert_eq!(base.get("http"), Some(Some("http://new:2")));
        assert_eq!(base.get("https"), Some(None));
    }

    #[test]
    fn redirect_method_table() {
        let cases = [
            (Method::POST, 301, Method::GET),
            (Method::POST, 302, Method::GET),
            (Method::POST, 303, Method::GET),
            (Method::POST, 307, Method::POST),
            (Method::POST, 308, Method::POST),
            (Method::HEAD, 303, Method::HEAD),
            (Method::GET, 303, Method::GET),
            (Method::GET, 301, Method::GET),
            (Method::PUT, 302, Method::PUT),
            (Method::PUT, 303, Method::GET),
        ];
        for (method, status, expected) in cases {
            let status = StatusCode::from_u16(status).unwrap();
            assert_eq!(
                redirect_method(&method, status),
                expected,
                "{method} with {status}"
            );
        }
    }
}
