//! Standard outgoing headers.
//!
//! Every handler merges these under the request's own headers at prepare
//! time, so an explicit header on the request always wins. The User-Agent is
//! picked from a pool of recent Chrome versions to blend in with ordinary
//! browser traffic.

use http::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use rand::seq::IndexedRandom;

use super::constants::DEFAULT_USER_AGENT;

const USER_AGENT_TEMPLATE: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36";

const CHROME_VERSIONS: &[&str] = &[
    "128.0.6613.120",
    "129.0.6668.90",
    "130.0.6723.70",
    "130.0.6723.117",
    "131.0.6778.86",
    "131.0.6778.140",
    "132.0.6834.84",
    "132.0.6834.160",
    "133.0.6943.60",
    "133.0.6943.127",
];

/// Returns a browser-like User-Agent string with a randomized Chrome version.
pub fn random_user_agent() -> String {
    match CHROME_VERSIONS.choose(&mut rand::rng()) {
        Some(version) => USER_AGENT_TEMPLATE.replace("{}", version),
        None => DEFAULT_USER_AGENT.to_string(),
    }
}

/// Builds the default standard-header set sent with every request.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&random_user_agent())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers.insert(USER_AGENT, user_agent);
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-us,en;q=0.5"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_is_well_formed() {
        let ua = random_user_agent();
        assert!(ua.starts_with("Mozilla/5.0"));
        assert!(ua.contains("Chrome/"));
        assert!(!ua.contains("{}"));
    }

    #[test]
    fn default_headers_contain_user_agent() {
        let headers = default_headers();
        assert!(headers.contains_key(USER_AGENT));
        assert!(headers.contains_key(ACCEPT));
    }
}
