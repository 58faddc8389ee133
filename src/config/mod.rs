//! Broker configuration.
//!
//! This module provides:
//! - Configuration constants (timeouts, bounds, etc.)
//! - The standard outgoing header set
//! - The [`BrokerConfig`] shared by the director and every handler

mod constants;
mod headers;

pub use constants::*;
pub use headers::{default_headers, random_user_agent};

use std::time::Duration;

use http::HeaderMap;

use crate::tls::TlsOptions;

/// Process-wide configuration shared by a director and its handlers.
///
/// A single `Arc<BrokerConfig>` is handed to every handler at construction;
/// per-request values (timeout, proxies, compression) override these
/// defaults during capability negotiation.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Proxy URL applied to every request unless overridden per request.
    /// Becomes the `all` entry of the effective proxy map.
    pub proxy: Option<String>,
    /// Comma-separated no-proxy patterns merged into the effective proxy map
    /// under the `no` key.
    pub no_proxy: Option<String>,
    /// Whether server certificates are validated. Disabling this is the
    /// escape hatch for self-signed or broken chains.
    pub verify_certificates: bool,
    /// Widens the accepted TLS protocol range for servers that cannot
    /// complete a modern handshake.
    pub legacy_server_connect: bool,
    /// `file://` URLs are refused unless this is set.
    pub enable_file_urls: bool,
    /// Default socket timeout for requests that carry none.
    pub socket_timeout: Duration,
    /// Headers merged under every request's own headers.
    pub standard_headers: HeaderMap,
    /// Whether `http_proxy`/`https_proxy`/`all_proxy`/`no_proxy` environment
    /// variables seed the effective proxy map.
    pub read_env_proxies: bool,
    /// Base handler-name preference list; per-request preferences are
    /// appended after these.
    pub preferred_handlers: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            proxy: None,
            no_proxy: None,
            verify_certificates: true,
            legacy_server_connect: false,
            enable_file_urls: false,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            standard_headers: default_headers(),
            read_env_proxies: true,
            preferred_handlers: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// TLS options derived from the certificate-related fields.
    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            verify_certificates: self.verify_certificates,
            legacy_server_connect: self.legacy_server_connect,
        }
    }
}
