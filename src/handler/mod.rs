//! Transport handlers.
//!
//! Each handler wraps one transport implementation behind the
//! [`RequestHandler`] contract: a synchronous, I/O-free [`prepare`] that
//! negotiates capability (and normalizes the request), and an async
//! [`handle`] that performs the exchange and maps every native failure onto
//! the normalized error taxonomy.
//!
//! [`prepare`]: RequestHandler::prepare
//! [`handle`]: RequestHandler::handle

pub mod hyper;
pub mod reqwest;
pub mod unsupported;
pub mod websocket;

pub use self::hyper::HyperHandler;
pub use self::reqwest::ReqwestHandler;
pub use self::unsupported::UnsupportedHandler;
pub use self::websocket::{WebSocket, WebSocketHandler};

use async_trait::async_trait;
use http::header::{HeaderValue, ACCEPT_ENCODING, COOKIE};
use http::HeaderName;
use url::Url;

use crate::config::{BrokerConfig, PROXY_OVERRIDE_HEADER};
use crate::error::Error;
use crate::policy::{env_proxies, ProxyMap};
use crate::request::Request;
use crate::response::Response;

/// Optional proxy-map capabilities a handler may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// The handler honors the `no` bypass entry.
    NoProxy,
    /// The handler honors the `all` fallback entry.
    AllProxy,
}

/// Request-extension fields a handler may declare it honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// `extensions.cookie_jar`
    CookieJar,
    /// `extensions.allow_redirects`
    AllowRedirects,
}

/// One transport backend.
///
/// Handler instances are long-lived and shared by concurrent dispatches;
/// per-request state lives in the request copy each dispatch receives, and
/// connection caches inside the handler are keyed by the request attributes
/// that affect them.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Stable handler name used for preferences, error attribution, and the
    /// aggregated rejection report.
    fn name(&self) -> &str;

    /// URL schemes this handler can carry.
    fn supported_schemes(&self) -> &[&str];

    /// Proxy URL schemes this handler can tunnel through.
    fn supported_proxy_schemes(&self) -> &[&str];

    /// Optional proxy-map features this handler honors.
    fn supported_features(&self) -> &[Feature];

    /// Extension fields this handler honors.
    fn supported_extensions(&self) -> &[Extension];

    /// Capability negotiation and request normalization. Must not perform
    /// I/O. Fails with [`ErrorKind::Unsupported`] when the request needs
    /// anything this handler does not declare.
    ///
    /// [`ErrorKind::Unsupported`]: crate::error::ErrorKind::Unsupported
    fn prepare(&self, request: &mut Request) -> Result<(), Error>;

    /// Performs the exchange. Every native transport failure must map onto
    /// the normalized taxonomy; anything unclassifiable is reported as
    /// [`ErrorKind::Unexpected`].
    ///
    /// [`ErrorKind::Unexpected`]: crate::error::ErrorKind::Unexpected
    async fn handle(&self, request: Request) -> Result<Response, Error>;

    /// Releases pooled connections owned by this handler.
    fn close(&self) {}
}

/// Shared prepare-time negotiation used by every built-in handler.
///
/// Checks the URL scheme, merges standard headers and proxies, applies the
/// compression flag and default timeout, then validates proxy schemes,
/// features, and requested extensions against the handler's declarations.
pub(crate) fn negotiate(
    handler: &(impl RequestHandler + ?Sized),
    config: &BrokerConfig,
    request: &mut Request,
) -> Result<(), Error> {
    let scheme = request.url().scheme().to_ascii_lowercase();
    if !contains(handler.supported_schemes(), &scheme) {
        return Err(Error::unsupported(format!("{scheme} scheme is not supported")));
    }

    merge_standard_headers(config, request);
    apply_compression_flag(request);
    merge_proxies(config, request)?;
    apply_default_timeout(config, request);

    check_proxies(handler, request)?;
    check_extensions(handler, request)?;
    Ok(())
}

fn contains(haystack: &[&str], needle: &str) -> bool {
    haystack.iter().any(|s| s.eq_ignore_ascii_case(needle))
}

fn merge_standard_headers(config: &BrokerConfig, request: &mut Request) {
    for (name, value) in &config.standard_headers {
        if !request.headers().contains_key(name) {
            request.headers_mut().insert(name.clone(), value.clone());
        }
    }
}

fn apply_compression_flag(request: &mut Request) {
    if !request.compression() {
        request
            .headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

/// Merges proxies in ascending priority: environment, configuration,
/// per-request map, and finally the per-request header override.
fn merge_proxies(config: &BrokerConfig, request: &mut Request) -> Result<(), Error> {
    let mut merged = if config.read_env_proxies {
        env_proxies()
    } else {
        ProxyMap::new()
    };
    if let Some(proxy) = &config.proxy {
        merged.insert("all", proxy.clone());
    }
    if let Some(no_proxy) = &config.no_proxy {
        merged.insert("no", no_proxy.clone());
    }
    merged.merge(&request.proxies);

    let override_name = HeaderName::from_static(PROXY_OVERRIDE_HEADER);
    if let Some(value) = request.headers_mut().remove(&override_name) {
        let value = value
            .to_str()
            .map_err(|_| Error::unsupported("proxy override header is not valid UTF-8"))?
            .to_string();
        merged.insert("all", value);
    }

    request.proxies = merged;
    Ok(())
}

fn apply_default_timeout(config: &BrokerConfig, request: &mut Request) {
    match request.timeout() {
        Some(t) if !t.is_zero() => {}
        _ => request.set_timeout(config.socket_timeout),
    }
}

/// Validates the merged proxy map against the handler's declarations.
///
/// Only entries that can affect this request matter: the URL's own scheme,
/// `all`, and `no`. Entries for unrelated schemes are ignored so one odd
/// mapping cannot disqualify every handler.
fn check_proxies(
    handler: &(impl RequestHandler + ?Sized),
    request: &Request,
) -> Result<(), Error> {
    let scheme = request.url().scheme().to_ascii_lowercase();
    for (key, value) in request.proxies.iter() {
        let Some(proxy_url) = value else {
            continue; // explicitly disabled entries need no capability
        };
        match key {
            "no" => {
                if !handler.supported_features().contains(&Feature::NoProxy) {
                    return Err(Error::unsupported("no-proxy bypass is not supported"));
                }
            }
            "all" => {
                if !handler.supported_features().contains(&Feature::AllProxy) {
                    return Err(Error::unsupported("all-proxy mapping is not supported"));
                }
                check_proxy_scheme(handler, proxy_url)?;
            }
            key if key == scheme => check_proxy_scheme(handler, proxy_url)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_proxy_scheme(
    handler: &(impl RequestHandler + ?Sized),
    proxy_url: &str,
) -> Result<(), Error> {
    let scheme = Url::parse(proxy_url)
        .map(|u| u.scheme().to_ascii_lowercase())
        // Scheme-less proxies like "127.0.0.1:8080" conventionally mean http.
        .unwrap_or_else(|_| "http".to_string());
    if !contains(handler.supported_proxy_schemes(), &scheme) {
        return Err(Error::unsupported(format!(
            "{scheme} proxy scheme is not supported"
        )));
    }
    Ok(())
}

fn check_extensions(
    handler: &(impl RequestHandler + ?Sized),
    request: &Request,
) -> Result<(), Error> {
    let supported = handler.supported_extensions();
    if request.extensions.cookie_jar.is_some() && !supported.contains(&Extension::CookieJar) {
        return Err(Error::unsupported("cookiejar extension is not supported"));
    }
    if request.extensions.allow_redirects.is_some()
        && !supported.contains(&Extension::AllowRedirects)
    {
        return Err(Error::unsupported(
            "allow_redirects extension is not supported",
        ));
    }
    Ok(())
}

/// Merges the jar's cookies into the outgoing headers unless the request
/// already carries an explicit `Cookie` header.
pub(crate) fn apply_cookie_header(jar: &dyn crate::cookies::CookieJar, request: &mut Request) {
    if request.headers().contains_key(COOKIE) {
        return;
    }
    if let Some(header) = jar.cookie_header(request.url()) {
        if let Ok(value) = HeaderValue::from_str(&header) {
            request.headers_mut().insert(COOKIE, value);
        }
    }
}
