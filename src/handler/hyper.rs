//! Connection-level HTTP handler built on hyper.
//!
//! This is the low-level backend: it establishes its own sockets (direct,
//! via HTTP proxies with CONNECT tunnelling, or through a configured SOCKS
//! connector), drives hyper's HTTP/1 connection by hand, follows redirects
//! itself using the shared redirect-method policy, and decodes compressed
//! bodies through the deferred decoder. It also serves `data:` URLs
//! in-process and `file://` URLs when explicitly enabled.
//!
//! One connection opener exists per distinct (proxy set, redirects-allowed)
//! combination, created lazily and cached for the handler's lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{
    HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
    HOST, LOCATION,
};
use http::{Method, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::{BrokerConfig, DEFAULT_DATA_URL_MIME, MAX_REDIRECT_HOPS};
use crate::error::{Error, ErrorKind};
use crate::handler::{negotiate, Extension, Feature, RequestHandler};
use crate::policy::{redirect_method, select_proxy, ProxyMap};
use crate::request::{Request, RequestBody};
use crate::response::{content_length, Body, BodyStream, ContentEncoding, Response};
use crate::socks::{is_socks_scheme, SocksConnector, SocksProxyOptions, SocksStream};

const SCHEMES: &[&str] = &["http", "https", "data", "file"];
const PROXY_SCHEMES_PLAIN: &[&str] = &["http"];
const PROXY_SCHEMES_WITH_SOCKS: &[&str] = &["http", "socks4", "socks4a", "socks5", "socks5h"];
const FEATURES: &[Feature] = &[Feature::NoProxy, Feature::AllProxy];
const EXTENSIONS: &[Extension] = &[Extension::CookieJar, Extension::AllowRedirects];

/// Outgoing request body handed to hyper. Streamed payloads are Send but
/// not Sync, so the unsync box is the common shape.
type OutBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Cache key for connection openers.
type OpenerKey = (Vec<(String, Option<String>)>, bool);

/// The hyper-based request handler.
pub struct HyperHandler {
    config: Arc<BrokerConfig>,
    tls: Arc<rustls::ClientConfig>,
    socks: Option<Arc<dyn SocksConnector>>,
    openers: Mutex<HashMap<OpenerKey, Arc<Opener>>>,
}

impl HyperHandler {
    /// Creates a handler sharing the broker's configuration and TLS setup.
    pub fn new(config: Arc<BrokerConfig>, tls: Arc<rustls::ClientConfig>) -> Self {
        HyperHandler {
            config,
            tls,
            socks: None,
            openers: Mutex::new(HashMap::new()),
        }
    }

    /// Installs a SOCKS connector; the socks proxy schemes are only
    /// declared once one is present.
    pub fn with_socks_connector(mut self, connector: Arc<dyn SocksConnector>) -> Self {
        self.socks = Some(connector);
        self
    }

    /// The opener for a request's (proxy set, redirects-allowed) tuple,
    /// created on first use.
    fn opener_for(&self, request: &Request, allow_redirects: bool) -> Arc<Opener> {
        let key = (request.proxies.cache_key(), allow_redirects);
        let mut openers = match self.openers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        openers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Opener {
                    proxies: request.proxies.clone(),
                    allow_redirects,
                    tls: self.tls.clone(),
                    socks: self.socks.clone(),
                })
            })
            .clone()
    }
}

#[async_trait]
impl RequestHandler for HyperHandler {
    fn name(&self) -> &str {
        "hyper"
    }

    fn supported_schemes(&self) -> &[&str] {
        SCHEMES
    }

    fn supported_proxy_schemes(&self) -> &[&str] {
        if self.socks.is_some() {
            PROXY_SCHEMES_WITH_SOCKS
        } else {
            PROXY_SCHEMES_PLAIN
        }
    }

    fn supported_features(&self) -> &[Feature] {
        FEATURES
    }

    fn supported_extensions(&self) -> &[Extension] {
        EXTENSIONS
    }

    fn prepare(&self, request: &mut Request) -> Result<(), Error> {
        negotiate(self, &self.config, request)?;
        if request.url().scheme() == "file" && !self.config.enable_file_urls {
            return Err(Error::unsupported(
                "file:// URLs are disabled by default for security reasons",
            ));
        }
        Ok(())
    }

    async fn handle(&self, request: Request) -> Result<Response, Error> {
        let allow_redirects = request.extensions.allow_redirects.unwrap_or(true);
        let opener = self.opener_for(&request, allow_redirects);
        let timeout = request
            .timeout()
            .unwrap_or(self.config.socket_timeout);
        match tokio::time::timeout(timeout, opener.open(&request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::new(ErrorKind::Transport {
                msg: format!("request timed out after {:.1}s", timeout.as_secs_f64()),
                source: None,
            })),
        }
    }

    fn close(&self) {
        if let Ok(mut openers) = self.openers.lock() {
            openers.clear();
        }
    }
}

/// One connection opener: fixed proxy set and redirect policy.
struct Opener {
    proxies: ProxyMap,
    allow_redirects: bool,
    tls: Arc<rustls::ClientConfig>,
    socks: Option<Arc<dyn SocksConnector>>,
}

impl Opener {
    /// Performs the exchange, following redirects when allowed.
    async fn open(&self, request: &Request) -> Result<Response, Error> {
        let mut url = request.url().clone();
        let mut method = request.method();
        let mut headers = request.headers().clone();
        let mut body = request.body().cloned();
        let mut hops = 0usize;

        loop {
            let response = self.single(&url, &method, &headers, body.as_ref()).await?;
            let status = response.status();

            let location = redirectable_location(&response);
            if !self.allow_redirects || location.is_none() {
                return finalize(response, self.allow_redirects);
            }
            let location = location.unwrap_or_default();

            hops += 1;
            if hops > MAX_REDIRECT_HOPS {
                log::warn!("redirect limit of {MAX_REDIRECT_HOPS} hops reached at {url}");
                return Err(Error::new(ErrorKind::Http {
                    response: Box::new(response),
                    redirect_loop: true,
                }));
            }

            let next_url = url
                .join(&location)
                .map_err(|e| {
                    Error::new(ErrorKind::Request {
                        msg: format!("invalid redirect location {location:?}"),
                        source: Some(Box::new(e)),
                    })
                })?;

            let next_method = redirect_method(&method, status);
            if next_method != method {
                // The payload only travels when the method survives.
                body = None;
                headers.remove(CONTENT_LENGTH);
                headers.remove(CONTENT_TYPE);
            }
            log::debug!("redirect {status} {url} -> {next_url} ({next_method})");
            method = next_method;
            url = next_url;
        }
    }

    /// One request/response exchange with no redirect handling.
    async fn single(
        &self,
        url: &Url,
        method: &Method,
        headers: &HeaderMap,
        body: Option<&RequestBody>,
    ) -> Result<Response, Error> {
        match url.scheme() {
            "http" | "https" => self.http_exchange(url, method, headers, body).await,
            "data" => data_response(url),
            "file" => file_response(url).await,
            other => Err(Error::unsupported(format!(
                "{other} scheme is not supported"
            ))),
        }
    }

    async fn http_exchange(
        &self,
        url: &Url,
        method: &Method,
        headers: &HeaderMap,
        body: Option<&RequestBody>,
    ) -> Result<Response, Error> {
        let host = url
            .host_str()
            .ok_or_else(|| {
                Error::new(ErrorKind::Request {
                    msg: format!("URL {url} has no host"),
                    source: None,
                })
            })?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let proxy = select_proxy(url, &self.proxies);
        let (stream, absolute_form) = self.connect(url, &host, port, proxy.as_deref()).await?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| transport("HTTP handshake failed", e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                log::debug!("connection task finished with error: {e}");
            }
        });

        let uri: Uri = if absolute_form {
            url.as_str().parse()
        } else {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            target.parse()
        }
        .map_err(|e: http::uri::InvalidUri| {
            Error::new(ErrorKind::Request {
                msg: format!("URL {url} does not form a valid request target"),
                source: Some(Box::new(e)),
            })
        })?;

        let mut out_headers = headers.clone();
        out_headers.remove(HOST);
        let host_value = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        if !out_headers.contains_key(ACCEPT_ENCODING) {
            out_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        }

        let (out_body, length) = build_out_body(body)?;
        if let Some(length) = length {
            if !out_headers.contains_key(CONTENT_LENGTH) && requires_length(method, length) {
                out_headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
        }

        let mut builder = http::Request::builder().method(method.clone()).uri(uri);
        if let Some(header_map) = builder.headers_mut() {
            header_map.insert(
                HOST,
                HeaderValue::from_str(&host_value).map_err(|_| {
                    Error::new(ErrorKind::Request {
                        msg: format!("host {host_value:?} is not a valid header value"),
                        source: None,
                    })
                })?,
            );
            for (name, value) in &out_headers {
                header_map.insert(name.clone(), value.clone());
            }
        }
        let hyper_request = builder.body(out_body).map_err(|e| {
            Error::new(ErrorKind::Request {
                msg: "failed to assemble outgoing request".to_string(),
                source: Some(Box::new(e)),
            })
        })?;

        let hyper_response = sender
            .send_request(hyper_request)
            .await
            .map_err(|e| transport("request failed", e))?;

        Ok(adapt_response(url.clone(), method, hyper_response))
    }

    /// Establishes the byte stream for an exchange. Returns the stream and
    /// whether the request target must use absolute form (plain-http
    /// proxying).
    async fn connect(
        &self,
        url: &Url,
        host: &str,
        port: u16,
        proxy: Option<&str>,
    ) -> Result<(Box<dyn SocksStream>, bool), Error> {
        let https = url.scheme() == "https";

        let Some(proxy) = proxy else {
            let tcp = tcp_connect(host, port).await?;
            return if https {
                Ok((Box::new(self.tls_wrap(tcp, host).await?), false))
            } else {
                Ok((Box::new(tcp), false))
            };
        };

        let proxy_url = parse_proxy_url(proxy)?;
        if is_socks_scheme(proxy_url.scheme()) {
            let connector = self.socks.as_ref().ok_or_else(|| {
                Error::unsupported("no SOCKS connector is configured")
            })?;
            let options = SocksProxyOptions::parse(proxy_url.as_str())?;
            let stream = connector.connect(&options, host, port).await?;
            return if https {
                Ok((Box::new(self.tls_wrap(stream, host).await?), false))
            } else {
                Ok((stream, false))
            };
        }

        let proxy_host = proxy_url.host_str().ok_or_else(|| {
            Error::new(ErrorKind::Proxy {
                msg: format!("proxy URL {proxy:?} has no host"),
                source: None,
            })
        })?;
        let proxy_port = proxy_url.port_or_known_default().unwrap_or(80);
        let tcp = TcpStream::connect((proxy_host, proxy_port))
            .await
            .map_err(|e| {
                Error::new(ErrorKind::Proxy {
                    msg: format!("failed to connect to proxy {proxy_host}:{proxy_port}"),
                    source: Some(Box::new(e)),
                })
            })?;

        if https {
            let tunneled = connect_tunnel(tcp, host, port).await?;
            Ok((Box::new(self.tls_wrap(tunneled, host).await?), false))
        } else {
            Ok((Box::new(tcp), true))
        }
    }

    async fn tls_wrap<S>(
        &self,
        stream: S,
        host: &str,
    ) -> Result<tokio_rustls::client::TlsStream<S>, Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| {
                Error::new(ErrorKind::Ssl {
                    msg: format!("{host:?} is not a valid TLS server name"),
                    source: None,
                })
            })?;
        TlsConnector::from(self.tls.clone())
            .connect(server_name, stream)
            .await
            .map_err(classify_tls_error)
    }
}

async fn tcp_connect(host: &str, port: u16) -> Result<TcpStream, Error> {
    TcpStream::connect((host, port)).await.map_err(|e| {
        Error::new(ErrorKind::Transport {
            msg: format!("failed to connect to {host}:{port}"),
            source: Some(Box::new(e)),
        })
    })
}

/// A 301/302/303/307/308 response's Location, when present. Returned as an
/// already-escaped string: servers are allowed by nobody, yet observed in
/// the wild, to emit raw non-ASCII bytes here.
fn redirectable_location(response: &Response) -> Option<String> {
    if !matches!(response.status().as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    response
        .headers()
        .get(LOCATION)
        .map(|v| escape_location(v.as_bytes()))
}

/// Terminal-response policy: 2xx succeeds, redirect statuses pass through
/// untouched when redirects are disabled, everything else is an HTTP error.
fn finalize(response: Response, allow_redirects: bool) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if !allow_redirects && status.is_redirection() {
        return Ok(response);
    }
    Err(Error::new(ErrorKind::Http {
        response: Box::new(response),
        redirect_loop: false,
    }))
}

/// Percent-escapes bytes that must not appear raw in a redirect target.
/// Existing percent-escapes are preserved as-is.
fn escape_location(location: &[u8]) -> String {
    let mut escaped = String::with_capacity(location.len());
    for &byte in location {
        if byte.is_ascii() && byte != b' ' && !byte.is_ascii_control() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

fn requires_length(method: &Method, length: u64) -> bool {
    length > 0 || *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Converts a request payload into a hyper body plus its known length.
fn build_out_body(body: Option<&RequestBody>) -> Result<(OutBody, Option<u64>), Error> {
    match body {
        None => Ok((
            Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
            Some(0),
        )),
        Some(RequestBody::Bytes(bytes)) => {
            let length = bytes.len() as u64;
            Ok((
                Full::new(bytes.clone())
                    .map_err(|never| match never {})
                    .boxed_unsync(),
                Some(length),
            ))
        }
        Some(RequestBody::Chunks(chunks)) => {
            let length: u64 = chunks.iter().map(|c| c.len() as u64).sum();
            let frames = chunks
                .clone()
                .into_iter()
                .map(|chunk| Ok::<_, std::io::Error>(Frame::data(chunk)));
            Ok((
                StreamBody::new(futures::stream::iter(frames)).boxed_unsync(),
                Some(length),
            ))
        }
        Some(RequestBody::Stream(shared)) => {
            let stream = shared.take().ok_or_else(|| {
                Error::new(ErrorKind::Request {
                    msg: "streamed request body was already consumed".to_string(),
                    source: None,
                })
            })?;
            let frames = stream.map(|item| item.map(Frame::data));
            Ok((StreamBody::new(frames).boxed_unsync(), None))
        }
    }
}

/// Maps a hyper response onto the normalized response type, deferring
/// content decoding until the first read.
fn adapt_response(url: Url, method: &Method, response: http::Response<Incoming>) -> Response {
    let (parts, incoming) = response.into_parts();
    let mut headers = parts.headers;
    // HEAD and bodyless statuses legitimately declare a length for a body
    // that never arrives.
    let bodyless = *method == Method::HEAD
        || matches!(parts.status.as_u16(), 204 | 304)
        || parts.status.is_informational();
    let expected = if bodyless {
        None
    } else {
        content_length(&headers)
    };

    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(ContentEncoding::parse);

    let stream = incoming_stream(incoming);
    let body = match encoding {
        Some(encoding) => {
            headers.remove(CONTENT_ENCODING);
            Body::deferred(stream, encoding, expected)
        }
        None => Body::from_stream(stream, expected),
    };

    Response::new(parts.status, url, headers, body)
}

fn incoming_stream(incoming: Incoming) -> BodyStream {
    let frames = http_body_util::BodyStream::new(incoming);
    Box::pin(frames.filter_map(|item| async move {
        match item {
            Ok(frame) => frame.into_data().ok().map(Ok),
            Err(e) => Some(Err(classify_body_error(e))),
        }
    }))
}

fn classify_body_error(e: hyper::Error) -> Error {
    let mut chain = e.to_string();
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(&e);
    while let Some(err) = source {
        chain.push_str("; ");
        chain.push_str(&err.to_string());
        source = err.source();
    }
    let premature_close = e.is_incomplete_message()
        || chain.contains("end of file before message length reached")
        || chain.contains("incomplete message");
    if premature_close {
        // Counts are filled in by the body once it knows how much arrived.
        Error::new(ErrorKind::IncompleteRead {
            partial: 0,
            expected: None,
        })
    } else {
        transport("error reading response body", e)
    }
}

fn transport(msg: &str, cause: hyper::Error) -> Error {
    Error::new(ErrorKind::Transport {
        msg: msg.to_string(),
        source: Some(Box::new(cause)),
    })
}

/// Classifies a TLS handshake failure, separating certificate validation
/// problems from other handshake faults.
fn classify_tls_error(e: std::io::Error) -> Error {
    let rustls_error = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match rustls_error {
        Some(rustls::Error::InvalidCertificate(reason)) => {
            Error::new(ErrorKind::CertificateVerify {
                msg: format!("{reason:?}"),
                source: Some(Box::new(e)),
            })
        }
        Some(other) => {
            let mut msg = other.to_string();
            if msg.contains("HandshakeFailure") || msg.contains("ProtocolVersion") {
                msg.push_str("; enabling legacy server connect may help");
            }
            Error::new(ErrorKind::Ssl {
                msg,
                source: Some(Box::new(e)),
            })
        }
        None => Error::new(ErrorKind::Ssl {
            msg: e.to_string(),
            source: Some(Box::new(e)),
        }),
    }
}

/// Normalizes a proxy string into a URL; scheme-less proxies mean http.
fn parse_proxy_url(proxy: &str) -> Result<Url, Error> {
    let raw = if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    };
    Url::parse(&raw).map_err(|e| {
        Error::new(ErrorKind::Proxy {
            msg: format!("invalid proxy URL {proxy:?}"),
            source: Some(Box::new(e)),
        })
    })
}

/// Issues a CONNECT request over an established proxy connection and waits
/// for the 2xx tunnel confirmation.
async fn connect_tunnel(
    mut stream: TcpStream,
    host: &str,
    port: u16,
) -> Result<TcpStream, Error> {
    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.map_err(|e| {
        Error::new(ErrorKind::Proxy {
            msg: "failed to send CONNECT to proxy".to_string(),
            source: Some(Box::new(e)),
        })
    })?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() > 8 * 1024 {
            return Err(Error::new(ErrorKind::Proxy {
                msg: "proxy CONNECT response exceeded 8 KiB".to_string(),
                source: None,
            }));
        }
        let n = stream.read(&mut byte).await.map_err(|e| {
            Error::new(ErrorKind::Proxy {
                msg: "failed to read CONNECT response from proxy".to_string(),
                source: Some(Box::new(e)),
            })
        })?;
        if n == 0 {
            return Err(Error::new(ErrorKind::Proxy {
                msg: "proxy closed the connection during CONNECT".to_string(),
                source: None,
            }));
        }
        response.push(byte[0]);
    }

    let status_line = String::from_utf8_lossy(&response);
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);
    if !(200..300).contains(&status) {
        return Err(Error::new(ErrorKind::Proxy {
            msg: format!("proxy CONNECT tunnel failed with status {status}"),
            source: None,
        }));
    }
    Ok(stream)
}

/// Serves a `data:` URL without touching the network.
fn data_response(url: &Url) -> Result<Response, Error> {
    let raw = url.as_str();
    let content = raw
        .strip_prefix("data:")
        .unwrap_or(raw)
        .split('#')
        .next()
        .unwrap_or_default();
    let (meta, payload) = content.split_once(',').ok_or_else(|| {
        Error::new(ErrorKind::Request {
            msg: format!("malformed data URL {raw:?}"),
            source: None,
        })
    })?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let mime = if mime.is_empty() {
        DEFAULT_DATA_URL_MIME
    } else {
        mime
    };

    let bytes: Vec<u8> = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64.decode(compact).map_err(|e| {
            Error::new(ErrorKind::Request {
                msg: format!("invalid base64 payload in data URL {raw:?}"),
                source: Some(Box::new(e)),
            })
        })?
    } else {
        percent_encoding::percent_decode_str(payload).collect()
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(mime) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
    Ok(Response::new(
        StatusCode::OK,
        url.clone(),
        headers,
        Body::from_bytes(bytes),
    ))
}

/// Serves a `file://` URL. Reachability is gated at prepare time.
async fn file_response(url: &Url) -> Result<Response, Error> {
    let path = url.to_file_path().map_err(|_| {
        Error::new(ErrorKind::Request {
            msg: format!("{url} is not a usable file URL"),
            source: None,
        })
    })?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        Error::new(ErrorKind::Transport {
            msg: format!("failed to read {}", path.display()),
            source: Some(Box::new(e)),
        })
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
    Ok(Response::new(
        StatusCode::OK,
        url.clone(),
        headers,
        Body::from_bytes(bytes),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_escaping_preserves_ascii_and_escapes() {
        assert_eq!(escape_location(b"/plain/path"), "/plain/path");
        assert_eq!(escape_location(b"/with space"), "/with%20space");
        assert_eq!(escape_location("/caf\u{e9}".as_bytes()), "/caf%C3%A9");
        // Existing escapes pass through untouched.
        assert_eq!(escape_location(b"/already%20done"), "/already%20done");
    }

    #[test]
    fn data_url_base64_decodes() {
        let url = Url::parse("data:text/plain;base64,SGVsbG8=").unwrap();
        let response = data_response(&url).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn data_url_percent_form_decodes() {
        let url = Url::parse("data:,Hello%2C%20World%21").unwrap();
        let response = data_response(&url).unwrap();
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            DEFAULT_DATA_URL_MIME
        );
        assert_eq!(
            response.headers().get(CONTENT_LENGTH).unwrap(),
            &HeaderValue::from(13u64)
        );
    }

    #[test]
    fn data_url_without_comma_is_rejected() {
        let url = Url::parse("data:text/plain").unwrap();
        assert!(data_response(&url).is_err());
    }

    #[test]
    fn proxy_urls_default_to_http_scheme() {
        assert_eq!(
            parse_proxy_url("127.0.0.1:8080").unwrap().scheme(),
            "http"
        );
        assert_eq!(
            parse_proxy_url("socks5://127.0.0.1:9050").unwrap().scheme(),
            "socks5"
        );
    }

    #[tokio::test]
    async fn data_body_roundtrip() {
        let url = Url::parse("data:text/plain;base64,SGVsbG8=").unwrap();
        let mut response = data_response(&url).unwrap();
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"Hello"));
    }
}
