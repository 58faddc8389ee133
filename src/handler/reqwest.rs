//! Pooled HTTP handler built on reqwest.
//!
//! One client session exists per (cookie-jar identity, proxy set) pair:
//! reqwest fixes proxies at client construction, so the proxy set joins the
//! cache key that the jar identity alone would otherwise form. Certificate
//! policy always comes from the shared rustls configuration; the library's
//! own bundle resolution is never consulted. Redirect following is bounded
//! by a custom policy that stops (rather than errors) at the hop limit so
//! the final 3xx response stays observable and can be classified as a
//! redirect loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::header::LOCATION;
use url::Url;

use crate::config::{BrokerConfig, MAX_REDIRECT_HOPS};
use crate::cookies::{jar_identity, CookieJar, ReqwestJarAdapter};
use crate::error::{Error, ErrorKind};
use crate::handler::{negotiate, Extension, Feature, RequestHandler};
use crate::request::{Request, RequestBody};
use crate::response::{content_length, Body, BodyStream, Response};

const SCHEMES: &[&str] = &["http", "https"];
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks4", "socks5", "socks5h"];
const FEATURES: &[Feature] = &[Feature::NoProxy, Feature::AllProxy];
const EXTENSIONS: &[Extension] = &[Extension::CookieJar];

/// Session cache key: cookie-jar identity plus the proxy set.
type SessionKey = (usize, Vec<(String, Option<String>)>);

/// The reqwest-based request handler.
pub struct ReqwestHandler {
    config: Arc<BrokerConfig>,
    tls: Arc<rustls::ClientConfig>,
    sessions: Mutex<HashMap<SessionKey, reqwest::Client>>,
}

impl ReqwestHandler {
    /// Creates a handler sharing the broker's configuration and TLS setup.
    pub fn new(config: Arc<BrokerConfig>, tls: Arc<rustls::ClientConfig>) -> Self {
        ReqwestHandler {
            config,
            tls,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The session for a request, created on first use.
    fn session_for(&self, request: &Request) -> Result<reqwest::Client, Error> {
        let jar = request.extensions.cookie_jar.clone();
        let jar_key = jar.as_ref().map(jar_identity).unwrap_or(0);
        let key = (jar_key, request.proxies.cache_key());

        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = sessions.get(&key) {
            return Ok(client.clone());
        }
        let client = self.build_session(jar, request)?;
        sessions.insert(key, client.clone());
        Ok(client)
    }

    fn build_session(
        &self,
        jar: Option<Arc<dyn CookieJar>>,
        request: &Request,
    ) -> Result<reqwest::Client, Error> {
        // Stop instead of erroring at the bound: the final 3xx response is
        // what lets the caller see a redirect loop.
        let redirect_policy = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > MAX_REDIRECT_HOPS {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls((*self.tls).clone())
            .redirect(redirect_policy)
            .no_proxy();

        for proxy in build_proxies(request)? {
            builder = builder.proxy(proxy);
        }
        if let Some(jar) = jar {
            builder = builder.cookie_provider(Arc::new(ReqwestJarAdapter::new(jar)));
        }

        builder.build().map_err(|e| {
            Error::new(ErrorKind::Request {
                msg: "failed to construct HTTP client session".to_string(),
                source: Some(Box::new(e)),
            })
        })
    }
}

#[async_trait]
impl RequestHandler for ReqwestHandler {
    fn name(&self) -> &str {
        "reqwest"
    }

    fn supported_schemes(&self) -> &[&str] {
        SCHEMES
    }

    fn supported_proxy_schemes(&self) -> &[&str] {
        PROXY_SCHEMES
    }

    fn supported_features(&self) -> &[Feature] {
        FEATURES
    }

    fn supported_extensions(&self) -> &[Extension] {
        EXTENSIONS
    }

    fn prepare(&self, request: &mut Request) -> Result<(), Error> {
        negotiate(self, &self.config, request)
    }

    async fn handle(&self, request: Request) -> Result<Response, Error> {
        let session = self.session_for(&request)?;
        let timeout = request
            .timeout()
            .unwrap_or(self.config.socket_timeout);

        let mut builder = session
            .request(request.method(), request.url().clone())
            .timeout(timeout)
            .headers(request.headers().clone());
        builder = apply_body(builder, request.body().cloned())?;

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        adapt_response(&request.method(), response)
    }

    fn close(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.clear();
        }
    }
}

/// Builds reqwest proxies from the entries relevant to this handler.
fn build_proxies(request: &Request) -> Result<Vec<reqwest::Proxy>, Error> {
    let no_proxy = match request.proxies.get("no") {
        Some(Some(patterns)) => reqwest::NoProxy::from_string(patterns),
        _ => None,
    };

    let mut proxies = Vec::new();
    for (key, value) in request.proxies.iter() {
        let Some(target) = value else { continue };
        let target = normalize_proxy_target(target);
        let proxy = match key {
            "all" => reqwest::Proxy::all(&target),
            "http" => reqwest::Proxy::http(&target),
            "https" => reqwest::Proxy::https(&target),
            _ => continue,
        }
        .map_err(|e| {
            Error::new(ErrorKind::Proxy {
                msg: format!("invalid proxy URL {target:?}"),
                source: Some(Box::new(e)),
            })
        })?;
        proxies.push(proxy.no_proxy(no_proxy.clone()));
    }
    Ok(proxies)
}

fn normalize_proxy_target(target: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}

fn apply_body(
    builder: reqwest::RequestBuilder,
    body: Option<RequestBody>,
) -> Result<reqwest::RequestBuilder, Error> {
    let Some(body) = body else { return Ok(builder) };
    let builder = match body {
        RequestBody::Bytes(bytes) => builder.body(bytes),
        RequestBody::Chunks(chunks) => {
            let stream = futures::stream::iter(
                chunks
                    .into_iter()
                    .map(Ok::<_, std::io::Error>),
            );
            builder.body(reqwest::Body::wrap_stream(stream))
        }
        RequestBody::Stream(shared) => {
            let stream = shared.take().ok_or_else(|| {
                Error::new(ErrorKind::Request {
                    msg: "streamed request body was already consumed".to_string(),
                    source: None,
                })
            })?;
            builder.body(reqwest::Body::wrap_stream(stream))
        }
    };
    Ok(builder)
}

/// Converts a completed reqwest exchange into the normalized response,
/// classifying non-2xx statuses.
fn adapt_response(method: &http::Method, response: reqwest::Response) -> Result<Response, Error> {
    let status = response.status();
    let url: Url = response.url().clone();
    let headers = response.headers().clone();

    // The custom redirect policy stops at the bound, so a terminal
    // redirect status with a Location means the loop guard fired.
    let redirect_loop = status.is_redirection() && headers.contains_key(LOCATION);

    let bodyless = *method == http::Method::HEAD
        || matches!(status.as_u16(), 204 | 304)
        || status.is_informational();
    let expected = if bodyless {
        None
    } else {
        content_length(&headers)
    };
    let stream: BodyStream = Box::pin(futures::stream::unfold(
        response,
        |mut response| async move {
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), response)),
                Ok(None) => None,
                Err(e) => Some((Err(classify_read_error(e)), response)),
            }
        },
    ));
    let body = Body::from_stream(stream, expected);
    let normalized = Response::new(status, url, headers, body);

    if status.is_success() {
        Ok(normalized)
    } else {
        Err(Error::new(ErrorKind::Http {
            response: Box::new(normalized),
            redirect_loop,
        }))
    }
}

/// Maps a reqwest send-time failure onto the normalized taxonomy.
fn classify_reqwest_error(e: reqwest::Error) -> Error {
    if let Some(fault) = find_tls_fault(&e) {
        return match fault {
            TlsFault::Certificate(msg) => Error::new(ErrorKind::CertificateVerify {
                msg,
                source: Some(Box::new(e)),
            }),
            TlsFault::Other(msg) => Error::new(ErrorKind::Ssl {
                msg,
                source: Some(Box::new(e)),
            }),
        };
    }

    let msg = e.to_string();
    if msg.to_ascii_lowercase().contains("proxy") {
        return Error::new(ErrorKind::Proxy {
            msg,
            source: Some(Box::new(e)),
        });
    }
    if e.is_timeout() {
        return Error::new(ErrorKind::Transport {
            msg: "request timed out".to_string(),
            source: Some(Box::new(e)),
        });
    }
    if e.is_connect() || e.is_body() || e.is_decode() {
        return Error::new(ErrorKind::Transport {
            msg,
            source: Some(Box::new(e)),
        });
    }
    if e.is_redirect() {
        // Policy errors never come from the loop guard (which stops), so
        // this is a malformed redirect target or similar.
        return Error::new(ErrorKind::Transport {
            msg,
            source: Some(Box::new(e)),
        });
    }
    if e.is_builder() || e.is_request() {
        return Error::new(ErrorKind::Request {
            msg,
            source: Some(Box::new(e)),
        });
    }
    Error::new(ErrorKind::Request {
        msg,
        source: Some(Box::new(e)),
    })
}

/// Maps a body-read failure; premature closes become short-read markers the
/// body fills with accurate counts.
fn classify_read_error(e: reqwest::Error) -> Error {
    let chain_text = error_chain_text(&e);
    if chain_text.contains("IncompleteMessage") || chain_text.contains("incomplete message") {
        return Error::new(ErrorKind::IncompleteRead {
            partial: 0,
            expected: None,
        });
    }
    Error::new(ErrorKind::Transport {
        msg: "error reading response body".to_string(),
        source: Some(Box::new(e)),
    })
}

enum TlsFault {
    Certificate(String),
    Other(String),
}

fn find_tls_fault(e: &(dyn std::error::Error + 'static)) -> Option<TlsFault> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = current {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return Some(match tls {
                rustls::Error::InvalidCertificate(reason) => {
                    TlsFault::Certificate(format!("{reason:?}"))
                }
                other => TlsFault::Other(other.to_string()),
            });
        }
        current = err.source();
    }
    None
}

fn error_chain_text(e: &(dyn std::error::Error + 'static)) -> String {
    let mut text = String::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = current {
        text.push_str(&format!("{err:?}; "));
        current = err.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::is_socks_scheme;

    #[test]
    fn socks_proxy_schemes_are_declared() {
        assert!(PROXY_SCHEMES.iter().any(|s| is_socks_scheme(s)));
    }

    #[test]
    fn proxy_entries_build() {
        let mut request = Request::new("http://example.com").unwrap();
        request.proxies.insert("all", "http://proxy:8080");
        request.proxies.insert("no", "localhost,127.0.0.1");
        request.proxies.insert("unrelated", "unrelated://x");
        assert!(build_proxies(&request).is_ok());
    }

    #[test]
    fn scheme_less_proxy_target_is_normalized() {
        assert_eq!(
            normalize_proxy_target("127.0.0.1:8080"),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            normalize_proxy_target("socks5://host:1080"),
            "socks5://host:1080"
        );
    }
}
