//! The request director.
//!
//! Holds an ordered collection of transport handlers, ranks them per
//! request, and dispatches to the first one whose capability negotiation
//! and exchange both succeed. Rejections are collected so a fully exhausted
//! dispatch reports every reason alongside the handlers that produced it.

use std::sync::Arc;

use http::header::SET_COOKIE;
use url::Url;

use crate::config::BrokerConfig;
use crate::cookies::{CookieJar, MemoryCookieJar};
use crate::error::{Error, ErrorKind, ErrorStats, Rejection};
use crate::handler::{
    apply_cookie_header, HyperHandler, RequestHandler, ReqwestHandler, UnsupportedHandler,
    WebSocketHandler,
};
use crate::request::Request;
use crate::response::Response;
use crate::tls::build_tls_config;

/// Anything the director accepts as a request: a built [`Request`], a URL
/// string, or a parsed [`Url`].
pub trait IntoRequest {
    /// Converts into a canonical request.
    fn into_request(self) -> Result<Request, Error>;
}

impl IntoRequest for Request {
    fn into_request(self) -> Result<Request, Error> {
        Ok(self)
    }
}

impl IntoRequest for &str {
    fn into_request(self) -> Result<Request, Error> {
        Request::new(self)
    }
}

impl IntoRequest for String {
    fn into_request(self) -> Result<Request, Error> {
        Request::new(&self)
    }
}

impl IntoRequest for &Url {
    fn into_request(self) -> Result<Request, Error> {
        Request::new(self.as_str())
    }
}

impl IntoRequest for Url {
    fn into_request(self) -> Result<Request, Error> {
        Request::new(self.as_str())
    }
}

/// Ranks and dispatches across registered handlers.
///
/// Safe for concurrent use: every dispatch works on its own copy of the
/// request, and handler-internal caches guard themselves.
pub struct RequestDirector {
    config: Arc<BrokerConfig>,
    handlers: Vec<Arc<dyn RequestHandler>>,
    cookie_jar: Arc<dyn CookieJar>,
    stats: Arc<ErrorStats>,
}

impl RequestDirector {
    /// Creates a director with no handlers registered.
    pub fn new(config: Arc<BrokerConfig>) -> Self {
        RequestDirector {
            config,
            handlers: Vec::new(),
            cookie_jar: Arc::new(MemoryCookieJar::new()),
            stats: Arc::new(ErrorStats::new()),
        }
    }

    /// Creates a director with the built-in handler set registered:
    /// the connection-level handler, the pooled reqwest handler, the
    /// WebSocket handler, and the FTP placeholder. Later registrations are
    /// tried first when no preference list applies.
    pub fn with_default_handlers(config: Arc<BrokerConfig>) -> Result<Self, Error> {
        let tls = build_tls_config(&config.tls_options())?;
        let mut director = RequestDirector::new(config.clone());
        director.add_handler(Arc::new(HyperHandler::new(config.clone(), tls.clone())));
        director.add_handler(Arc::new(WebSocketHandler::new(config.clone(), tls.clone())));
        director.add_handler(Arc::new(UnsupportedHandler::ftp()));
        director.add_handler(Arc::new(ReqwestHandler::new(config, tls)));
        Ok(director)
    }

    /// Replaces the shared cookie jar.
    pub fn set_cookie_jar(&mut self, jar: Arc<dyn CookieJar>) {
        self.cookie_jar = jar;
    }

    /// The shared cookie jar.
    pub fn cookie_jar(&self) -> &Arc<dyn CookieJar> {
        &self.cookie_jar
    }

    /// Shared error statistics.
    pub fn stats(&self) -> &Arc<ErrorStats> {
        &self.stats
    }

    /// Registers a handler. Adding the same instance twice is a no-op.
    pub fn add_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        let duplicate = self
            .handlers
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &handler));
        if !duplicate {
            self.handlers.push(handler);
        }
    }

    /// Removes every handler with the given name. Returns how many were
    /// removed.
    pub fn remove_handler(&mut self, name: &str) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|handler| handler.name() != name);
        before - self.handlers.len()
    }

    /// Replaces any handler sharing the new handler's name, then registers
    /// it.
    pub fn replace_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        self.remove_handler(handler.name());
        self.add_handler(handler);
    }

    /// Registered handler names in registration order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Ranks handlers for a request: handlers named in the preference list
    /// (director-wide base list, then the request's own additions) sort
    /// first by list position; everything else follows in reverse
    /// registration order, most recently added first.
    fn ranked_handlers(&self, request: &Request) -> Vec<Arc<dyn RequestHandler>> {
        let mut preferences: Vec<&str> = self
            .config
            .preferred_handlers
            .iter()
            .map(String::as_str)
            .collect();
        preferences.extend(
            request
                .extensions
                .preferred_handlers
                .iter()
                .map(String::as_str),
        );

        let total = self.handlers.len();
        let mut ranked: Vec<(usize, usize, Arc<dyn RequestHandler>)> = self
            .handlers
            .iter()
            .enumerate()
            .map(|(position, handler)| {
                let preference = preferences
                    .iter()
                    .position(|name| *name == handler.name())
                    .unwrap_or(usize::MAX);
                (preference, total - position, handler.clone())
            })
            .collect();
        ranked.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        ranked.into_iter().map(|(_, _, handler)| handler).collect()
    }

    /// Dispatches a request to the first capable handler.
    ///
    /// Negotiation rejections fall through to the next handler; classified
    /// transport failures propagate immediately (a definite failure from a
    /// capable handler is not retried elsewhere); unexpected errors are
    /// logged as possible handler defects and skipped. When nothing can
    /// serve the request, the aggregated error lists every rejection.
    pub async fn send(&self, request: impl IntoRequest) -> Result<Response, Error> {
        let request = request.into_request()?;
        if self.handlers.is_empty() {
            return Err(Error::new(ErrorKind::Request {
                msg: "no request handlers are registered".to_string(),
                source: None,
            }));
        }

        let jar = request
            .extensions
            .cookie_jar
            .clone()
            .unwrap_or_else(|| self.cookie_jar.clone());

        let mut rejections: Vec<Rejection> = Vec::new();
        let mut unexpected = 0usize;

        for handler in self.ranked_handlers(&request) {
            let mut attempt = request.clone();
            apply_cookie_header(jar.as_ref(), &mut attempt);

            match handler.prepare(&mut attempt) {
                Ok(()) => {}
                Err(err) => match err.into_kind() {
                    ErrorKind::Unsupported { reason } => {
                        log::debug!(
                            "{} cannot handle {} ({reason}), trying next handler",
                            handler.name(),
                            request.url()
                        );
                        record_rejection(&mut rejections, reason, handler.name());
                        continue;
                    }
                    ErrorKind::Unexpected { msg } => {
                        log::warn!(
                            "unexpected error preparing {} with {}: {msg} (possible handler defect)",
                            request.url(),
                            handler.name()
                        );
                        unexpected += 1;
                        continue;
                    }
                    kind => {
                        let err = Error::new(kind).with_handler(handler.name());
                        self.stats.record(err.class());
                        return Err(err);
                    }
                },
            }

            log::debug!("dispatching {} via {}", attempt.url(), handler.name());
            match handler.handle(attempt).await {
                Ok(response) => {
                    store_cookies(jar.as_ref(), &response);
                    return Ok(response);
                }
                Err(err) => match err.into_kind() {
                    ErrorKind::Unsupported { reason } => {
                        log::debug!(
                            "{} declined {} during handling ({reason})",
                            handler.name(),
                            request.url()
                        );
                        record_rejection(&mut rejections, reason, handler.name());
                        continue;
                    }
                    ErrorKind::Unexpected { msg } => {
                        log::warn!(
                            "unexpected error from {} handling {}: {msg} (possible handler defect)",
                            handler.name(),
                            request.url()
                        );
                        unexpected += 1;
                        continue;
                    }
                    kind => {
                        let err = Error::new(kind).with_handler(handler.name());
                        self.stats.record(err.class());
                        return Err(err);
                    }
                },
            }
        }

        let err = Error::new(ErrorKind::NoSupportedHandlers {
            rejections,
            unexpected,
        });
        self.stats.record(err.class());
        Err(err)
    }

    /// Dry-run capability check across all handlers; no I/O is performed.
    pub fn is_supported(&self, request: &Request) -> bool {
        self.handlers.iter().any(|handler| {
            let mut attempt = request.clone();
            handler.prepare(&mut attempt).is_ok()
        })
    }

    /// Releases every handler's pooled resources.
    pub fn close(&self) {
        for handler in &self.handlers {
            handler.close();
        }
    }
}

fn record_rejection(rejections: &mut Vec<Rejection>, reason: String, handler: &str) {
    if let Some(existing) = rejections.iter_mut().find(|r| r.reason == reason) {
        existing.handlers.push(handler.to_string());
    } else {
        rejections.push(Rejection {
            reason,
            handlers: vec![handler.to_string()],
        });
    }
}

/// Hands a successful response's cookies to the jar.
fn store_cookies(jar: &dyn CookieJar, response: &Response) {
    let set_cookie: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect();
    if !set_cookie.is_empty() {
        jar.store_response_cookies(response.url(), &set_cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::handler::{Extension, Feature};
    use crate::response::Body;

    /// Test double driven by a fixed outcome per call.
    struct ScriptedHandler {
        name: &'static str,
        schemes: &'static [&'static str],
        outcome: Outcome,
        calls: AtomicUsize,
    }

    enum Outcome {
        Succeed,
        FailTransport,
        FailUnexpected,
    }

    impl ScriptedHandler {
        fn new(name: &'static str, schemes: &'static [&'static str], outcome: Outcome) -> Self {
            ScriptedHandler {
                name,
                schemes,
                outcome,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestHandler for ScriptedHandler {
        fn name(&self) -> &str {
            self.name
        }
        fn supported_schemes(&self) -> &[&str] {
            self.schemes
        }
        fn supported_proxy_schemes(&self) -> &[&str] {
            &["http"]
        }
        fn supported_features(&self) -> &[Feature] {
            &[Feature::NoProxy, Feature::AllProxy]
        }
        fn supported_extensions(&self) -> &[Extension] {
            &[Extension::CookieJar, Extension::AllowRedirects]
        }
        fn prepare(&self, request: &mut Request) -> Result<(), Error> {
            let scheme = request.url().scheme();
            if !self.schemes.contains(&scheme) {
                return Err(Error::unsupported(format!(
                    "{scheme} scheme is not supported"
                )));
            }
            Ok(())
        }
        async fn handle(&self, request: Request) -> Result<Response, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Succeed => Ok(Response::new(
                    StatusCode::NO_CONTENT,
                    request.url().clone(),
                    http::HeaderMap::new(),
                    Body::empty(),
                )),
                Outcome::FailTransport => Err(Error::new(ErrorKind::Transport {
                    msg: "connection reset".to_string(),
                    source: None,
                })),
                Outcome::FailUnexpected => Err(Error::unexpected("internal invariant broken")),
            }
        }
    }

    fn director_with(
        handlers: Vec<Arc<ScriptedHandler>>,
        preferences: Vec<String>,
    ) -> RequestDirector {
        let config = Arc::new(BrokerConfig {
            read_env_proxies: false,
            preferred_handlers: preferences,
            ..BrokerConfig::default()
        });
        let mut director = RequestDirector::new(config);
        for handler in handlers {
            director.add_handler(handler);
        }
        director
    }

    #[tokio::test]
    async fn most_recently_registered_handler_wins_without_preferences() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let b = Arc::new(ScriptedHandler::new("b", &["http"], Outcome::Succeed));
        let director = director_with(vec![a.clone(), b.clone()], Vec::new());

        director.send("http://example.com").await.unwrap();
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn unsupported_handler_falls_through_to_earlier_registration() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let b = Arc::new(ScriptedHandler::new("b", &["ws"], Outcome::Succeed));
        let director = director_with(vec![a.clone(), b.clone()], Vec::new());

        director.send("http://example.com").await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn preference_list_overrides_registration_order() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let b = Arc::new(ScriptedHandler::new("b", &["http"], Outcome::Succeed));
        let director = director_with(vec![a.clone(), b.clone()], vec!["a".to_string()]);

        director.send("http://example.com").await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn per_request_preferences_extend_the_base_list() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let b = Arc::new(ScriptedHandler::new("b", &["http"], Outcome::Succeed));
        let director = director_with(vec![a.clone(), b.clone()], Vec::new());

        let mut request = Request::new("http://example.com").unwrap();
        request.extensions.preferred_handlers = vec!["a".to_string()];
        director.send(request).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn classified_errors_do_not_fall_back() {
        let fallback = Arc::new(ScriptedHandler::new("fallback", &["http"], Outcome::Succeed));
        let failing = Arc::new(ScriptedHandler::new(
            "failing",
            &["http"],
            Outcome::FailTransport,
        ));
        let director = director_with(vec![fallback.clone(), failing.clone()], Vec::new());

        let err = director.send("http://example.com").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Transport { .. }));
        assert_eq!(err.handler(), Some("failing"));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn unexpected_errors_fall_back_to_the_next_handler() {
        let fallback = Arc::new(ScriptedHandler::new("fallback", &["http"], Outcome::Succeed));
        let buggy = Arc::new(ScriptedHandler::new(
            "buggy",
            &["http"],
            Outcome::FailUnexpected,
        ));
        let director = director_with(vec![fallback.clone(), buggy.clone()], Vec::new());

        director.send("http://example.com").await.unwrap();
        assert_eq!(buggy.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_dispatch_names_every_handler_and_reason() {
        let a = Arc::new(ScriptedHandler::new("a", &["ws"], Outcome::Succeed));
        let b = Arc::new(ScriptedHandler::new("b", &["ws"], Outcome::Succeed));
        let director = director_with(vec![a, b], Vec::new());

        let err = director.send("http://example.com").await.unwrap_err();
        let ErrorKind::NoSupportedHandlers { rejections, unexpected } = err.kind() else {
            panic!("expected NoSupportedHandlers, got {:?}", err.kind());
        };
        assert_eq!(*unexpected, 0);
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].reason, "http scheme is not supported");
        // Ranked order: most recently registered first.
        assert_eq!(rejections[0].handlers, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn adding_the_same_instance_twice_is_a_no_op() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let mut director = director_with(vec![a.clone()], Vec::new());
        director.add_handler(a);
        assert_eq!(director.handler_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn replace_handler_removes_by_name() {
        let old = Arc::new(ScriptedHandler::new("x", &["ws"], Outcome::Succeed));
        let new = Arc::new(ScriptedHandler::new("x", &["http"], Outcome::Succeed));
        let mut director = director_with(vec![old], Vec::new());
        director.replace_handler(new.clone());

        assert_eq!(director.handler_names(), vec!["x"]);
        director.send("http://example.com").await.unwrap();
        assert_eq!(new.calls(), 1);
    }

    #[tokio::test]
    async fn is_supported_checks_without_io() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let director = director_with(vec![a.clone()], Vec::new());

        assert!(director.is_supported(&Request::new("http://example.com").unwrap()));
        assert!(!director.is_supported(&Request::new("gopher://example.com").unwrap()));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn empty_director_reports_missing_handlers() {
        let director = director_with(Vec::new(), Vec::new());
        let err = director.send("http://example.com").await.unwrap_err();
        assert!(err.to_string().contains("no request handlers are registered"));
    }

    #[tokio::test]
    async fn url_strings_and_requests_are_both_accepted() {
        let a = Arc::new(ScriptedHandler::new("a", &["http"], Outcome::Succeed));
        let director = director_with(vec![a.clone()], Vec::new());

        director.send("http://example.com").await.unwrap();
        director
            .send(Request::new("http://example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(a.calls(), 2);
    }
}
