//! Normalized error taxonomy.
//!
//! Every transport handler maps its library's native failures onto the small
//! set of kinds in [`ErrorKind`] so callers never see backend-specific error
//! types. The director attaches the name of the failing handler before an
//! error reaches the caller, and tallies per-kind counts in [`ErrorStats`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use strum::IntoEnumIterator;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

use crate::response::Response;

/// Boxed low-level cause retained for error-chain inspection.
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

/// One rejection reason and the handlers that produced it, as collected by
/// the director while trying handlers in ranked order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Why the request could not be served.
    pub reason: String,
    /// Names of the handlers that declined for this reason, in the order
    /// they were tried.
    pub handlers: Vec<String>,
}

/// The normalized failure kinds every handler maps onto.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Capability negotiation declined the request. Never surfaced to the
    /// caller directly; the director records it and tries the next handler.
    #[error("unsupported request: {reason}")]
    Unsupported {
        /// Human-readable rejection reason.
        reason: String,
    },

    /// A completed exchange returned a non-2xx status.
    #[error("{}", http_error_message(.response, .redirect_loop))]
    Http {
        /// The response that carried the error status. The body is still
        /// readable (error pages frequently matter to callers).
        response: Box<Response>,
        /// Set when the status resulted from exhausting the redirect bound.
        redirect_loop: bool,
    },

    /// Connection failure, reset, timeout, or malformed response framing.
    #[error("transport error: {msg}")]
    Transport {
        /// Description of the fault.
        msg: String,
        /// Underlying library error, if any.
        #[source]
        source: Option<Cause>,
    },

    /// Fewer body bytes arrived than the response declared.
    #[error("{}", incomplete_read_message(.partial, .expected))]
    IncompleteRead {
        /// Bytes received before the stream ended.
        partial: u64,
        /// Bytes the response declared, when known.
        expected: Option<u64>,
    },

    /// TLS handshake failure other than certificate validation.
    #[error("SSL error: {msg}")]
    Ssl {
        /// Description, including a legacy-connect hint where applicable.
        msg: String,
        /// Underlying library error, if any.
        #[source]
        source: Option<Cause>,
    },

    /// Server certificate validation failure. Distinguished from [`Ssl`]
    /// because the actionable hint differs (verification can be disabled).
    ///
    /// [`Ssl`]: ErrorKind::Ssl
    #[error("certificate verification failed: {msg}; disabling certificate verification bypasses this check")]
    CertificateVerify {
        /// Description of the validation failure.
        msg: String,
        /// Underlying library error, if any.
        #[source]
        source: Option<Cause>,
    },

    /// Proxy connection or tunnel establishment failure, including
    /// SOCKS-layer errors.
    #[error("proxy error: {msg}")]
    Proxy {
        /// Description of the fault.
        msg: String,
        /// Underlying library error, if any.
        #[source]
        source: Option<Cause>,
    },

    /// Request-related failure with no more specific classification.
    #[error("request error: {msg}")]
    Request {
        /// Description of the fault.
        msg: String,
        /// Underlying library error, if any.
        #[source]
        source: Option<Cause>,
    },

    /// A handler failed in a way it could not classify. The director treats
    /// this as a possible handler defect: it logs and proceeds to the next
    /// handler instead of aborting the request.
    #[error("unexpected handler error: {msg}")]
    Unexpected {
        /// Description of the unclassified failure.
        msg: String,
    },

    /// Every registered handler was tried and none could serve the request.
    #[error("{}", no_handlers_message(.rejections, .unexpected))]
    NoSupportedHandlers {
        /// Distinct rejection reasons with the handlers that produced them,
        /// in the order first seen.
        rejections: Vec<Rejection>,
        /// How many handlers failed with an unexpected error.
        unexpected: usize,
    },
}

fn http_error_message(response: &Response, redirect_loop: &bool) -> String {
    let mut msg = format!("HTTP error {} {}", response.status().as_u16(), response.reason());
    if *redirect_loop {
        msg.push_str(" (redirect loop detected)");
    }
    msg
}

fn incomplete_read_message(partial: &u64, expected: &Option<u64>) -> String {
    match expected {
        Some(expected) => format!(
            "incomplete read: got {partial} of {expected} expected bytes before the connection closed"
        ),
        None => format!("incomplete read: connection closed after {partial} bytes"),
    }
}

fn no_handlers_message(rejections: &[Rejection], unexpected: &usize) -> String {
    let mut msg = String::from("no handler could satisfy this request");
    for rejection in rejections {
        msg.push_str(&format!(
            "; {} ({})",
            rejection.reason,
            rejection.handlers.join(", ")
        ));
    }
    if *unexpected > 0 {
        msg.push_str(&format!("; {unexpected} handler(s) failed unexpectedly"));
    }
    msg
}

/// A dispatch-layer error: a normalized [`ErrorKind`] plus the name of the
/// handler that raised it, once known.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    handler: Option<String>,
}

impl Error {
    /// Wraps a kind with no handler attribution yet.
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, handler: None }
    }

    /// Shorthand for an [`ErrorKind::Unsupported`] rejection.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unsupported { reason: reason.into() })
    }

    /// Shorthand for an [`ErrorKind::Unexpected`] failure.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unexpected { msg: msg.into() })
    }

    /// The normalized kind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Consumes the error, returning its kind.
    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// Name of the handler that raised this error, if attributed.
    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Attributes the error to a handler unless one is already recorded.
    pub fn with_handler(mut self, name: &str) -> Self {
        if self.handler.is_none() {
            self.handler = Some(name.to_string());
        }
        self
    }

    /// Classification bucket for statistics.
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl ErrorKind {
    /// Classification bucket for statistics.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::Unsupported { .. } => ErrorClass::Unsupported,
            ErrorKind::Http { .. } => ErrorClass::Http,
            ErrorKind::Transport { .. } => ErrorClass::Transport,
            ErrorKind::IncompleteRead { .. } => ErrorClass::IncompleteRead,
            ErrorKind::Ssl { .. } => ErrorClass::Ssl,
            ErrorKind::CertificateVerify { .. } => ErrorClass::CertificateVerify,
            ErrorKind::Proxy { .. } => ErrorClass::Proxy,
            ErrorKind::Request { .. } => ErrorClass::Request,
            ErrorKind::Unexpected { .. } => ErrorClass::Unexpected,
            ErrorKind::NoSupportedHandlers { .. } => ErrorClass::NoSupportedHandlers,
        }
    }
}

/// Field-free mirror of [`ErrorKind`] used as a statistics key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorClass {
    /// Capability negotiation rejections.
    Unsupported,
    /// Non-2xx statuses.
    Http,
    /// I/O-layer faults.
    Transport,
    /// Short body reads.
    IncompleteRead,
    /// TLS handshake failures.
    Ssl,
    /// Certificate validation failures.
    CertificateVerify,
    /// Proxy/tunnel failures.
    Proxy,
    /// Unclassified request failures.
    Request,
    /// Possible handler defects.
    Unexpected,
    /// Full dispatch exhaustion.
    NoSupportedHandlers,
}

impl ErrorClass {
    /// Stable display label for logs and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Unsupported => "unsupported request",
            ErrorClass::Http => "HTTP error",
            ErrorClass::Transport => "transport error",
            ErrorClass::IncompleteRead => "incomplete read",
            ErrorClass::Ssl => "SSL error",
            ErrorClass::CertificateVerify => "certificate verification error",
            ErrorClass::Proxy => "proxy error",
            ErrorClass::Request => "request error",
            ErrorClass::Unexpected => "unexpected handler error",
            ErrorClass::NoSupportedHandlers => "no supported handlers",
        }
    }
}

/// Thread-safe per-kind error counters.
///
/// Shared across concurrent `send` calls via `Arc`; counters are atomic and
/// initialized to zero for every class up front.
pub struct ErrorStats {
    counts: HashMap<ErrorClass, AtomicUsize>,
}

impl ErrorStats {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        let mut counts = HashMap::new();
        for class in ErrorClass::iter() {
            counts.insert(class, AtomicUsize::new(0));
        }
        ErrorStats { counts }
    }

    /// Increments the counter for a class.
    pub fn record(&self, class: ErrorClass) {
        // Every class is inserted in new(), so the lookup cannot miss.
        self.counts
            .get(&class)
            .unwrap()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current count for a class.
    pub fn count(&self, class: ErrorClass) -> usize {
        self.counts.get(&class).unwrap().load(Ordering::SeqCst)
    }
}

impl Default for ErrorStats {
    fn default() -> Self {
        ErrorStats::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_at_zero() {
        let stats = ErrorStats::new();
        for class in ErrorClass::iter() {
            assert_eq!(stats.count(class), 0);
        }
    }

    #[test]
    fn stats_record_increments_only_target_class() {
        let stats = ErrorStats::new();
        stats.record(ErrorClass::Transport);
        stats.record(ErrorClass::Transport);
        assert_eq!(stats.count(ErrorClass::Transport), 2);
        assert_eq!(stats.count(ErrorClass::Http), 0);
    }

    #[test]
    fn handler_attribution_is_set_once() {
        let err = Error::unsupported("ws scheme is not supported")
            .with_handler("first")
            .with_handler("second");
        assert_eq!(err.handler(), Some("first"));
    }

    #[test]
    fn incomplete_read_message_includes_counts() {
        let err = Error::new(ErrorKind::IncompleteRead {
            partial: 12,
            expected: Some(234234),
        });
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("234234"));
    }

    #[test]
    fn aggregated_message_names_reasons_and_handlers() {
        let err = Error::new(ErrorKind::NoSupportedHandlers {
            rejections: vec![
                Rejection {
                    reason: "ftp scheme is not supported".to_string(),
                    handlers: vec!["reqwest".to_string(), "hyper".to_string()],
                },
                Rejection {
                    reason: "no FTP transport is available".to_string(),
                    handlers: vec!["ftp".to_string()],
                },
            ],
            unexpected: 1,
        });
        let msg = err.to_string();
        assert!(msg.contains("ftp scheme is not supported (reqwest, hyper)"));
        assert!(msg.contains("no FTP transport is available (ftp)"));
        assert!(msg.contains("1 handler(s) failed unexpectedly"));
    }
}
