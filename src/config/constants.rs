//! Configuration constants.
//!
//! Timeouts, bounds, and other operational defaults used throughout the
//! dispatch layer. All of these are defaults; per-request values win where a
//! corresponding `Request` field exists.

use std::time::Duration;

/// Default socket timeout applied when a request carries none (or zero).
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(20);

/// Maximum number of redirect hops any handler may follow.
/// Exceeding this bound surfaces as an HTTP error with the redirect-loop
/// flag set rather than hanging or recursing.
pub const MAX_REDIRECT_HOPS: usize = 10;

/// How many trailing bytes to shave off, one at a time, when a gzip body
/// fails to decompress. Some servers append junk after a valid gzip stream;
/// retrying with a progressively truncated buffer recovers those responses.
pub const GZIP_TRUNCATION_ATTEMPTS: usize = 1024;

/// Default port for SOCKS proxies given without one.
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// MIME type assumed for `data:` URLs that do not declare one.
pub const DEFAULT_DATA_URL_MIME: &str = "text/plain;charset=US-ASCII";

/// Header consumed at prepare time to override the proxy for a single
/// request. The value becomes the `all` entry of the request's proxy map and
/// the header itself is never sent on the wire.
pub const PROXY_OVERRIDE_HEADER: &str = "x-request-proxy";

/// Fallback User-Agent if the rotating pool is ever empty.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
