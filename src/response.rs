//! The response value type.
//!
//! A [`Response`] owns the underlying byte stream exclusively; reading is
//! lazy and dropping (or explicitly closing) the response releases the
//! connection. Content decoding is deferred until the first read so that
//! callers who only inspect the status never pay for decompression.

use std::fmt;
use std::io::Read;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::header::{HeaderMap, CONTENT_LENGTH};
use http::StatusCode;
use url::Url;

use crate::config::GZIP_TRUNCATION_ATTEMPTS;
use crate::error::{Error, ErrorKind};
use crate::handler::websocket::WebSocket;

/// Boxed byte stream carrying normalized errors.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send + 'static>>;

/// Content encodings the dispatch layer decodes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// RFC 1952 gzip.
    Gzip,
    /// RFC 1951 deflate, raw or zlib-wrapped.
    Deflate,
    /// Brotli.
    Brotli,
}

impl ContentEncoding {
    /// Parses a `Content-Encoding` header value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" => Some(ContentEncoding::Gzip),
            "deflate" => Some(ContentEncoding::Deflate),
            "br" => Some(ContentEncoding::Brotli),
            _ => None,
        }
    }
}

enum BodyInner {
    Empty,
    Buffered(Bytes),
    Streaming(BodyStream),
    /// Encoded stream whose decoding is deferred to the first read.
    Deferred {
        stream: BodyStream,
        encoding: ContentEncoding,
    },
}

/// A lazily read response body.
///
/// Tracks received bytes against the declared `Content-Length`; a stream
/// that ends short surfaces as [`ErrorKind::IncompleteRead`] with accurate
/// partial/expected counts.
pub struct Body {
    inner: BodyInner,
    expected: Option<u64>,
    read: u64,
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Body {
            inner: BodyInner::Empty,
            expected: None,
            read: 0,
        }
    }

    /// A fully buffered body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Body {
            inner: BodyInner::Buffered(bytes.into()),
            expected: None,
            read: 0,
        }
    }

    /// A streaming body; `expected` is the declared content length.
    pub fn from_stream(stream: BodyStream, expected: Option<u64>) -> Self {
        Body {
            inner: BodyInner::Streaming(stream),
            expected,
            read: 0,
        }
    }

    /// A streaming body in a compressed encoding, decoded on first read.
    /// `expected` counts the encoded bytes on the wire.
    pub fn deferred(stream: BodyStream, encoding: ContentEncoding, expected: Option<u64>) -> Self {
        Body {
            inner: BodyInner::Deferred { stream, encoding },
            expected,
            read: 0,
        }
    }

    /// Returns the next chunk, or `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        self.decode_if_deferred().await?;
        match &mut self.inner {
            BodyInner::Empty => Ok(None),
            BodyInner::Buffered(bytes) => {
                if bytes.is_empty() {
                    Ok(None)
                } else {
                    let chunk = bytes.split_to(bytes.len());
                    self.read += chunk.len() as u64;
                    Ok(Some(chunk))
                }
            }
            BodyInner::Streaming(stream) => match stream.next().await {
                Some(Ok(chunk)) => {
                    self.read += chunk.len() as u64;
                    Ok(Some(chunk))
                }
                Some(Err(err)) => {
                    self.inner = BodyInner::Empty;
                    Err(self.annotate_short_read(err))
                }
                None => {
                    self.inner = BodyInner::Empty;
                    self.check_complete()?;
                    Ok(None)
                }
            },
            BodyInner::Deferred { .. } => unreachable!("deferred body decoded above"),
        }
    }

    /// Reads and returns the remainder of the body.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Drops the underlying stream, releasing the connection.
    pub fn close(&mut self) {
        self.inner = BodyInner::Empty;
    }

    /// Collects an encoded stream and replaces it with the decoded buffer.
    async fn decode_if_deferred(&mut self) -> Result<(), Error> {
        let BodyInner::Deferred { stream, encoding } = &mut self.inner else {
            return Ok(());
        };
        let encoding = *encoding;

        let mut raw = BytesMut::new();
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    self.read += chunk.len() as u64;
                    raw.extend_from_slice(&chunk);
                }
                Some(Err(err)) => {
                    let err = annotate_short_read_counts(err, self.read, self.expected);
                    self.inner = BodyInner::Empty;
                    return Err(err);
                }
                None => break,
            }
        }
        if let Some(expected) = self.expected {
            if self.read < expected {
                self.inner = BodyInner::Empty;
                return Err(Error::new(ErrorKind::IncompleteRead {
                    partial: self.read,
                    expected: Some(expected),
                }));
            }
        }

        let decoded = decode_content(&raw, encoding)?;
        // Counting restarts over decoded bytes; the wire-level expectation
        // has already been enforced.
        self.expected = None;
        self.read = 0;
        self.inner = BodyInner::Buffered(decoded);
        Ok(())
    }

    fn check_complete(&self) -> Result<(), Error> {
        if let Some(expected) = self.expected {
            if self.read < expected {
                return Err(Error::new(ErrorKind::IncompleteRead {
                    partial: self.read,
                    expected: Some(expected),
                }));
            }
        }
        Ok(())
    }

    fn annotate_short_read(&self, err: Error) -> Error {
        annotate_short_read_counts(err, self.read, self.expected)
    }
}

/// Fills in accurate counts when a transport wrapper signalled a short read
/// without knowing how much had already been delivered.
fn annotate_short_read_counts(err: Error, read: u64, expected: Option<u64>) -> Error {
    match err.kind() {
        ErrorKind::IncompleteRead { partial: 0, expected: None } => {
            Error::new(ErrorKind::IncompleteRead {
                partial: read,
                expected,
            })
        }
        _ => err,
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            BodyInner::Empty => "empty",
            BodyInner::Buffered(_) => "buffered",
            BodyInner::Streaming(_) => "streaming",
            BodyInner::Deferred { .. } => "deferred",
        };
        f.debug_struct("Body")
            .field("state", &state)
            .field("expected", &self.expected)
            .field("read", &self.read)
            .finish()
    }
}

/// Decodes a complete encoded buffer.
fn decode_content(raw: &[u8], encoding: ContentEncoding) -> Result<Bytes, Error> {
    if raw.is_empty() {
        return Ok(Bytes::new());
    }
    let decoded = match encoding {
        ContentEncoding::Gzip => decode_gzip(raw)?,
        ContentEncoding::Deflate => decode_deflate(raw)?,
        ContentEncoding::Brotli => decode_brotli(raw)?,
    };
    Ok(Bytes::from(decoded))
}

/// Decompresses gzip, tolerating trailing garbage.
///
/// Some servers append junk after a valid gzip stream, which makes a single
/// whole-buffer pass fail. Retrying with one fewer trailing byte each time
/// recovers such bodies; the original error is reported if no truncation
/// succeeds.
fn decode_gzip(raw: &[u8]) -> Result<Vec<u8>, Error> {
    let original_err = match try_gzip(raw) {
        Ok(out) => return Ok(out),
        Err(e) => e,
    };
    for cut in 1..=GZIP_TRUNCATION_ATTEMPTS.min(raw.len().saturating_sub(1)) {
        if let Ok(out) = try_gzip(&raw[..raw.len() - cut]) {
            log::debug!("gzip body decoded after truncating {cut} trailing byte(s)");
            return Ok(out);
        }
    }
    Err(decode_error("gzip", original_err))
}

fn try_gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(raw).read_to_end(&mut out)?;
    Ok(out)
}

/// Decompresses deflate, accepting both raw and zlib-wrapped streams.
fn decode_deflate(raw: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    if flate2::read::DeflateDecoder::new(raw)
        .read_to_end(&mut out)
        .is_ok()
    {
        return Ok(out);
    }
    out.clear();
    flate2::read::ZlibDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| decode_error("deflate", e))?;
    Ok(out)
}

fn decode_brotli(raw: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    brotli::Decompressor::new(raw, 4096)
        .read_to_end(&mut out)
        .map_err(|e| decode_error("brotli", e))?;
    Ok(out)
}

fn decode_error(encoding: &str, cause: std::io::Error) -> Error {
    Error::new(ErrorKind::Transport {
        msg: format!("failed to decode {encoding} response body"),
        source: Some(Box::new(cause)),
    })
}

/// Reads the declared content length from a header map.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// A normalized response from whichever handler performed the exchange.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: String,
    url: Url,
    headers: HeaderMap,
    body: Body,
    websocket: Option<WebSocket>,
}

impl Response {
    /// Assembles a response. A missing reason phrase defaults from the
    /// standard status table.
    pub fn new(status: StatusCode, url: Url, headers: HeaderMap, body: Body) -> Self {
        let reason = status
            .canonical_reason()
            .unwrap_or("Unknown")
            .to_string();
        Response {
            status,
            reason,
            url,
            headers,
            body,
            websocket: None,
        }
    }

    /// Overrides the reason phrase with the one received on the wire.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Attaches a live WebSocket to a handshake response.
    pub fn with_websocket(mut self, websocket: WebSocket) -> Self {
        self.websocket = Some(websocket);
        self
    }

    /// The HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The final URL, after any redirects the handler followed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the body.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Reads and returns the remainder of the body.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        self.body.bytes().await
    }

    /// Closes the body, releasing the underlying connection.
    pub fn close(&mut self) {
        self.body.close();
    }

    /// Takes the live WebSocket from a handshake response, if present.
    pub fn into_websocket(self) -> Option<WebSocket> {
        self.websocket
    }
}
