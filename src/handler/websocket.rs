//! WebSocket handler built on tokio-tungstenite.
//!
//! Performs the `ws`/`wss` handshake and returns the switching-protocols
//! response with the live socket attached; callers take the socket off the
//! response with [`Response::into_websocket`].
//!
//! [`Response::into_websocket`]: crate::response::Response::into_websocket

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::BrokerConfig;
use crate::error::{Error, ErrorKind};
use crate::handler::{negotiate, Extension, Feature, RequestHandler};
use crate::request::Request;
use crate::response::{Body, Response};

const SCHEMES: &[&str] = &["ws", "wss"];
const PROXY_SCHEMES: &[&str] = &[];
const FEATURES: &[Feature] = &[];
const EXTENSIONS: &[Extension] = &[Extension::CookieJar];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live WebSocket connection produced by a successful handshake.
pub struct WebSocket {
    stream: Mutex<WsStream>,
}

impl WebSocket {
    fn new(stream: WsStream) -> Self {
        WebSocket {
            stream: Mutex::new(stream),
        }
    }

    /// Sends a text message.
    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.send(Message::text(text)).await
    }

    /// Sends a binary message.
    pub async fn send_binary(&self, data: Bytes) -> Result<(), Error> {
        self.send(Message::binary(data)).await
    }

    async fn send(&self, message: Message) -> Result<(), Error> {
        self.stream
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| classify_ws_error(e, "failed to send WebSocket message"))
    }

    /// Receives the next message, or `None` once the peer closes.
    pub async fn recv(&self) -> Result<Option<Message>, Error> {
        match self.stream.lock().await.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(classify_ws_error(e, "failed to receive WebSocket message")),
            None => Ok(None),
        }
    }

    /// Sends a close frame and drains the close handshake.
    pub async fn close(&self) -> Result<(), Error> {
        self.stream
            .lock()
            .await
            .close(None)
            .await
            .map_err(|e| classify_ws_error(e, "failed to close WebSocket"))
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebSocket")
    }
}

/// The tokio-tungstenite request handler.
pub struct WebSocketHandler {
    config: Arc<BrokerConfig>,
    tls: Arc<rustls::ClientConfig>,
}

impl WebSocketHandler {
    /// Creates a handler sharing the broker's configuration and TLS setup.
    pub fn new(config: Arc<BrokerConfig>, tls: Arc<rustls::ClientConfig>) -> Self {
        WebSocketHandler { config, tls }
    }
}

#[async_trait]
impl RequestHandler for WebSocketHandler {
    fn name(&self) -> &str {
        "websocket"
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
        let url = request.url().clone();
        let mut handshake = url.as_str().into_client_request().map_err(|e| {
            Error::new(ErrorKind::Request {
                msg: format!("{url} is not a valid WebSocket target"),
                source: Some(Box::new(e)),
            })
        })?;
        for (name, value) in request.headers() {
            handshake.headers_mut().insert(name.clone(), value.clone());
        }

        let timeout = request
            .timeout()
            .unwrap_or(self.config.socket_timeout);
        let connect = connect_async_tls_with_config(
            handshake,
            None,
            false,
            Some(Connector::Rustls(self.tls.clone())),
        );

        let (stream, response) = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(established)) => established,
            Ok(Err(tokio_tungstenite::tungstenite::Error::Http(rejection))) => {
                return Err(adapt_rejection(&url, rejection))
            }
            Ok(Err(e)) => return Err(classify_ws_error(e, "WebSocket handshake failed")),
            Err(_) => {
                return Err(Error::new(ErrorKind::Transport {
                    msg: format!(
                        "WebSocket handshake timed out after {:.1}s",
                        timeout.as_secs_f64()
                    ),
                    source: None,
                }))
            }
        };

        let headers = response.headers().clone();
        let normalized = Response::new(response.status(), url, headers, Body::empty())
            .with_websocket(WebSocket::new(stream));
        Ok(normalized)
    }
}

/// Converts a non-101 handshake response into the HTTP error carrying it.
fn adapt_rejection<B: AsRef<[u8]>>(
    url: &Url,
    rejection: http::Response<Option<B>>,
) -> Error {
    let status = rejection.status();
    let headers = rejection.headers().clone();
    let body = match rejection.into_body() {
        Some(bytes) => Body::from_bytes(bytes.as_ref().to_vec()),
        None => Body::empty(),
    };
    Error::new(ErrorKind::Http {
        response: Box::new(Response::new(status, url.clone(), headers, body)),
        redirect_loop: false,
    })
}

/// Maps a tungstenite failure onto the normalized taxonomy.
fn classify_ws_error(e: tokio_tungstenite::tungstenite::Error, context: &str) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::Http(response) => {
            // Rejected handshakes are adapted where the target URL is known;
            // this fallback only fires on post-handshake traffic.
            Error::new(ErrorKind::Request {
                msg: format!("{context}: HTTP {}", response.status()),
                source: None,
            })
        }
        WsError::Tls(tls) => Error::new(ErrorKind::Ssl {
            msg: tls.to_string(),
            source: Some(Box::new(tls)),
        }),
        WsError::Io(io) => Error::new(ErrorKind::Transport {
            msg: format!("{context}: {io}"),
            source: Some(Box::new(io)),
        }),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            Error::new(ErrorKind::Transport {
                msg: format!("{context}: connection is closed"),
                source: None,
            })
        }
        other => Error::new(ErrorKind::Request {
            msg: format!("{context}: {other}"),
            source: Some(Box::new(other)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_handler_declares_ws_schemes_only() {
        let config = Arc::new(BrokerConfig::default());
        let tls = crate::tls::build_tls_config(&config.tls_options()).unwrap();
        let handler = WebSocketHandler::new(config, tls);
        assert_eq!(handler.supported_schemes(), &["ws", "wss"]);
        assert!(handler.supported_proxy_schemes().is_empty());
    }
}
