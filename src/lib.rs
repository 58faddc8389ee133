//! request_broker: pluggable request dispatch across interchangeable
//! transport backends.
//!
//! Callers build a [`Request`] and hand it to a [`RequestDirector`]; the
//! director ranks its registered handlers, negotiates capability with each
//! in turn, and returns the first successful [`Response`]. Handlers wrap
//! heterogeneous transports (a connection-level hyper backend, a pooled
//! reqwest backend, a WebSocket backend) behind one contract, with proxy
//! selection, redirect-method policy, and error classification behaving
//! identically no matter which backend performs the I/O.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use request_broker::{BrokerConfig, RequestDirector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(BrokerConfig::default());
//! let director = RequestDirector::with_default_handlers(config)?;
//!
//! let mut response = director.send("https://example.com/").await?;
//! println!("{} via {}", response.status(), response.url());
//! let body = response.bytes().await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! All I/O runs on the Tokio runtime; call [`RequestDirector::send`] from
//! within an async context.

#![warn(missing_docs)]

pub mod config;
pub mod cookies;
pub mod director;
pub mod error;
pub mod handler;
pub mod policy;
pub mod request;
pub mod response;
pub mod socks;
pub mod tls;

pub use config::BrokerConfig;
pub use cookies::{CookieJar, MemoryCookieJar};
pub use director::{IntoRequest, RequestDirector};
pub use error::{Error, ErrorClass, ErrorKind, ErrorStats, Rejection};
pub use handler::{
    Extension, Feature, HyperHandler, RequestHandler, ReqwestHandler, UnsupportedHandler,
    WebSocket, WebSocketHandler,
};
pub use policy::{redirect_method, select_proxy, ProxyMap};
pub use request::{Request, RequestBody, RequestExtensions};
pub use response::{Body, Response};
pub use socks::{SocksConnector, SocksProxyOptions, SocksProxyType};
pub use tls::{build_tls_config, TlsOptions};
