// Shared test helpers: a raw-socket HTTP server with byte-exact responses.
//
// Tests exercise redirect chains, error statuses, truncated bodies, and
// compressed payloads, all of which need precise control over the bytes on
// the wire; a hand-rolled server over TcpListener provides that control.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One parsed request as the test server saw it.
#[allow(dead_code)] // Used by other test files
pub struct RawRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl RawRequest {
    /// First header value with the given (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request path without any query string.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

/// A running test server.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Starts a server; `responder` maps each request to raw response bytes.
#[allow(dead_code)]
pub async fn start(
    responder: impl Fn(&RawRequest) -> Vec<u8> + Send + Sync + 'static,
) -> TestServer {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("failed to get test server address");
    let responder = Arc::new(responder);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let responder = responder.clone();
            tokio::spawn(async move {
                serve_connection(stream, responder).await;
            });
        }
    });

    TestServer { addr }
}

async fn serve_connection(
    mut stream: TcpStream,
    responder: Arc<dyn Fn(&RawRequest) -> Vec<u8> + Send + Sync>,
) {
    // Responses carry Connection: close, so one request per connection.
    if let Some(request) = read_request(&mut stream).await {
        let response = responder(&request);
        let _ = stream.write_all(&response).await;
        let _ = stream.shutdown().await;
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RawRequest> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if buf.len() > 64 * 1024 {
            return None;
        }
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => buf.push(byte[0]),
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 && stream.read_exact(&mut body).await.is_err() {
        return None;
    }

    Some(RawRequest {
        method,
        target,
        headers,
        body,
    })
}

/// Builds a complete response with an accurate Content-Length.
#[allow(dead_code)]
pub fn response(status: u16, reason: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(body);
    out
}

/// Builds a response that declares `declared_length` but carries only
/// `body`; the connection then closes short.
#[allow(dead_code)]
pub fn truncated_response(status: u16, declared_length: usize, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status} OK\r\nContent-Length: {declared_length}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// A 30x redirect to `location`.
#[allow(dead_code)]
pub fn redirect_response(status: u16, location: &str) -> Vec<u8> {
    response(
        status,
        "Redirect",
        &[("Location", location)],
        b"",
    )
}

/// Echoes the request head so tests can assert on what was sent.
#[allow(dead_code)]
pub fn echo_headers_response(request: &RawRequest) -> Vec<u8> {
    let mut body = format!("{} {}\r\n", request.method, request.target).into_bytes();
    for (name, value) in &request.headers {
        body.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    response(200, "OK", &[("Content-Type", "text/plain")], &body)
}

/// Gzip-compresses a payload.
#[allow(dead_code)]
pub fn gzip(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}
