//! Test HTTP server implementation.
//!
//! WHY: Provides a real HTTP server for integration tests without external dependencies.
//! Built on stdlib TCP with hand-parsed requests and hand-crafted responses.
//!
//! WHAT: `TestHttpServer` listens on localhost, keeps connections open across
//! requests and asks a handler what to do with every request it reads.
//!
//! HOW: One accept thread plus one thread per connection. The handler sees the
//! request and its position (connection number, request number on that
//! connection) and returns a [`Reply`].

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type ReplyHandler = Arc<dyn Fn(&HttpRequest, Exchange) -> Reply + Send + Sync>;

/// Simple HTTP request representation for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request target (e.g., "/test?x=1")
    pub path: String,
    /// HTTP version (e.g., "HTTP/1.1")
    pub version: String,
    /// Request headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Body of the request, de-chunked
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Where a request sits: which accepted connection, and how many requests
/// that connection carried before it. Both start at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub connection: usize,
    pub request: usize,
}

/// What the server does with a request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Sends the response and keeps reading from the connection.
    Respond(HttpResponse),
    /// Sends the response, then closes the connection without telling the
    /// client, whatever the response headers claim.
    RespondAndClose(HttpResponse),
    /// Closes the connection without responding.
    Close,
}

/// Simple HTTP response representation for testing.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code (e.g., 200)
    pub status: u16,
    /// Status text (e.g., "OK")
    pub status_text: String,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create 200 OK response with body, advertising keep-alive.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body_bytes = body.into();
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("Content-Length".to_string(), body_bytes.len().to_string()),
                ("Connection".to_string(), "keep-alive".to_string()),
            ],
            body: body_bytes,
        }
    }

    /// Create custom status response with an empty body.
    #[must_use]
    pub fn status(code: u16, text: &str) -> Self {
        Self {
            status: code,
            status_text: text.to_string(),
            headers: vec![("Content-Length".to_string(), "0".to_string())],
            body: Vec::new(),
        }
    }

    /// Replaces any `Connection` header with `Connection: close`.
    #[must_use]
    pub fn closing(mut self) -> Self {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case("Connection"));
        self.headers
            .push(("Connection".to_string(), "close".to_string()));
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn announces_close(&self) -> bool {
        self.headers
            .iter()
            .any(|(key, value)| key.eq_ignore_ascii_case("Connection") && value.eq_ignore_ascii_case("close"))
    }

    /// Render response to HTTP/1.1 format.
    fn render(&self) -> Vec<u8> {
        let mut response = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);

        for (key, value) in &self.headers {
            response.push_str(&format!("{key}: {value}\r\n"));
        }

        response.push_str("\r\n");

        let mut bytes = response.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    closed: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

/// Test HTTP server for integration testing.
///
/// # Purpose (WHY)
///
/// Keep-alive and reconnect behaviour of HTTP clients needs a peer that holds
/// connections open and can drop them on cue.
///
/// # What it does
///
/// Starts a local HTTP server on a random port, serves requests on each
/// accepted connection until the client or a [`Reply`] closes it, and keeps
/// counts of connections and received requests for assertions.
///
/// # Examples
///
/// ```rust
/// use foundation_testing::http::TestHttpServer;
///
/// let server = TestHttpServer::start();
/// assert!(server.url("/test").ends_with("/test"));
///
/// // Server stops accepting when dropped
/// ```
pub struct TestHttpServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    state: Arc<ServerState>,
    _handle: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for TestHttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHttpServer")
            .field("addr", &self.addr)
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}

impl TestHttpServer {
    /// Start a server answering every request with a keep-alive 200 OK.
    #[must_use]
    pub fn start() -> Self {
        Self::with_handler(|_req, _exchange| Reply::Respond(HttpResponse::ok(b"OK")))
    }

    /// Start server with a custom reply handler.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use foundation_testing::http::{HttpResponse, Reply, TestHttpServer};
    ///
    /// // answer the first request on each connection, then hang up silently
    /// let server = TestHttpServer::with_handler(|_req, exchange| {
    ///     if exchange.request == 0 {
    ///         Reply::RespondAndClose(HttpResponse::ok(b"once"))
    ///     } else {
    ///         Reply::Close
    ///     }
    /// });
    /// # drop(server);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics when no localhost port can be bound.
    #[must_use]
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, Exchange) -> Reply + Send + Sync + 'static,
    {
        let listener =
            TcpListener::bind("127.0.0.1:0").expect("Failed to bind test HTTP server to localhost");
        let addr = listener
            .local_addr()
            .expect("bound listener has an address");

        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(ServerState::default());
        let handler: ReplyHandler = Arc::new(handler);

        let running_clone = Arc::clone(&running);
        let state_clone = Arc::clone(&state);

        let handle = thread::spawn(move || {
            // Set non-blocking so we can check running flag
            listener
                .set_nonblocking(true)
                .expect("Failed to set non-blocking");

            while running_clone.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, sock_addr)) => {
                        let connection = state_clone.connections.fetch_add(1, Ordering::SeqCst);
                        tracing::info!("Got client connection {connection}: {sock_addr:?}");

                        let handler = Arc::clone(&handler);
                        let state = Arc::clone(&state_clone);
                        thread::spawn(move || {
                            if let Err(e) = Self::serve_connection(stream, connection, &handler, &state) {
                                tracing::info!("TestHttpServer connection {connection} error: {e}");
                            }
                            state.closed.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        // No connection available, sleep briefly and check again
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        tracing::info!("TestHttpServer accept error: {e}");
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            running,
            state,
            _handle: Some(handle),
        }
    }

    /// Get full URL for a path on this test server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections the server has finished with, for whatever reason.
    #[must_use]
    pub fn closed_connections(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every request read so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if a connection thread panicked while recording.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.requests.lock().expect("request log poisoned").clone()
    }

    /// Blocks until `count` connections were closed, or `timeout` passes.
    /// Returns whether the count was reached.
    #[must_use]
    pub fn wait_for_closed(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.closed_connections() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.closed_connections() >= count
    }

    /// Serves requests on one connection until it should close.
    fn serve_connection(
        mut stream: TcpStream,
        connection: usize,
        handler: &ReplyHandler,
        state: &ServerState,
    ) -> io::Result<()> {
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut reader = BufReader::new(stream.try_clone()?);

        for request_index in 0.. {
            let Some(request) = read_request(&mut reader)? else {
                tracing::debug!("Connection {connection} closed by client");
                return Ok(());
            };
            tracing::info!(
                "Connection {connection} request {request_index}: {} {}",
                request.method,
                request.path
            );

            let client_closes = request
                .header("Connection")
                .is_some_and(|value| value.eq_ignore_ascii_case("close"));
            let reply = handler(
                &request,
                Exchange {
                    connection,
                    request: request_index,
                },
            );
            state
                .requests
                .lock()
                .map_err(|_| io::Error::other("request log poisoned"))?
                .push(request);

            match reply {
                Reply::Respond(response) => {
                    stream.write_all(&response.render())?;
                    stream.flush()?;
                    if client_closes || response.announces_close() {
                        return Ok(());
                    }
                }
                Reply::RespondAndClose(response) => {
                    stream.write_all(&response.render())?;
                    stream.flush()?;
                    return Ok(());
                }
                Reply::Close => return Ok(()),
            }
        }
        Ok(())
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        // Signal server thread to stop
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Reads one request; `None` when the client closed the connection first.
fn read_request(reader: &mut impl BufRead) -> io::Result<Option<HttpRequest>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }

    let mut parts = line.trim_end().splitn(3, ' ');
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad request line: {line:?}"),
        ));
    };

    let mut request = HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
        headers: Vec::new(),
        body: Vec::new(),
    };

    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside headers",
            ));
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            request
                .headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let chunked = request
        .header("Transfer-Encoding")
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    if chunked {
        request.body = read_chunked(reader)?;
    } else if let Some(length) = request.header("Content-Length") {
        let length: usize = length
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad Content-Length"))?;
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body)?;
        request.body = body;
    }

    Ok(Some(request))
}

fn read_chunked(reader: &mut impl BufRead) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line)?;
        let size_text = size_line.trim_end().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_text.trim(), 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad chunk size"))?;

        if size == 0 {
            // trailers up to the blank line
            loop {
                let mut trailer = String::new();
                if reader.read_line(&mut trailer)? == 0 || trailer.trim_end().is_empty() {
                    return Ok(body);
                }
            }
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..])?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
    }
}
