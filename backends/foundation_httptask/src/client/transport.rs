//! Byte-stream transports the connector dials.
//!
//! WHY: The connector must not care whether it talks to a kernel socket or a
//! scripted in-memory peer; retry behaviour is only testable deterministically
//! with the latter.
//!
//! WHAT: [`TransportStream`] (read/write with deadlines and address query),
//! [`Dialer`] (opens a stream to one socket address within a budget),
//! [`TcpDialer`] for real sockets and [`MemoryDialer`] for tests.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Local and remote addresses of an established transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketInfo {
    pub local_address: Option<SocketAddr>,
    pub remote_address: Option<SocketAddr>,
}

/// A connected, bidirectional byte stream.
pub trait TransportStream: Read + Write + Send {
    /// Applies `timeout` as both read and write deadline, `None` clears them.
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn socket_info(&self) -> SocketInfo;
}

/// Opens transport streams.
pub trait Dialer: Send + Clone {
    type Stream: TransportStream + 'static;

    /// Connects to `addr`, giving up after `timeout` when one is provided.
    fn dial(&self, addr: SocketAddr, timeout: Option<Duration>) -> io::Result<Self::Stream>;
}

impl TransportStream for TcpStream {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn socket_info(&self) -> SocketInfo {
        SocketInfo {
            local_address: self.local_addr().ok(),
            remote_address: self.peer_addr().ok(),
        }
    }
}

/// Dials plain TCP connections.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn dial(&self, addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let stream = match timeout {
            Some(budget) => TcpStream::connect_timeout(&addr, budget)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Behaviour of one connection handed out by a [`MemoryDialer`].
#[derive(Debug, Clone)]
pub enum ConnectionScript {
    /// The dial attempt itself is refused.
    Refuse,
    /// Accepts writes and serves these bytes to reads, then reports end-of-stream.
    Serve(Vec<u8>),
    /// Every write fails with a broken pipe, as a peer that already went away.
    Broken,
}

#[derive(Debug, Default)]
struct MemoryDialerState {
    scripts: VecDeque<ConnectionScript>,
    dialed: Vec<SocketAddr>,
    written: Vec<Arc<Mutex<Vec<u8>>>>,
}

/// Scripted in-memory dialer for tests.
///
/// Each successful dial consumes the next [`ConnectionScript`]; once the
/// scripts run out further dials are refused. Every byte written on a
/// connection is captured and can be inspected with [`MemoryDialer::written`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDialer {
    state: Arc<Mutex<MemoryDialerState>>,
}

impl MemoryDialer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the behaviour of the next dialed connection.
    #[must_use]
    pub fn with_connection(self, script: ConnectionScript) -> Self {
        self.push_connection(script);
        self
    }

    pub fn push_connection(&self, script: ConnectionScript) {
        if let Ok(mut state) = self.state.lock() {
            state.scripts.push_back(script);
        }
    }

    /// Number of dial attempts made so far, refused ones included.
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.state.lock().map(|state| state.dialed.len()).unwrap_or(0)
    }

    /// Addresses dialed so far in order.
    #[must_use]
    pub fn dialed(&self) -> Vec<SocketAddr> {
        self.state
            .lock()
            .map(|state| state.dialed.clone())
            .unwrap_or_default()
    }

    /// Bytes written on every opened connection, in dial order.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .written
            .iter()
            .map(|buffer| buffer.lock().map(|b| b.clone()).unwrap_or_default())
            .collect()
    }
}

impl Dialer for MemoryDialer {
    type Stream = MemoryStream;

    fn dial(&self, addr: SocketAddr, _timeout: Option<Duration>) -> io::Result<MemoryStream> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("memory dialer lock poisoned"))?;

        state.dialed.push(addr);
        let script = state.scripts.pop_front().unwrap_or(ConnectionScript::Refuse);

        let (input, broken) = match script {
            ConnectionScript::Refuse => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no scripted connection for {addr}"),
                ));
            }
            ConnectionScript::Serve(bytes) => (bytes, false),
            ConnectionScript::Broken => (Vec::new(), true),
        };

        let written = Arc::new(Mutex::new(Vec::new()));
        state.written.push(written.clone());

        let local_port = 40_000 + u16::try_from(state.written.len()).unwrap_or(0);
        Ok(MemoryStream {
            input: Cursor::new(input),
            written,
            broken,
            info: SocketInfo {
                local_address: Some(SocketAddr::from(([127, 0, 0, 1], local_port))),
                remote_address: Some(addr),
            },
        })
    }
}

/// Stream handed out by [`MemoryDialer`].
#[derive(Debug)]
pub struct MemoryStream {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    broken: bool,
    info: SocketInfo,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer closed the connection",
            ));
        }
        let mut written = self
            .written
            .lock()
            .map_err(|_| io::Error::other("memory stream lock poisoned"))?;
        written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportStream for MemoryStream {
    fn set_io_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn socket_info(&self) -> SocketInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn target() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8080))
    }

    /// WHY: Exhausted scripts must look like a refused connection
    /// WHAT: Tests that dialing without scripts fails with ConnectionRefused
    #[test]
    fn test_memory_dialer_refuses_without_script() {
        let dialer = MemoryDialer::new();
        let err = dialer.dial(target(), None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(dialer.dial_count(), 1);
    }

    /// WHY: Scripted connections serve canned bytes and capture writes
    /// WHAT: Tests read/write behaviour and the captured output
    #[test]
    fn test_memory_dialer_serves_and_captures() {
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(b"pong".to_vec()))
            .with_connection(ConnectionScript::Broken);

        let mut first = dialer.dial(target(), None).expect("first dial");
        first.write_all(b"ping").unwrap();
        let mut reply = String::new();
        first.read_to_string(&mut reply).unwrap();
        assert_eq!(reply, "pong");
        assert_eq!(first.socket_info().remote_address, Some(target()));

        let mut second = dialer.dial(target(), None).expect("second dial");
        let err = second.write_all(b"ping").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        assert_eq!(dialer.written(), vec![b"ping".to_vec(), Vec::new()]);
        assert_eq!(dialer.dialed(), vec![target(), target()]);
    }

    /// WHY: The TCP dialer is the production path
    /// WHAT: Tests dialing a local listener and reading socket info
    #[test]
    fn test_tcp_dialer_connects_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = TcpDialer
            .dial(addr, Some(Duration::from_secs(2)))
            .expect("should connect");
        stream
            .set_io_timeout(Some(Duration::from_millis(500)))
            .expect("should set deadlines");

        let info = stream.socket_info();
        assert_eq!(info.remote_address, Some(addr));
        assert!(info.local_address.is_some());
    }
}
