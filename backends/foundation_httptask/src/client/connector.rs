//! Transport connector caching one connection per (host, port).
//!
//! WHY: Keep-alive reuse needs somewhere to park an open connection between
//! requests, and something that knows which server it belongs to.
//!
//! WHAT: [`TransportConnector`] resolves, dials and caches a [`Connection`]
//! for a single identity. Asking again for the same identity hands back the
//! cached connection without probing it; asking for another identity drops
//! the cached one first.
//!
//! HOW: The connector never retries on its own. Callers that lose trust in a
//! connection replace the whole connector rather than resetting it.

use std::io::{self, BufReader};
use std::time::Duration;

use crate::client::dns::DnsResolver;
use crate::client::errors::ClientTaskError;
use crate::client::transport::{Dialer, SocketInfo, TransportStream};

/// Independent budgets used while establishing and using a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectTimeouts {
    /// Budget for the transport handshake.
    pub connect: Option<Duration>,
    /// Read/write deadline on the established stream.
    pub io: Option<Duration>,
    /// Budget for hostname resolution.
    pub resolve: Option<Duration>,
}

/// An established connection: buffered input over the stream, with the raw
/// stream as output.
#[derive(Debug)]
pub struct Connection<S> {
    input: BufReader<S>,
    info: SocketInfo,
}

impl<S: TransportStream> Connection<S> {
    #[must_use]
    pub fn new(stream: S) -> Self {
        let info = stream.socket_info();
        Self {
            input: BufReader::new(stream),
            info,
        }
    }

    /// Input side; responses are parsed from here.
    pub fn input(&mut self) -> &mut BufReader<S> {
        &mut self.input
    }

    /// Output side; requests are written here.
    pub fn output(&mut self) -> &mut S {
        self.input.get_mut()
    }

    #[must_use]
    pub fn info(&self) -> SocketInfo {
        self.info
    }
}

/// Connects to and caches a single (host, port) identity.
#[derive(Debug)]
pub struct TransportConnector<R, D: Dialer> {
    resolver: R,
    dialer: D,
    identity: Option<(String, u16)>,
    connection: Option<Connection<D::Stream>>,
    connects: usize,
}

impl<R: DnsResolver, D: Dialer> TransportConnector<R, D> {
    pub fn new(resolver: R, dialer: D) -> Self {
        Self {
            resolver,
            dialer,
            identity: None,
            connection: None,
            connects: 0,
        }
    }

    /// Returns true when a connection to `host:port` is cached.
    #[must_use]
    pub fn is_bound_to(&self, host: &str, port: u16) -> bool {
        self.connection.is_some()
            && self
                .identity
                .as_ref()
                .is_some_and(|(cached_host, cached_port)| cached_host == host && *cached_port == port)
    }

    #[must_use]
    pub fn identity(&self) -> Option<(&str, u16)> {
        self.identity
            .as_ref()
            .map(|(host, port)| (host.as_str(), *port))
    }

    /// Socket info of the cached connection, empty when nothing is cached.
    #[must_use]
    pub fn socket_info(&self) -> SocketInfo {
        self.connection
            .as_ref()
            .map(Connection::info)
            .unwrap_or_default()
    }

    /// Number of connections this connector has established.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects
    }

    /// The cached connection, if any.
    pub fn connection(&mut self) -> Option<&mut Connection<D::Stream>> {
        self.connection.as_mut()
    }

    /// Returns the connection for `host:port`, establishing one if the
    /// cached identity differs or nothing is cached.
    ///
    /// # Errors
    ///
    /// - [`ClientTaskError::Resolution`] when `host` cannot be resolved in budget
    /// - [`ClientTaskError::Connect`] when no resolved address accepts in budget
    /// - [`ClientTaskError::Transport`] when deadlines cannot be applied
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeouts: &ConnectTimeouts,
    ) -> Result<&mut Connection<D::Stream>, ClientTaskError> {
        if !self.is_bound_to(host, port) {
            self.establish(host, port, timeouts)?;
        }

        self.connection.as_mut().ok_or_else(|| {
            ClientTaskError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no connection cached for {host}:{port}"),
            ))
        })
    }

    fn establish(
        &mut self,
        host: &str,
        port: u16,
        timeouts: &ConnectTimeouts,
    ) -> Result<(), ClientTaskError> {
        if let Some((old_host, old_port)) = self.identity.take() {
            tracing::debug!("Dropping cached connection to {old_host}:{old_port} for {host}:{port}");
        }
        self.connection = None;

        let addrs = self.resolver.resolve(host, port, timeouts.resolve)?;
        if addrs.is_empty() {
            return Err(ClientTaskError::Connect {
                host: host.to_string(),
                port,
                reason: "no addresses resolved".to_string(),
            });
        }

        let mut last_error = None;
        for addr in addrs {
            tracing::debug!("Connecting to {host}:{port} via {addr}");
            match self.dialer.dial(addr, timeouts.connect) {
                Ok(stream) => {
                    stream.set_io_timeout(timeouts.io)?;
                    let connection = Connection::new(stream);
                    tracing::debug!("Connected to {host}:{port}: {:?}", connection.info());

                    self.connects += 1;
                    self.identity = Some((host.to_string(), port));
                    self.connection = Some(connection);
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!("Connection attempt to {addr} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(ClientTaskError::Connect {
            host: host.to_string(),
            port,
            reason: last_error.map_or_else(|| "no address accepted".to_string(), |e| e.to_string()),
        })
    }
}
