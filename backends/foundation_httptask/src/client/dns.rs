use crate::client::errors::DnsError;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Trait for DNS resolution.
///
/// Allows pluggable DNS resolvers for testing and customization.
pub trait DnsResolver: Send + Sync + Clone {
    /// Resolves a hostname and port to socket addresses.
    ///
    /// # Arguments
    ///
    /// * `host` - The hostname to resolve
    /// * `port` - The port number
    /// * `timeout` - Resolution budget, `None` waits as long as the system does
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if resolution fails or exceeds the budget.
    fn resolve(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, DnsError>;
}

/// StaticSocketAddr resolves every hostname to one fixed address.
///
/// Useful for testing scenarios where a specific IP address is required.
#[derive(Debug, Clone)]
pub struct StaticSocketAddr(SocketAddr);

impl Default for StaticSocketAddr {
    /// Returns the localhost address as default.
    fn default() -> Self {
        Self(SocketAddr::from(([127, 0, 0, 1], 80)))
    }
}

impl StaticSocketAddr {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl DnsResolver for StaticSocketAddr {
    fn resolve(
        &self,
        _host: &str,
        _port: u16,
        _timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, DnsError> {
        Ok(vec![self.0])
    }
}

/// System DNS resolver using `std::net::ToSocketAddrs`.
///
/// The system lookup cannot be cancelled, so a bounded lookup runs on a
/// helper thread and is abandoned once the budget is spent.
#[derive(Debug, Clone, Default)]
pub struct SystemDnsResolver;

impl SystemDnsResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn lookup(host: &str, port: u16) -> Result<Vec<SocketAddr>, DnsError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(DnsError::from)?
            .collect();

        if addrs.is_empty() {
            return Err(DnsError::NoAddressesFound(host.to_string()));
        }

        Ok(addrs)
    }
}

impl DnsResolver for SystemDnsResolver {
    fn resolve(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, DnsError> {
        if host.is_empty() {
            return Err(DnsError::InvalidHost(host.to_string()));
        }

        // literal addresses never need a lookup
        if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let Some(budget) = timeout else {
            return Self::lookup(host, port);
        };

        let (sender, receiver) = mpsc::channel();
        let target = host.to_string();
        thread::Builder::new()
            .name("dns-lookup".to_string())
            .spawn(move || {
                // the receiver may be gone once the budget is spent
                let _ = sender.send(Self::lookup(&target, port));
            })
            .map_err(DnsError::from)?;

        match receiver.recv_timeout(budget) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("DNS lookup for {host} exceeded {budget:?}");
                Err(DnsError::Timeout(host.to_string()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(DnsError::ResolutionFailed(host.to_string()))
            }
        }
    }
}

/// Mock DNS resolver for testing.
///
/// Allows configuring responses for specific hostnames and counts lookups.
#[derive(Debug, Clone)]
pub struct MockDnsResolver {
    responses: Arc<Mutex<HashMap<String, Result<Vec<SocketAddr>, DnsError>>>>,
    lookups: Arc<AtomicUsize>,
}

impl MockDnsResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configures a successful response for a hostname.
    #[must_use]
    pub fn with_response(self, host: &str, addrs: Vec<SocketAddr>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(host.to_string(), Ok(addrs));
        }
        self
    }

    /// Configures an error response for a hostname.
    #[must_use]
    pub fn with_error(self, host: &str, error: DnsError) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(host.to_string(), Err(error));
        }
        self
    }

    /// Number of `resolve` calls served so far, across clones.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for MockDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsResolver for MockDnsResolver {
    fn resolve(
        &self,
        host: &str,
        _port: u16,
        _timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, DnsError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let responses = self
            .responses
            .lock()
            .map_err(|_| DnsError::ResolutionFailed("lock poisoned".to_string()))?;

        responses
            .get(host)
            .cloned()
            .unwrap_or_else(|| Err(DnsError::NoAddressesFound(host.to_string())))
    }
}
