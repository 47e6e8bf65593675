use derive_more::From;
use std::io;

/// DNS resolution errors.
///
/// These errors occur during DNS hostname resolution.
#[derive(From, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// DNS resolution failed for the given hostname.
    #[from(ignore)]
    ResolutionFailed(String),

    /// Invalid hostname provided.
    #[from(ignore)]
    InvalidHost(String),

    /// No addresses found for the given hostname.
    #[from(ignore)]
    NoAddressesFound(String),

    /// Resolution did not complete within the resolve timeout.
    #[from(ignore)]
    Timeout(String),

    /// I/O error during DNS resolution.
    #[from(ignore)]
    IoError(String),
}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        DnsError::IoError(err.to_string())
    }
}

impl std::error::Error for DnsError {}

impl core::fmt::Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolutionFailed(host) => {
                write!(f, "DNS resolution failed for host: {host}")
            }
            Self::InvalidHost(host) => {
                write!(f, "Invalid hostname: {host}")
            }
            Self::NoAddressesFound(host) => {
                write!(f, "No addresses found for host: {host}")
            }
            Self::Timeout(host) => {
                write!(f, "DNS resolution timed out for host: {host}")
            }
            Self::IoError(err) => {
                write!(f, "I/O error during DNS resolution: {err}")
            }
        }
    }
}

/// Errors produced while a client task moves a request through its
/// connector, session and response processor.
#[derive(From, Debug)]
pub enum ClientTaskError {
    /// The target hostname could not be resolved within budget.
    #[from]
    Resolution(DnsError),

    /// No resolved address accepted a connection within budget.
    #[from(ignore)]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// Send or receive failure on an established connection.
    #[from]
    Transport(io::Error),

    /// The peer answered with something that is not an HTTP/1.x response.
    #[from(ignore)]
    MalformedResponse(String),

    /// Reading the response body during processing failed.
    #[from(ignore)]
    BodyCopy(io::Error),

    /// The request body could not be rewound before a resend.
    #[from(ignore)]
    RewindFailed(io::Error),

    /// The request cannot be sent by this client (scheme, host, ...).
    #[from(ignore)]
    InvalidRequest(String),
}

impl ClientTaskError {
    /// Returns true for failures raised by the established stream itself.
    #[must_use]
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::MalformedResponse(_))
    }

    /// Returns true for failures raised while establishing a connection.
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Resolution(_) | Self::Connect { .. })
    }
}

impl std::error::Error for ClientTaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolution(err) => Some(err),
            Self::Transport(err) | Self::BodyCopy(err) | Self::RewindFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl core::fmt::Display for ClientTaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution(err) => write!(f, "DNS error: {err}"),
            Self::Connect { host, port, reason } => {
                write!(f, "Connection to {host}:{port} failed: {reason}")
            }
            Self::Transport(err) => write!(f, "Transport error: {err}"),
            Self::MalformedResponse(msg) => write!(f, "Malformed response: {msg}"),
            Self::BodyCopy(err) => write!(f, "Failed to copy response body: {err}"),
            Self::RewindFailed(err) => write!(f, "Failed to rewind request body: {err}"),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WHY: Verify DnsError::Timeout names the host that timed out
    /// WHAT: Tests the display output of a resolve timeout
    #[test]
    fn test_dns_error_timeout_display() {
        let error = DnsError::Timeout("example.com".to_string());
        let display = format!("{error}");
        assert!(display.contains("timed out"));
        assert!(display.contains("example.com"));
    }

    /// WHY: Verify io errors convert into DnsError as strings
    /// WHAT: Tests the manual From<io::Error> impl
    #[test]
    fn test_dns_error_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let dns_error = DnsError::from(io_error);
        assert!(format!("{dns_error}").contains("I/O error"));
    }

    /// WHY: `?` on io results inside the session must land in Transport
    /// WHAT: Tests the derived From<io::Error> for ClientTaskError
    #[test]
    fn test_io_error_becomes_transport_error() {
        let io_error = io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe");
        let error = ClientTaskError::from(io_error);
        assert!(error.is_transport_failure());
        assert!(!error.is_connect_failure());
        assert!(format!("{error}").contains("broken pipe"));
    }

    /// WHY: Resolution and connect failures are classified apart from transport ones
    /// WHAT: Tests the classification helpers
    #[test]
    fn test_connect_failures_are_classified() {
        let resolution = ClientTaskError::from(DnsError::NoAddressesFound("h".to_string()));
        let connect = ClientTaskError::Connect {
            host: "h".to_string(),
            port: 80,
            reason: "refused".to_string(),
        };

        assert!(resolution.is_connect_failure());
        assert!(connect.is_connect_failure());
        assert!(!connect.is_transport_failure());
        assert!(format!("{connect}").contains("h:80"));
    }

    /// WHY: Errors must plug into std error handling
    /// WHAT: Tests the source chain of wrapped errors
    #[test]
    fn test_errors_expose_sources() {
        use std::error::Error;

        let error = ClientTaskError::BodyCopy(io::Error::other("boom"));
        assert!(error.source().is_some());

        let error = ClientTaskError::InvalidRequest("https".to_string());
        assert!(error.source().is_none());
    }
}
