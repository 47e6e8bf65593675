//! HTTP/1.x message model used by the client task.
//!
//! Deliberately small: enough to describe a request, render it and
//! interpret the head of the response that comes back.

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use url::Url;

use crate::client::body::BodyFraming;
use crate::client::errors::ClientTaskError;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }

    /// Methods for which servers expect a `Content-Length` even without a body.
    fn expects_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HTTP/1.0" => Some(Self::Http10),
            "HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

/// Ordered header list with case-insensitive lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a value, keeping any existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when a comma separated token list under `name` holds `token`.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Body sources that can be rewound.
pub trait SeekableSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableSource for T {}

/// Request body; seekability is decided once, at construction.
pub enum RequestBody {
    /// Rewindable body of known length.
    Seekable {
        source: Box<dyn SeekableSource>,
        length: u64,
    },
    /// Forward-only body; sent chunked when no length is declared.
    Streaming {
        source: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seekable { length, .. } => f
                .debug_struct("RequestBody::Seekable")
                .field("length", length)
                .finish_non_exhaustive(),
            Self::Streaming { length, .. } => f
                .debug_struct("RequestBody::Streaming")
                .field("length", length)
                .finish_non_exhaustive(),
        }
    }
}

impl RequestBody {
    /// In-memory body.
    #[must_use]
    pub fn bytes(content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let length = content.len() as u64;
        Self::Seekable {
            source: Box::new(Cursor::new(content)),
            length,
        }
    }

    /// Wraps a seekable source, measuring it from offset 0 and leaving it rewound.
    ///
    /// # Errors
    ///
    /// Returns the seek error when the source cannot be measured or rewound.
    pub fn seekable<T: Read + Seek + Send + 'static>(mut source: T) -> io::Result<Self> {
        let length = source.seek(SeekFrom::End(0))?;
        source.rewind()?;
        Ok(Self::Seekable {
            source: Box::new(source),
            length,
        })
    }

    /// Wraps a forward-only source.
    pub fn streaming<T: Read + Send + 'static>(source: T, length: Option<u64>) -> Self {
        Self::Streaming {
            source: Box::new(source),
            length,
        }
    }

    #[must_use]
    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Seekable { .. })
    }

    /// Declared length; `None` means the body is sent chunked.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        match self {
            Self::Seekable { length, .. } => Some(*length),
            Self::Streaming { length, .. } => *length,
        }
    }

    /// Moves a seekable body back to offset 0.
    ///
    /// # Errors
    ///
    /// Streaming bodies answer with [`io::ErrorKind::Unsupported`].
    pub fn rewind(&mut self) -> io::Result<()> {
        match self {
            Self::Seekable { source, .. } => source.seek(SeekFrom::Start(0)).map(|_| ()),
            Self::Streaming { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "streaming request body cannot be rewound",
            )),
        }
    }

    pub fn reader(&mut self) -> &mut dyn Read {
        match self {
            Self::Seekable { source, .. } => source,
            Self::Streaming { source, .. } => source,
        }
    }
}

/// An outgoing request.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Option<RequestBody>,
}

impl Request {
    /// Builds a request for an absolute `http://` URL.
    ///
    /// # Errors
    ///
    /// [`ClientTaskError::InvalidRequest`] when the URL does not parse, is
    /// not `http` or has no host.
    pub fn new(method: Method, url: &str) -> Result<Self, ClientTaskError> {
        let url = Url::parse(url)
            .map_err(|err| ClientTaskError::InvalidRequest(format!("{url}: {err}")))?;
        Self::from_url(method, url)
    }

    /// Builds a request from an already parsed URL.
    ///
    /// # Errors
    ///
    /// See [`Request::new`].
    pub fn from_url(method: Method, url: Url) -> Result<Self, ClientTaskError> {
        if url.scheme() != "http" {
            return Err(ClientTaskError::InvalidRequest(format!(
                "unsupported scheme {} (only http is supported)",
                url.scheme()
            )));
        }
        if !url.host_str().is_some_and(|host| !host.is_empty()) {
            return Err(ClientTaskError::InvalidRequest(format!("{url}: missing host")));
        }

        Ok(Self {
            method,
            url,
            headers: Headers::new(),
            body: None,
        })
    }

    /// Shorthand for a `GET` request.
    ///
    /// # Errors
    ///
    /// See [`Request::new`].
    pub fn get(url: &str) -> Result<Self, ClientTaskError> {
        Self::new(Method::Get, url)
    }

    /// Shorthand for a `POST` request carrying `body`.
    ///
    /// # Errors
    ///
    /// See [`Request::new`].
    pub fn post(url: &str, body: RequestBody) -> Result<Self, ClientTaskError> {
        Ok(Self::new(Method::Post, url)?.with_body(body))
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut RequestBody> {
        self.body.as_mut()
    }

    /// True when a body is present that cannot be rewound for a resend.
    #[must_use]
    pub fn has_unrewindable_body(&self) -> bool {
        self.body.as_ref().is_some_and(|body| !body.is_seekable())
    }

    /// The (host, port) identity this request must be sent to.
    #[must_use]
    pub fn target(&self) -> (String, u16) {
        let host = self.url.host_str().unwrap_or_default().to_string();
        let port = self.url.port_or_known_default().unwrap_or(80);
        (host, port)
    }

    /// Value of the `Host` header.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Origin-form target placed on the request line.
    #[must_use]
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    pub(crate) fn needs_empty_content_length(&self) -> bool {
        self.body.is_none() && self.method.expects_body()
    }
}

/// Status line and headers of a response, with the body framing they imply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub framing: BodyFraming,
}

impl ResponseHead {
    /// Whether the peer intends to keep the connection open.
    ///
    /// HTTP/1.1 keeps connections alive unless `Connection: close` is sent;
    /// HTTP/1.0 only does with an explicit `Connection: keep-alive`. After a
    /// `101 Switching Protocols` the connection no longer speaks HTTP.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        if self.status == 101 {
            return false;
        }
        match self.version {
            Version::Http11 => !self.headers.has_token("Connection", "close"),
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
        }
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            BodyFraming::Length(length) => Some(length),
            BodyFraming::Empty => Some(0),
            BodyFraming::Chunked | BodyFraming::UntilClose => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(version: Version, headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead {
            version,
            status: 200,
            reason: "OK".to_string(),
            headers: headers.iter().copied().collect(),
            framing: BodyFraming::Length(0),
        }
    }

    /// WHY: HTTP/1.1 connections persist by default
    /// WHAT: Tests Connection: close tokens end keep-alive
    #[test]
    fn test_http11_is_keep_alive_unless_closed() {
        assert!(head(Version::Http11, &[]).is_keep_alive());
        assert!(!head(Version::Http11, &[("connection", "Close")]).is_keep_alive());
        assert!(!head(Version::Http11, &[("Connection", "upgrade, close")]).is_keep_alive());
    }

    /// WHY: An upgraded connection carries another protocol afterwards
    /// WHAT: Tests a 101 response is never keep-alive
    #[test]
    fn test_switching_protocols_is_not_keep_alive() {
        let mut upgraded = head(
            Version::Http11,
            &[("Upgrade", "websocket"), ("Connection", "Upgrade")],
        );
        upgraded.status = 101;
        upgraded.framing = BodyFraming::Empty;
        assert!(!upgraded.is_keep_alive());
    }

    /// WHY: HTTP/1.0 connections close by default
    /// WHAT: Tests only an explicit keep-alive token persists
    #[test]
    fn test_http10_needs_explicit_keep_alive() {
        assert!(!head(Version::Http10, &[]).is_keep_alive());
        assert!(head(Version::Http10, &[("Connection", "Keep-Alive")]).is_keep_alive());
    }

    /// WHY: Header names are case-insensitive on the wire
    /// WHAT: Tests lookups, multi-values and insert
    #[test]
    fn test_headers_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        headers.append("x-trace", "a");
        headers.append("X-Trace", "b");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get_all("X-TRACE").collect::<Vec<_>>(), vec!["a", "b"]);

        headers.insert("x-trace", "c");
        assert_eq!(headers.get_all("x-trace").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(headers.len(), 2);
    }

    /// WHY: Only plain http targets can be sent
    /// WHAT: Tests https and unparsable URLs are InvalidRequest
    #[test]
    fn test_request_rejects_unsupported_targets() {
        assert!(matches!(
            Request::get("https://example.com/"),
            Err(ClientTaskError::InvalidRequest(_))
        ));
        assert!(matches!(
            Request::get("not a url"),
            Err(ClientTaskError::InvalidRequest(_))
        ));
    }

    /// WHY: The connector identity and request line come from the URL
    /// WHAT: Tests target, Host header and origin-form
    #[test]
    fn test_request_exposes_target_and_origin_form() {
        let request = Request::get("http://media.local:8080/notify?event=play").unwrap();
        assert_eq!(request.target(), ("media.local".to_string(), 8080));
        assert_eq!(request.host_header(), "media.local:8080");
        assert_eq!(request.request_target(), "/notify?event=play");

        let request = Request::get("http://media.local").unwrap();
        assert_eq!(request.target(), ("media.local".to_string(), 80));
        assert_eq!(request.host_header(), "media.local");
        assert_eq!(request.request_target(), "/");
    }

    /// WHY: Retries resend the body from its start
    /// WHAT: Tests measuring from offset 0 and rewinding
    #[test]
    fn test_seekable_body_measures_and_rewinds() {
        let mut source = Cursor::new(b"hello world".to_vec());
        source.set_position(6);

        let mut body = RequestBody::seekable(source).expect("cursor is seekable");
        assert!(body.is_seekable());
        assert_eq!(body.length(), Some(11));

        let mut first = String::new();
        body.reader().read_to_string(&mut first).unwrap();
        assert_eq!(first, "hello world");

        body.rewind().expect("should rewind");
        let mut again = String::new();
        body.reader().read_to_string(&mut again).unwrap();
        assert_eq!(again, "hello world");
    }

    /// WHY: Forward-only bodies must never be resent
    /// WHAT: Tests rewind is Unsupported and the request reports it
    #[test]
    fn test_streaming_body_refuses_to_rewind() {
        let mut body = RequestBody::streaming(io::empty(), None);
        assert!(!body.is_seekable());
        assert_eq!(body.length(), None);
        assert_eq!(body.rewind().unwrap_err().kind(), io::ErrorKind::Unsupported);

        let request = Request::post("http://media.local/", body).unwrap();
        assert!(request.has_unrewindable_body());
    }
}
