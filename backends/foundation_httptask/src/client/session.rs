//! HTTP/1.1 client session: writes one request onto a connector's
//! connection and reads back the response head.

use std::io::{self, BufRead, Read, Write};

use crate::client::body::{read_line, BodyFraming, Response};
use crate::client::connector::{ConnectTimeouts, TransportConnector};
use crate::client::dns::DnsResolver;
use crate::client::errors::ClientTaskError;
use crate::client::message::{Headers, Method, Request, ResponseHead, Version};
use crate::client::transport::Dialer;
use crate::config::ClientTaskConfig;

const MAX_HEADERS: usize = 100;
const CHUNK_SIZE: usize = 8 * 1024;

/// Sends requests over whatever connection a connector hands it.
///
/// The session holds no connection state of its own; everything that
/// outlives a request lives in the [`TransportConnector`].
#[derive(Debug, Clone)]
pub struct HttpClientSession {
    user_agent: String,
    timeouts: ConnectTimeouts,
}

impl HttpClientSession {
    #[must_use]
    pub fn new(config: &ClientTaskConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeouts: config.timeouts(),
        }
    }

    #[must_use]
    pub fn timeouts(&self) -> &ConnectTimeouts {
        &self.timeouts
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Sends `request` and returns the response, whose body is still
    /// unread on the connector's connection.
    ///
    /// # Errors
    ///
    /// Connect failures from the connector, [`ClientTaskError::Transport`]
    /// on send or receive failures and [`ClientTaskError::MalformedResponse`]
    /// when the peer does not speak HTTP/1.x.
    pub fn send<'c, R, D>(
        &self,
        request: &mut Request,
        connector: &'c mut TransportConnector<R, D>,
    ) -> Result<Response<'c>, ClientTaskError>
    where
        R: DnsResolver,
        D: Dialer,
    {
        let head = self.exchange(request, connector)?;
        attach(head, connector)
    }

    /// Writes the request and parses the response head, leaving the body on
    /// the connection.
    pub(crate) fn exchange<R, D>(
        &self,
        request: &mut Request,
        connector: &mut TransportConnector<R, D>,
    ) -> Result<ResponseHead, ClientTaskError>
    where
        R: DnsResolver,
        D: Dialer,
    {
        let (host, port) = request.target();
        let connection = connector.connect(&host, port, &self.timeouts)?;

        tracing::debug!(
            "Sending {} {} via {:?}",
            request.method(),
            request.url(),
            connection.info()
        );
        self.write_request(request, connection.output())?;

        read_head(connection.input(), request.method())
    }

    fn write_request(&self, request: &mut Request, output: &mut dyn Write) -> io::Result<()> {
        let mut head = String::with_capacity(256);
        head.push_str(&format!(
            "{} {} HTTP/1.1\r\n",
            request.method(),
            request.request_target()
        ));
        head.push_str(&format!("Host: {}\r\n", request.host_header()));

        if !request.headers().contains("User-Agent") && !self.user_agent.is_empty() {
            head.push_str(&format!("User-Agent: {}\r\n", self.user_agent));
        }

        for (name, value) in request.headers().iter() {
            if is_framing_header(name) {
                continue;
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }

        let length = request.body().map(|body| body.length());
        match length {
            Some(Some(length)) => head.push_str(&format!("Content-Length: {length}\r\n")),
            Some(None) => head.push_str("Transfer-Encoding: chunked\r\n"),
            None if request.needs_empty_content_length() => {
                head.push_str("Content-Length: 0\r\n");
            }
            None => {}
        }
        head.push_str("\r\n");

        output.write_all(head.as_bytes())?;

        if let Some(body) = request.body_mut() {
            match body.length() {
                Some(length) => write_sized_body(body.reader(), length, output)?,
                None => write_chunked_body(body.reader(), output)?,
            }
        }

        output.flush()
    }
}

/// Pairs a head returned by [`HttpClientSession::exchange`] with the
/// connector's input.
pub(crate) fn attach<'c, R, D>(
    head: ResponseHead,
    connector: &'c mut TransportConnector<R, D>,
) -> Result<Response<'c>, ClientTaskError>
where
    R: DnsResolver,
    D: Dialer,
{
    let connection = connector.connection().ok_or_else(|| {
        ClientTaskError::Transport(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection dropped before the response body",
        ))
    })?;
    Ok(Response::attach(head, connection.input()))
}

fn is_framing_header(name: &str) -> bool {
    ["Host", "Content-Length", "Transfer-Encoding"]
        .iter()
        .any(|framing| framing.eq_ignore_ascii_case(name))
}

fn write_sized_body(source: &mut dyn Read, length: u64, output: &mut dyn Write) -> io::Result<()> {
    let copied = io::copy(&mut source.take(length), output)?;
    if copied != length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("request body ended after {copied} of {length} bytes"),
        ));
    }
    Ok(())
}

fn write_chunked_body(source: &mut dyn Read, output: &mut dyn Write) -> io::Result<()> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        output.write_all(format!("{read:X}\r\n").as_bytes())?;
        output.write_all(&buffer[..read])?;
        output.write_all(b"\r\n")?;
    }
    output.write_all(b"0\r\n\r\n")
}

/// Reads the final response head, skipping interim `1xx` responses.
fn read_head(input: &mut dyn BufRead, method: Method) -> Result<ResponseHead, ClientTaskError> {
    loop {
        let (version, status, reason) = read_status_line(input)?;
        let headers = read_headers(input)?;

        if (100..200).contains(&status) && status != 101 {
            tracing::debug!("Skipping interim {status} response");
            continue;
        }

        let framing = framing_for(method, status, &headers)?;
        return Ok(ResponseHead {
            version,
            status,
            reason,
            headers,
            framing,
        });
    }
}

fn read_status_line(input: &mut dyn BufRead) -> Result<(Version, u16, String), ClientTaskError> {
    // a closed idle connection shows up as EOF before the status line
    if input.fill_buf()?.is_empty() {
        return Err(ClientTaskError::Transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before response",
        )));
    }

    let line = read_line(input)?;
    let mut parts = line.splitn(3, |byte| *byte == b' ');
    let version = parts
        .next()
        .and_then(|version| std::str::from_utf8(version).ok())
        .and_then(Version::parse)
        .ok_or_else(|| malformed("bad status line", &line))?;
    let status = parts
        .next()
        .and_then(|code| std::str::from_utf8(code).ok())
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| malformed("bad status code", &line))?;
    let reason = parts
        .next()
        .map(|reason| String::from_utf8_lossy(reason).into_owned())
        .unwrap_or_default();

    Ok((version, status, reason))
}

fn read_headers(input: &mut dyn BufRead) -> Result<Headers, ClientTaskError> {
    let mut headers = Headers::new();
    loop {
        let line = read_line(input)?;
        if line.is_empty() {
            return Ok(headers);
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ClientTaskError::MalformedResponse(format!(
                "more than {MAX_HEADERS} headers"
            )));
        }
        let Some(colon) = line.iter().position(|byte| *byte == b':') else {
            return Err(malformed("bad header line", &line));
        };

        // names are tokens; values may carry obs-text
        let name = std::str::from_utf8(&line[..colon])
            .ok()
            .filter(|name| name.is_ascii())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed("bad header name", &line))?;
        let value = String::from_utf8_lossy(&line[colon + 1..]);
        headers.append(name, value.trim());
    }
}

fn malformed(what: &str, line: &[u8]) -> ClientTaskError {
    ClientTaskError::MalformedResponse(format!("{what}: {:?}", String::from_utf8_lossy(line)))
}

fn framing_for(method: Method, status: u16, headers: &Headers) -> Result<BodyFraming, ClientTaskError> {
    if method == Method::Head || (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(BodyFraming::Empty);
    }

    if headers.has_token("Transfer-Encoding", "chunked") {
        return Ok(BodyFraming::Chunked);
    }

    if let Some(value) = headers.get("Content-Length") {
        let length = value.trim().parse::<u64>().map_err(|_| {
            ClientTaskError::MalformedResponse(format!("invalid Content-Length: {value:?}"))
        })?;
        return Ok(if length == 0 {
            BodyFraming::Empty
        } else {
            BodyFraming::Length(length)
        });
    }

    Ok(BodyFraming::UntilClose)
}
