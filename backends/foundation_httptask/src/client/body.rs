//! Response body framing and the readers that honour it.
//!
//! A response borrows the connection's buffered input for as long as its
//! body is being read. Whether the connection can carry another request
//! afterwards depends on the body ending exactly where its framing says it
//! does, which is what [`Response::finish`] checks.

use std::io::{self, BufRead, Read};

use crate::client::message::{Headers, ResponseHead, Version};

const MAX_LINE_LENGTH: usize = 8 * 1024;
const MAX_TRAILERS: usize = 100;

/// How the end of a response body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// The body runs until the peer closes the connection.
    UntilClose,
}

impl BodyFraming {
    /// Whether a body with this framing can end before the connection does.
    #[must_use]
    pub fn is_self_delimiting(&self) -> bool {
        !matches!(self, Self::UntilClose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

#[derive(Debug)]
enum Reader {
    Length { remaining: u64 },
    Chunked { state: ChunkState },
    UntilClose { done: bool },
}

/// Body of a response, read straight from the connection.
pub struct ResponseBody<'a> {
    input: &'a mut dyn BufRead,
    reader: Reader,
}

impl std::fmt::Debug for ResponseBody<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}

impl<'a> ResponseBody<'a> {
    /// Returns `None` for [`BodyFraming::Empty`].
    pub fn new(framing: BodyFraming, input: &'a mut dyn BufRead) -> Option<Self> {
        let reader = match framing {
            BodyFraming::Empty => return None,
            BodyFraming::Length(remaining) => Reader::Length { remaining },
            BodyFraming::Chunked => Reader::Chunked {
                state: ChunkState::Size,
            },
            BodyFraming::UntilClose => Reader::UntilClose { done: false },
        };
        Some(Self { input, reader })
    }

    /// Bytes still expected for a length-framed body.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        match self.reader {
            Reader::Length { remaining } => Some(remaining),
            _ => None,
        }
    }

    /// True once the body has been read to its framed end.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.reader {
            Reader::Length { remaining } => remaining == 0,
            Reader::Chunked { state } => state == ChunkState::Done,
            Reader::UntilClose { done } => done,
        }
    }

    /// Reads and drops whatever is left of the body.
    ///
    /// # Errors
    ///
    /// Any read or framing error from the connection.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    fn read_length(&mut self, remaining: u64, buf: &mut [u8]) -> io::Result<usize> {
        if remaining == 0 {
            return Ok(0);
        }
        let limit = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let read = self.input.read(&mut buf[..limit])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed with {remaining} body bytes outstanding"),
            ));
        }
        self.reader = Reader::Length {
            remaining: remaining - read as u64,
        };
        Ok(read)
    }

    fn read_chunked(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let Reader::Chunked { state } = self.reader else {
                return Ok(0);
            };

            match state {
                ChunkState::Size => {
                    let line = read_line(self.input)?;
                    let size = parse_chunk_size(&line)?;
                    let next = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                    self.reader = Reader::Chunked { state: next };
                }
                ChunkState::Data(remaining) => {
                    let limit = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
                    let read = self.input.read(&mut buf[..limit])?;
                    if read == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside a chunk",
                        ));
                    }
                    let left = remaining - read as u64;
                    let next = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    self.reader = Reader::Chunked { state: next };
                    return Ok(read);
                }
                ChunkState::DataEnd => {
                    let line = read_line(self.input)?;
                    if !line.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "chunk data not followed by CRLF",
                        ));
                    }
                    self.reader = Reader::Chunked {
                        state: ChunkState::Size,
                    };
                }
                ChunkState::Trailers => {
                    let mut trailers = 0;
                    loop {
                        let line = read_line(self.input)?;
                        if line.is_empty() {
                            break;
                        }
                        trailers += 1;
                        if trailers > MAX_TRAILERS {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "too many chunked trailers",
                            ));
                        }
                    }
                    self.reader = Reader::Chunked {
                        state: ChunkState::Done,
                    };
                }
                ChunkState::Done => return Ok(0),
            }
        }
    }

    fn read_until_close(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.input.read(buf)?;
        if read == 0 {
            self.reader = Reader::UntilClose { done: true };
        }
        Ok(read)
    }
}

impl Read for ResponseBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.reader {
            Reader::Length { remaining } => self.read_length(remaining, buf),
            Reader::Chunked { .. } => self.read_chunked(buf),
            Reader::UntilClose { done: true } => Ok(0),
            Reader::UntilClose { done: false } => self.read_until_close(buf),
        }
    }
}

/// Reads one CRLF (or bare LF) terminated line without its terminator.
///
/// Lines are raw bytes: field values may carry obs-text.
pub(crate) fn read_line(input: &mut dyn BufRead) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let read = input
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', &mut line)?;

    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        ));
    }
    if line.last() != Some(&b'\n') {
        if line.len() > MAX_LINE_LENGTH {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        ));
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(line)
}

fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let line = String::from_utf8_lossy(line);
    let size = line.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid chunk size line: {line:?}"),
        )
    })
}

/// A response whose body, if any, is still on the connection.
#[derive(Debug)]
pub struct Response<'a> {
    head: ResponseHead,
    body: Option<ResponseBody<'a>>,
}

impl<'a> Response<'a> {
    /// Pairs a parsed head with the input its body will be read from.
    pub fn attach(head: ResponseHead, input: &'a mut dyn BufRead) -> Self {
        let body = ResponseBody::new(head.framing, input);
        Self { head, body }
    }

    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.head.status
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.head.reason
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.head.version
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        self.head.is_keep_alive()
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.head.content_length()
    }

    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// The body reader; `None` when the response carries no body.
    pub fn body_mut(&mut self) -> Option<&mut ResponseBody<'a>> {
        self.body.as_mut()
    }

    /// Drains what the caller left unread and reports whether the
    /// connection ended up positioned at the start of the next response.
    ///
    /// Bodies that run until close never leave a reusable connection.
    pub fn finish(&mut self) -> bool {
        if !self.head.framing.is_self_delimiting() {
            return false;
        }
        let Some(body) = self.body.as_mut() else {
            return true;
        };
        match body.drain() {
            Ok(drained) => {
                if drained > 0 {
                    tracing::debug!("Drained {drained} unread body bytes");
                }
                body.is_complete()
            }
            Err(err) => {
                tracing::debug!("Response body could not be drained: {err}");
                false
            }
        }
    }
}
