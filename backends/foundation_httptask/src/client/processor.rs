//! Response processors: the per-request completion hook of a client task.
//!
//! The task calls [`ResponseProcessor::process`] exactly once for every
//! request it dequeues and attempts, successful or not. What the hook
//! returns is only logged; it never changes the outcome of the request.

use std::fmt;
use std::io::Read;
use std::net::SocketAddr;

use crate::client::body::Response;
use crate::client::errors::ClientTaskError;
use crate::client::message::{Headers, Request};
use crate::client::transport::SocketInfo;

/// Outcome of sending a request, handed to the processor.
pub type TaskResult = Result<(), ClientTaskError>;

/// Addresses of the connection a request went out on.
///
/// Both are `None` when no connection was ever established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub local_address: Option<SocketAddr>,
    pub remote_address: Option<SocketAddr>,
}

impl From<SocketInfo> for RequestContext {
    fn from(info: SocketInfo) -> Self {
        Self {
            local_address: info.local_address,
            remote_address: info.remote_address,
        }
    }
}

/// Completion hook of a client task.
pub trait ResponseProcessor: Send {
    /// Handles the outcome of one request.
    ///
    /// `response` is present only when `result` is `Ok`; its body may be
    /// read, and whatever is left unread is drained by the task afterwards.
    ///
    /// # Errors
    ///
    /// Errors are logged by the task and otherwise ignored.
    fn process(
        &mut self,
        result: &TaskResult,
        request: &Request,
        context: &RequestContext,
        response: Option<&mut Response<'_>>,
    ) -> Result<(), ClientTaskError>;
}

/// A response copied out of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl BufferedResponse {
    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

type ResponseCallback = Box<dyn FnMut(&BufferedResponse) + Send>;

/// Copies every successful response into memory and keeps the last one.
#[derive(Default)]
pub struct BufferingProcessor {
    last: Option<BufferedResponse>,
    completed: usize,
    failed: usize,
    callback: Option<ResponseCallback>,
}

impl fmt::Debug for BufferingProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferingProcessor")
            .field("last", &self.last)
            .field("completed", &self.completed)
            .field("failed", &self.failed)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl BufferingProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes `callback` with every buffered response.
    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&BufferedResponse) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn last_response(&self) -> Option<&BufferedResponse> {
        self.last.as_ref()
    }

    /// Number of responses buffered so far.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Number of failed requests seen so far.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }
}

impl ResponseProcessor for BufferingProcessor {
    fn process(
        &mut self,
        result: &TaskResult,
        request: &Request,
        _context: &RequestContext,
        response: Option<&mut Response<'_>>,
    ) -> Result<(), ClientTaskError> {
        if let Err(err) = result {
            tracing::debug!("Not buffering failed {} {}: {err}", request.method(), request.url());
            self.failed += 1;
            return Ok(());
        }
        let Some(response) = response else {
            return Ok(());
        };

        let mut body = Vec::new();
        if let Some(reader) = response.body_mut() {
            reader
                .read_to_end(&mut body)
                .map_err(ClientTaskError::BodyCopy)?;
        }

        let buffered = BufferedResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body,
        };
        if let Some(callback) = self.callback.as_mut() {
            callback(&buffered);
        }

        self.completed += 1;
        self.last = Some(buffered);
        Ok(())
    }
}

/// Ignores every outcome; unread bodies are drained by the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardingProcessor;

impl ResponseProcessor for DiscardingProcessor {
    fn process(
        &mut self,
        _result: &TaskResult,
        _request: &Request,
        _context: &RequestContext,
        _response: Option<&mut Response<'_>>,
    ) -> Result<(), ClientTaskError> {
        Ok(())
    }
}

/// Adapts a closure into a [`ResponseProcessor`].
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F>
where
    F: FnMut(
            &TaskResult,
            &Request,
            &RequestContext,
            Option<&mut Response<'_>>,
        ) -> Result<(), ClientTaskError>
        + Send,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

impl<F> fmt::Debug for FnProcessor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProcessor")
    }
}

impl<F> ResponseProcessor for FnProcessor<F>
where
    F: FnMut(
            &TaskResult,
            &Request,
            &RequestContext,
            Option<&mut Response<'_>>,
        ) -> Result<(), ClientTaskError>
        + Send,
{
    fn process(
        &mut self,
        result: &TaskResult,
        request: &Request,
        context: &RequestContext,
        response: Option<&mut Response<'_>>,
    ) -> Result<(), ClientTaskError> {
        (self.0)(result, request, context, response)
    }
}
