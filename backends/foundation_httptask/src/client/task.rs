//! The persistent client task: a worker that drains a request queue for one
//! logical server, reusing its connection while that is safe.
//!
//! WHY: Producers want to fire a request and move on; connection lifecycle,
//! retry and keep-alive bookkeeping belong to one owner.
//!
//! WHAT: [`HttpClientTask`] pops requests in FIFO order and sends each one
//! through its [`TransportConnector`]. A failed send on a reused connection
//! is retried exactly once on a fresh connector after rewinding the body; a
//! failed send on a fresh connector is final. Every attempted request ends
//! in exactly one [`ResponseProcessor::process`] call.
//!
//! HOW: The connector is never repaired in place. Whenever trust in it is
//! lost (identity change, failure, no keep-alive) it is replaced by a new
//! one. Cancellation is cooperative: the abort signal is only looked at
//! between requests.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::client::connector::TransportConnector;
use crate::client::dns::{DnsResolver, SystemDnsResolver};
use crate::client::errors::ClientTaskError;
use crate::client::message::{Request, ResponseHead};
use crate::client::processor::{RequestContext, ResponseProcessor, TaskResult};
use crate::client::session::{self, HttpClientSession};
use crate::client::transport::{Dialer, TcpDialer};
use crate::config::ClientTaskConfig;
use crate::synca::{AbortSignal, RequestQueue};

/// Producer side of a client task; cheap to clone and share across threads.
#[derive(Debug, Clone)]
pub struct ClientTaskHandle {
    queue: Arc<RequestQueue<Request>>,
    abort: Arc<AbortSignal>,
}

impl ClientTaskHandle {
    /// Queues `request` behind everything already pending.
    pub fn enqueue(&self, request: Request) {
        tracing::debug!("Enqueued {} {}", request.method(), request.url());
        self.queue.push(request);
    }

    /// Asks the task to stop and wakes it if it is idle.
    ///
    /// A request already in flight, including its retry, runs to completion.
    pub fn abort(&self) {
        if self.abort.raise() {
            tracing::info!("Abort requested for client task");
        }
        self.queue.wake();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.probe()
    }

    /// Requests still waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Counters describing what a task did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
    /// Requests taken off the queue and attempted.
    pub dequeued: usize,
    /// Requests that produced a response.
    pub succeeded: usize,
    /// Requests whose final attempt failed.
    pub failed: usize,
    /// Resends on a fresh connector after a reused one failed.
    pub retries: usize,
    /// Requests dropped unprocessed because the task was aborted.
    pub discarded: usize,
    /// Connections opened across every connector the task used.
    pub connects: usize,
}

/// What a spawned task hands back when its thread finishes.
#[derive(Debug)]
pub struct FinishedTask<P> {
    pub report: TaskReport,
    pub processor: P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Attempting { reused: bool },
    RetryPending,
}

/// A worker draining requests to one logical server.
pub struct HttpClientTask<P, R = SystemDnsResolver, D = TcpDialer>
where
    R: DnsResolver,
    D: Dialer,
{
    config: ClientTaskConfig,
    queue: Arc<RequestQueue<Request>>,
    abort: Arc<AbortSignal>,
    session: HttpClientSession,
    connector: TransportConnector<R, D>,
    resolver: R,
    dialer: D,
    processor: P,
    forever: bool,
    reusing: bool,
    report: TaskReport,
}

impl<P, R, D> std::fmt::Debug for HttpClientTask<P, R, D>
where
    R: DnsResolver,
    D: Dialer,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientTask")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("forever", &self.forever)
            .field("reusing", &self.reusing)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<P: ResponseProcessor> HttpClientTask<P> {
    /// Creates a task talking plain TCP through the system resolver.
    ///
    /// `first` is queued before anything else. With `forever` unset the task
    /// stops once its queue runs dry; otherwise it runs until aborted.
    pub fn new(
        config: ClientTaskConfig,
        processor: P,
        first: Option<Request>,
        forever: bool,
    ) -> Self {
        Self::with_transport(
            config,
            processor,
            SystemDnsResolver::new(),
            TcpDialer,
            first,
            forever,
        )
    }
}

impl<P, R, D> HttpClientTask<P, R, D>
where
    P: ResponseProcessor,
    R: DnsResolver,
    D: Dialer,
{
    /// Creates a task with a custom resolver and dialer.
    pub fn with_transport(
        config: ClientTaskConfig,
        processor: P,
        resolver: R,
        dialer: D,
        first: Option<Request>,
        forever: bool,
    ) -> Self {
        let queue = Arc::new(RequestQueue::new());
        if let Some(request) = first {
            queue.push(request);
        }

        Self {
            session: HttpClientSession::new(&config),
            connector: TransportConnector::new(resolver.clone(), dialer.clone()),
            config,
            queue,
            abort: Arc::new(AbortSignal::new()),
            resolver,
            dialer,
            processor,
            forever,
            reusing: false,
            report: TaskReport::default(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> ClientTaskHandle {
        ClientTaskHandle {
            queue: self.queue.clone(),
            abort: self.abort.clone(),
        }
    }

    pub fn enqueue(&self, request: Request) {
        self.handle().enqueue(request);
    }

    pub fn abort(&self) {
        self.handle().abort();
    }

    #[must_use]
    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Counters so far, including connections made by the current connector.
    #[must_use]
    pub fn report(&self) -> TaskReport {
        TaskReport {
            connects: self.report.connects + self.connector.connects(),
            ..self.report
        }
    }

    /// Whether the next request may go out on the cached connection.
    #[must_use]
    pub fn is_reusing(&self) -> bool {
        self.reusing
    }

    pub fn into_processor(self) -> P {
        self.processor
    }

    /// Runs the worker loop on the current thread until the queue runs dry
    /// (drain-once) or the task is aborted (forever).
    pub fn run(&mut self) -> TaskReport {
        let poll_interval = self.config.poll_interval();
        tracing::info!(
            "Client task running (forever: {}, poll every {poll_interval:?})",
            self.forever
        );

        while !self.abort.probe() {
            let Some(request) = self.queue.pop(poll_interval) else {
                if self.forever {
                    continue;
                }
                tracing::debug!("Queue drained, stopping drain-once task");
                break;
            };

            if self.abort.probe() {
                tracing::debug!(
                    "Discarding {} {} dequeued after abort",
                    request.method(),
                    request.url()
                );
                self.report.discarded += 1;
                break;
            }

            self.process(request);
        }

        let report = self.report();
        tracing::info!("Client task stopped: {report:?}");
        report
    }

    /// Moves the task onto a named thread of its own.
    ///
    /// # Errors
    ///
    /// Returns the error from [`thread::Builder::spawn`].
    pub fn spawn(mut self) -> io::Result<(ClientTaskHandle, JoinHandle<FinishedTask<P>>)>
    where
        P: 'static,
        R: 'static,
        D: 'static,
    {
        let handle = self.handle();
        let worker = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                let report = self.run();
                FinishedTask {
                    report,
                    processor: self.processor,
                }
            })?;
        Ok((handle, worker))
    }

    fn process(&mut self, mut request: Request) {
        self.report.dequeued += 1;
        let (host, port) = request.target();

        if self.reusing {
            if request.has_unrewindable_body() {
                tracing::debug!("Body of {} cannot be rewound, not risking reuse", request.url());
                self.replace_connector();
            } else if !self.connector.is_bound_to(&host, port) {
                tracing::debug!("Cached connection does not serve {host}:{port}");
                self.replace_connector();
            }
        }

        match self.send_with_retry(&mut request) {
            Ok(head) => self.complete(&request, head),
            Err(err) => self.fail(&request, err),
        }
    }

    /// Sends `request`, resending once on a fresh connector when the
    /// attempt on a reused one fails.
    fn send_with_retry(&mut self, request: &mut Request) -> Result<ResponseHead, ClientTaskError> {
        let mut state = Attempt::Attempting {
            reused: self.reusing,
        };

        loop {
            state = match state {
                Attempt::Attempting { reused } => {
                    match self.session.exchange(request, &mut self.connector) {
                        Ok(head) => return Ok(head),
                        Err(err) if reused => {
                            tracing::warn!(
                                "Reused connection failed for {} {}: {err}; retrying on a fresh one",
                                request.method(),
                                request.url()
                            );
                            Attempt::RetryPending
                        }
                        Err(err) => return Err(err),
                    }
                }
                Attempt::RetryPending => {
                    self.report.retries += 1;
                    self.replace_connector();
                    if let Some(body) = request.body_mut() {
                        body.rewind().map_err(ClientTaskError::RewindFailed)?;
                    }
                    Attempt::Attempting { reused: false }
                }
            };
        }
    }

    fn complete(&mut self, request: &Request, head: ResponseHead) {
        self.report.succeeded += 1;
        let context = RequestContext::from(self.connector.socket_info());
        let status = head.status;

        let keep_alive = match session::attach(head, &mut self.connector) {
            Ok(mut response) => {
                let result: TaskResult = Ok(());
                if let Err(err) =
                    self.processor
                        .process(&result, request, &context, Some(&mut response))
                {
                    tracing::warn!("Response processor failed for {}: {err}", request.url());
                }
                response.is_keep_alive() && response.finish()
            }
            Err(err) => {
                tracing::error!("Lost connection before handing over the response: {err}");
                false
            }
        };

        tracing::debug!(
            "{} {} -> {status} (keep-alive: {keep_alive})",
            request.method(),
            request.url()
        );

        if keep_alive {
            self.reusing = true;
        } else {
            self.replace_connector();
        }
    }

    fn fail(&mut self, request: &Request, err: ClientTaskError) {
        self.report.failed += 1;
        tracing::error!("{} {} failed: {err}", request.method(), request.url());

        let context = RequestContext::from(self.connector.socket_info());
        let result: TaskResult = Err(err);
        if let Err(hook_err) = self.processor.process(&result, request, &context, None) {
            tracing::warn!("Response processor failed for {}: {hook_err}", request.url());
        }

        self.replace_connector();
    }

    /// Releases the current connector and starts over with a new one.
    fn replace_connector(&mut self) {
        self.report.connects += self.connector.connects();
        self.connector = TransportConnector::new(self.resolver.clone(), self.dialer.clone());
        self.reusing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::body::Response;
    use crate::client::dns::MockDnsResolver;
    use crate::client::message::{Method, RequestBody};
    use crate::client::processor::{BufferingProcessor, FnProcessor};
    use crate::client::transport::{ConnectionScript, MemoryDialer};
    use std::io::{Cursor, Read, Seek, SeekFrom};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tracing_test::traced_test;

    const KEEP_ALIVE_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

    fn config() -> ClientTaskConfig {
        ClientTaskConfig::default().with_poll_interval(Duration::from_millis(20))
    }

    fn resolver() -> MockDnsResolver {
        MockDnsResolver::new()
            .with_response("media.local", vec![SocketAddr::from(([127, 0, 0, 1], 8080))])
            .with_response("other.local", vec![SocketAddr::from(([127, 0, 0, 1], 9090))])
    }

    /// Records (ok, status) of every hook call.
    #[derive(Debug, Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(bool, Option<u16>)>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<(bool, Option<u16>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ResponseProcessor for Recorder {
        fn process(
            &mut self,
            result: &TaskResult,
            _request: &Request,
            _context: &RequestContext,
            response: Option<&mut Response<'_>>,
        ) -> Result<(), ClientTaskError> {
            self.calls
                .lock()
                .unwrap()
                .push((result.is_ok(), response.map(|r| r.status())));
            Ok(())
        }
    }

    fn task(dialer: &MemoryDialer, recorder: &Recorder) -> HttpClientTask<Recorder, MockDnsResolver, MemoryDialer> {
        HttpClientTask::with_transport(config(), recorder.clone(), resolver(), dialer.clone(), None, false)
    }

    fn written(dialer: &MemoryDialer, index: usize) -> String {
        String::from_utf8(dialer.written()[index].clone()).unwrap()
    }

    /// Seekable source whose seeks start failing once `broken` is set.
    struct BreakingSeek {
        inner: Cursor<Vec<u8>>,
        broken: Arc<AtomicBool>,
    }

    impl Read for BreakingSeek {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for BreakingSeek {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(io::Error::other("source is gone"));
            }
            self.inner.seek(pos)
        }
    }

    /// WHY: Keep-alive responses must let the next request ride the same connection
    /// WHAT: Tests two requests against one keep-alive connection dial once
    #[test]
    #[traced_test]
    fn test_keep_alive_connection_is_reused() {
        let mut both = KEEP_ALIVE_OK.to_vec();
        both.extend_from_slice(KEEP_ALIVE_OK);
        let dialer = MemoryDialer::new().with_connection(ConnectionScript::Serve(both));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/a").unwrap());
        task.enqueue(Request::get("http://media.local:8080/b").unwrap());
        let report = task.run();

        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(recorder.calls(), vec![(true, Some(200)), (true, Some(200))]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retries, 0);
        assert_eq!(report.connects, 1);
    }

    /// WHY: A stale reused connection must not lose a rewindable request
    /// WHAT: Tests exactly one retry on a fresh connector with the whole body resent
    #[test]
    #[traced_test]
    fn test_stale_reused_connection_retries_once_with_rewound_body() {
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/warmup").unwrap());
        task.enqueue(
            Request::post("http://media.local:8080/events", RequestBody::bytes("state=playing"))
                .unwrap(),
        );
        let report = task.run();

        // the first connection has nothing left to serve, so the reused send fails
        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(report.retries, 1);
        assert_eq!(recorder.calls(), vec![(true, Some(200)), (true, Some(200))]);

        let resent = written(&dialer, 1);
        assert!(resent.starts_with("POST /events HTTP/1.1\r\n"));
        assert!(resent.ends_with("\r\n\r\nstate=playing"));
    }

    /// WHY: A non-seekable body cannot be resent, so reuse must not be risked
    /// WHAT: Tests that the guard forces a fresh connector and no retry happens
    #[test]
    #[traced_test]
    fn test_unrewindable_body_never_rides_a_reused_connection() {
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()))
            .with_connection(ConnectionScript::Broken);
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/warmup").unwrap());
        let body = RequestBody::streaming(Cursor::new(b"stream".to_vec()), Some(6));
        task.enqueue(Request::new(Method::Put, "http://media.local:8080/upload").unwrap().with_body(body));
        let report = task.run();

        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(report.retries, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(recorder.calls(), vec![(true, Some(200)), (false, None)]);
    }

    /// WHY: Failing on a fresh connector is final
    /// WHAT: Tests zero retries and a failure result handed to the hook
    #[test]
    #[traced_test]
    fn test_failure_on_fresh_connector_is_terminal() {
        let dialer = MemoryDialer::new().with_connection(ConnectionScript::Broken);
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::post("http://media.local:8080/events", RequestBody::bytes("x")).unwrap());
        let report = task.run();

        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(report.retries, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(recorder.calls(), vec![(false, None)]);
    }

    /// WHY: Connect failures on the retry reconnect are terminal too
    /// WHAT: Tests a stale reuse whose fresh reconnect is refused
    #[test]
    #[traced_test]
    fn test_refused_reconnect_after_stale_reuse_is_terminal() {
        let dialer = MemoryDialer::new().with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/warmup").unwrap());
        task.enqueue(Request::get("http://media.local:8080/again").unwrap());
        let report = task.run();

        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(report.retries, 1);
        assert_eq!(recorder.calls(), vec![(true, Some(200)), (false, None)]);
    }

    /// WHY: Connection: close means the connector cannot be kept
    /// WHAT: Tests that the next request dials again without retrying
    #[test]
    #[traced_test]
    fn test_connection_close_replaces_connector() {
        let closing = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(closing.to_vec()))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/one").unwrap());
        task.enqueue(Request::get("http://media.local:8080/two").unwrap());
        let report = task.run();

        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(report.retries, 0);
        assert_eq!(report.succeeded, 2);
    }

    /// WHY: A cached connection belongs to one server only
    /// WHAT: Tests that a request for another host replaces the connector first
    #[test]
    #[traced_test]
    fn test_identity_change_replaces_connector_without_retry() {
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/").unwrap());
        task.enqueue(Request::get("http://other.local:9090/").unwrap());
        let report = task.run();

        assert_eq!(
            dialer.dialed(),
            vec![
                SocketAddr::from(([127, 0, 0, 1], 8080)),
                SocketAddr::from(([127, 0, 0, 1], 9090))
            ]
        );
        assert_eq!(report.retries, 0);
        assert_eq!(report.succeeded, 2);
    }

    /// WHY: Requests dequeued after abort must not be processed
    /// WHAT: Tests that an aborted task drops what it pops without calling the hook
    #[test]
    #[traced_test]
    fn test_abort_discards_dequeued_request() {
        let dialer = MemoryDialer::new();
        let recorder = Recorder::default();

        let mut task = HttpClientTask::with_transport(
            config(),
            recorder.clone(),
            resolver(),
            dialer.clone(),
            Some(Request::get("http://media.local:8080/").unwrap()),
            true,
        );
        let handle = task.handle();
        handle.abort();
        handle.enqueue(Request::get("http://media.local:8080/late").unwrap());

        let report = task.run();

        assert!(handle.is_aborted());
        assert_eq!(report.dequeued, 0);
        assert!(recorder.calls().is_empty());
        assert_eq!(dialer.dial_count(), 0);
    }

    /// WHY: Drain-once tasks stop by themselves once the queue is empty
    /// WHAT: Tests that run returns after processing the first request
    #[test]
    #[traced_test]
    fn test_drain_once_stops_when_queue_is_empty() {
        let dialer = MemoryDialer::new().with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = HttpClientTask::with_transport(
            config(),
            recorder.clone(),
            resolver(),
            dialer,
            Some(Request::get("http://media.local:8080/").unwrap()),
            false,
        );

        let started = Instant::now();
        let report = task.run();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.dequeued, 1);
        assert_eq!(recorder.calls(), vec![(true, Some(200))]);
    }

    /// WHY: The buffering processor is what producers read results from
    /// WHAT: Tests a spawned forever task buffering a response until aborted
    #[test]
    #[traced_test]
    fn test_spawned_task_buffers_until_aborted() {
        let dialer = MemoryDialer::new().with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let (sender, receiver) = std::sync::mpsc::channel();
        let processor = BufferingProcessor::new().with_callback(move |response| {
            let _ = sender.send(response.text());
        });

        let task = HttpClientTask::with_transport(config(), processor, resolver(), dialer, None, true);
        let (handle, worker) = task.spawn().expect("should spawn");
        handle.enqueue(Request::get("http://media.local:8080/").unwrap());

        let body = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("response should be buffered");
        assert_eq!(body, "ok");

        handle.abort();
        let finished = worker.join().expect("worker should not panic");
        assert_eq!(finished.report.succeeded, 1);
        assert_eq!(finished.processor.last_response().map(|r| r.status), Some(200));
    }

    /// WHY: obs-text in a header value is a valid response, not a broken connection
    /// WHAT: Tests a Latin-1 header on a reused connection succeeds without a resend
    #[test]
    #[traced_test]
    fn test_latin1_header_on_reused_connection_is_not_resent() {
        let mut both = KEEP_ALIVE_OK.to_vec();
        both.extend_from_slice(b"HTTP/1.1 200 OK\r\nX-Title: caf\xe9\r\nContent-Length: 2\r\n\r\nok");
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(both))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(Request::get("http://media.local:8080/warmup").unwrap());
        task.enqueue(Request::post("http://media.local:8080/charge", RequestBody::bytes("amount=5")).unwrap());
        let report = task.run();

        assert_eq!(recorder.calls(), vec![(true, Some(200)), (true, Some(200))]);
        assert_eq!(report.retries, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(written(&dialer, 0).matches("POST /charge").count(), 1);
        assert!(task.is_reusing());
    }

    /// WHY: After 101 the connection speaks another protocol
    /// WHAT: Tests an upgrade response releases the connector and the next request dials again
    #[test]
    #[traced_test]
    fn test_switching_protocols_releases_connector() {
        let upgraded = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n\x81\x05hello";
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(upgraded.to_vec()))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let recorder = Recorder::default();

        let mut task = task(&dialer, &recorder);
        task.enqueue(
            Request::get("http://media.local:8080/socket")
                .unwrap()
                .with_header("Connection", "Upgrade")
                .with_header("Upgrade", "websocket"),
        );
        task.run();

        assert_eq!(recorder.calls(), vec![(true, Some(101))]);
        assert!(!task.is_reusing());

        task.enqueue(Request::get("http://media.local:8080/plain").unwrap());
        let report = task.run();

        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(report.retries, 0);
        assert_eq!(recorder.calls(), vec![(true, Some(101)), (true, Some(200))]);
        assert!(written(&dialer, 1).starts_with("GET /plain HTTP/1.1\r\n"));
    }

    /// WHY: A body that cannot be rewound must not be resent half-read
    /// WHAT: Tests a failed rewind ends the retry with RewindFailed and no second send
    #[test]
    #[traced_test]
    fn test_failed_rewind_is_terminal_without_resend() {
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let record = outcomes.clone();
        let processor = FnProcessor::new(move |result, _request, _context, _response| {
            record
                .lock()
                .unwrap()
                .push(matches!(result, Err(ClientTaskError::RewindFailed(_))));
            Ok(())
        });

        let mut task =
            HttpClientTask::with_transport(config(), processor, resolver(), dialer.clone(), None, false);
        task.enqueue(Request::get("http://media.local:8080/warmup").unwrap());

        let broken = Arc::new(AtomicBool::new(false));
        let body = RequestBody::seekable(BreakingSeek {
            inner: Cursor::new(b"state=paused".to_vec()),
            broken: broken.clone(),
        })
        .unwrap();
        broken.store(true, Ordering::SeqCst);
        task.enqueue(Request::post("http://media.local:8080/events", body).unwrap());

        let report = task.run();

        assert_eq!(report.retries, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(dialer.written().len(), 1);
        assert_eq!(*outcomes.lock().unwrap(), vec![false, true]);
    }

    /// WHY: A processor failing to read a body must not stop the worker
    /// WHAT: Tests a truncated body is logged, the connector replaced and the next request served
    #[test]
    #[traced_test]
    fn test_body_copy_failure_keeps_loop_running() {
        let truncated = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc";
        let dialer = MemoryDialer::new()
            .with_connection(ConnectionScript::Serve(truncated.to_vec()))
            .with_connection(ConnectionScript::Serve(KEEP_ALIVE_OK.to_vec()));

        let mut task = HttpClientTask::with_transport(
            config(),
            BufferingProcessor::new(),
            resolver(),
            dialer.clone(),
            None,
            false,
        );
        task.enqueue(Request::get("http://media.local:8080/short").unwrap());
        task.enqueue(Request::get("http://media.local:8080/next").unwrap());
        let report = task.run();

        assert_eq!(report.dequeued, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retries, 0);
        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(task.processor().completed(), 1);
        assert_eq!(task.processor().last_response().map(|r| r.text()), Some("ok".to_string()));
        assert!(task.is_reusing());
        assert!(logs_contain("Failed to copy response body"));
    }
}
