//! HTTP test server utilities.
//!
//! WHY: Connection reuse and retry logic only show up against a real socket
//! whose peer can keep a connection open, or drop it at a chosen moment.
//!
//! WHAT: `TestHttpServer` serves any number of requests per connection and
//! lets the test decide, per request, whether to answer, answer and hang up,
//! or hang up without answering.
//!
//! HOW: Uses stdlib's `TcpListener` with hand-parsed requests and
//! hand-rendered HTTP/1.1 responses.

mod server;

pub use server::{Exchange, HttpRequest, HttpResponse, Reply, TestHttpServer};
