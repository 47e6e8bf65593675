//! Test infrastructure for foundation HTTP clients.
//!
//! This crate provides:
//! - **Test HTTP server**: a real TCP server speaking just enough HTTP/1.1,
//!   with per-request scripting of keep-alive and connection teardown
//!
//! # Examples
//!
//! ```rust
//! use foundation_testing::http::{HttpResponse, Reply, TestHttpServer};
//!
//! let server = TestHttpServer::with_handler(|_request, _exchange| {
//!     Reply::Respond(HttpResponse::ok(b"pong"))
//! });
//!
//! assert!(server.url("/ping").starts_with("http://127.0.0.1:"));
//! assert_eq!(server.connections(), 0);
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod http;
