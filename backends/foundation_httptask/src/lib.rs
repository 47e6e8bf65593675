//! Persistent, connection-reusing HTTP/1.1 client task.
//!
//! A [`client::HttpClientTask`] owns a request queue and one transport
//! connector. Producers enqueue requests through a [`client::ClientTaskHandle`]
//! and learn about outcomes through the task's [`client::ResponseProcessor`].

pub mod client;
pub mod config;
pub mod synca;

pub use client::{
    BufferingProcessor, ClientTaskError, ClientTaskHandle, DiscardingProcessor, FnProcessor,
    HttpClientTask, Request, RequestBody, ResponseProcessor, TaskReport,
};
pub use config::ClientTaskConfig;
