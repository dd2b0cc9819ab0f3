//! Networking module for Courier.
//!
//! This crate provides a callback-style HTTP client for applications that
//! want network work off their main thread but results on it:
//!
//! - **Requests**: GET, POST and any other method, with a retry budget
//! - **Uploads**: files streamed through a deflate compressor with throttled progress
//! - **Downloads**: responses streamed to disk with throttled progress
//! - **Delivery**: every callback runs on the thread that owns the client
//!
//! # Threading
//!
//! Each operation returns a [`RequestHandle`] immediately and runs on its own
//! worker thread. Outcomes are queued, and the registered [`HttpEvents`]
//! listener sees them when the owning thread calls
//! [`Http::process_events`] or [`Http::wait_for_events`]:
//!
//! ```ignore
//! let mut http = Http::builder().listener(MyListener::default()).build()?;
//! http.execute_get("https://api.example.com/status", RequestOptions::with_code(7));
//!
//! // Somewhere in the application's main loop:
//! http.process_events();
//! ```
//!
//! # Errors
//!
//! Failed requests reach the listener as an [`ErrorKind`]. Transport failures
//! such as timeouts and resets are retried until the budget runs out and then
//! reported as [`ErrorKind::ServerError`]. A bad address, a missing upload file
//! or an empty response ends the request at once.
//!
//! # Debugging
//!
//! Logging goes through `tracing` under the `courier_net` targets. Request and
//! response bodies are logged at debug level only when
//! [`Http::set_debugging_enabled`] is on.

mod error;
pub mod http;

pub use error::{ErrorKind, NetworkError, Result};

// Re-export commonly used types at the crate root
pub use http::{
    EventDispatcher, Extras, Http, HttpBuilder, HttpConfig, HttpEvents, HttpMethod, Outcome,
    RequestCorrelator, RequestDescriptor, RequestHandle, RequestId, RequestOptions, RetryConfig,
};
