//! Background HTTP requests with retries and single-thread event delivery.
//!
//! [`Http`] starts every operation on its own worker thread. Each attempt opens
//! a [`Connection`] through a [`Transport`], and the retry controller decides
//! what a failed attempt means. Outcomes travel back through an
//! [`EventDispatcher`] and reach the [`HttpEvents`] listener only when the
//! owning thread drains the queue.
//!
//! # Example
//!
//! ```no_run
//! use courier_net::ErrorKind;
//! use courier_net::http::{Extras, Http, HttpEvents, RequestOptions};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! struct Listener;
//!
//! impl HttpEvents for Listener {
//!     fn on_progress(&mut self, _code: Option<i32>, total: u64, done: u64, _extras: &Extras) {
//!         println!("{done}/{total}");
//!     }
//!
//!     fn on_request_complete(&mut self, code: i32, response: &str, _extras: &Extras) {
//!         println!("{code}: {response}");
//!     }
//!
//!     fn on_error(&mut self, code: i32, kind: ErrorKind, _extras: &Extras) {
//!         eprintln!("{code}: {kind}");
//!     }
//!
//!     fn on_file_downloaded(&mut self, code: i32, path: &Path, _extras: &Extras) {
//!         println!("{code}: saved to {}", path.display());
//!     }
//! }
//!
//! let mut http = Http::builder().listener(Listener).build()?;
//!
//! http.execute_post("https://api.example.com/items", r#"{"name":"a"}"#, RequestOptions::with_code(1));
//! http.execute_post_file("https://api.example.com/logs", "app.log", RequestOptions::with_code(2));
//! http.download_file("https://cdn.example.com/a.zip", "/tmp", None, RequestOptions::with_code(3));
//!
//! http.wait_for_events(Duration::from_secs(1));
//! # Ok::<(), courier_net::NetworkError>(())
//! ```

mod client;
mod connectivity;
mod dispatch;
mod download;
mod request;
mod reqwest_transport;
mod response;
mod retry;
mod transport;
mod upload;

pub use client::{Http, HttpBuilder, HttpConfig, RequestHandle, RequestId};
pub use connectivity::{AlwaysOnline, ConnectivityProbe, InterfaceProbe};
pub use dispatch::{EventDispatcher, HttpEvent, HttpEvents, Outcome};
pub use download::{download_attempt, resolve_file_name, run_download};
pub use request::{Extras, HttpMethod, RequestCorrelator, RequestDescriptor, RequestOptions};
pub use reqwest_transport::{ReqwestTransport, ReqwestTransportBuilder, TransportConfig, runtime};
pub use response::{is_success_status, read_response};
pub use retry::{RetryConfig, execute_attempt, parse_address, run_request, run_with_retries};
pub use transport::{Connection, ConnectionGuard, ConnectionSettings, Transport};
pub use upload::{
    MAX_UPLOAD_SIZE, ProgressThrottle, UPLOAD_CONTENT_TYPE, check_upload_file, run_upload,
    upload_attempt, upload_descriptor,
};
