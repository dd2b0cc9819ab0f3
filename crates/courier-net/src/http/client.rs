//! The `Http` facade.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use courier_core::{EventLoop, WorkerHandle, spawn_worker};
use serde::{Deserialize, Serialize};

use super::connectivity::{ConnectivityProbe, InterfaceProbe};
use super::dispatch::{EventDispatcher, HttpEvent, HttpEvents, Outcome};
use super::download::run_download;
use super::reqwest_transport::ReqwestTransport;
use super::request::{HttpMethod, RequestCorrelator, RequestDescriptor, RequestOptions};
use super::retry::{RetryConfig, run_request};
use super::transport::Transport;
use super::upload::{run_upload, upload_descriptor};
use crate::error::{ErrorKind, Result};

/// Configuration for the [`Http`] client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Retry budget when a call does not set one.
    pub default_max_retries: u32,
    /// Connect and read timeout for GET requests and downloads.
    pub default_timeout: Duration,
    /// Connect timeout for POST, custom-method requests and uploads.
    pub connect_timeout: Duration,
    /// Read timeout for POST and custom-method requests.
    pub read_timeout: Duration,
    /// Read timeout for file uploads.
    pub upload_read_timeout: Duration,
    /// Chunk size for uploads and downloads, in bytes.
    pub chunk_size: usize,
    /// Minimum spacing between progress events.
    pub progress_interval: Duration,
    /// Content type of [`Http::execute_post`] bodies.
    pub post_content_type: String,
    /// Log request and response bodies at debug level.
    pub debug_requests: bool,
    /// Pause between attempts.
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 5,
            default_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(5000),
            upload_read_timeout: Duration::from_secs(60),
            chunk_size: 4096,
            progress_interval: Duration::from_millis(100),
            post_content_type: "application/json".to_string(),
            debug_requests: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Unique identifier for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a started operation.
///
/// Requests cannot be cancelled; the handle only allows waiting.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    worker: Option<WorkerHandle>,
}

impl RequestHandle {
    /// The request identifier.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Whether a worker thread was started for this request.
    ///
    /// Requests rejected up front, for example with no network, have none.
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Whether the operation has finished and its outcome has been queued.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(WorkerHandle::is_finished)
    }

    /// Block until the operation has finished.
    ///
    /// Returns `false` if the worker had already been joined or panicked.
    pub fn join(&self) -> bool {
        self.worker.as_ref().is_none_or(WorkerHandle::join)
    }
}

/// Settings captured by each worker when it starts.
struct WorkerContext {
    transport: Arc<dyn Transport>,
    config: HttpConfig,
    dispatcher: EventDispatcher,
}

/// Builder for [`Http`].
#[derive(Default)]
pub struct HttpBuilder {
    transport: Option<Arc<dyn Transport>>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    config: HttpConfig,
    listener: Option<Box<dyn HttpEvents>>,
}

impl HttpBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a shared transport.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom connectivity probe.
    pub fn probe(mut self, probe: impl ConnectivityProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Replace the configuration.
    pub fn config(mut self, config: HttpConfig) -> Self {
        self.config = config;
        self
    }

    /// Log request and response bodies.
    pub fn debug_requests(mut self, enabled: bool) -> Self {
        self.config.debug_requests = enabled;
        self
    }

    /// Register the listener.
    pub fn listener(mut self, listener: impl HttpEvents + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Build the client.
    ///
    /// Without an explicit transport a [`ReqwestTransport`] is created, and
    /// without an explicit probe an [`InterfaceProbe`] is used.
    pub fn build(self) -> Result<Http> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::builder()
                    .connect_timeout(self.config.connect_timeout)
                    .build()?,
            ),
        };
        let probe = self.probe.unwrap_or_else(|| Arc::new(InterfaceProbe));
        let listener_attached = Arc::new(AtomicBool::new(self.listener.is_some()));
        let debug = AtomicBool::new(self.config.debug_requests);

        Ok(Http {
            transport,
            probe,
            config: self.config,
            debug,
            event_loop: EventLoop::new(),
            listener: self.listener,
            listener_attached,
        })
    }
}

/// Asynchronous HTTP client with a single listener.
///
/// Every operation runs on its own worker thread and returns immediately.
/// Outcomes are queued for the thread that owns the `Http` value and reach
/// the listener only when that thread calls [`process_events`] or
/// [`wait_for_events`]. The listener is therefore never called from a worker.
///
/// `Http` is not `Send`; it stays on the consumer thread.
///
/// # Example
///
/// ```no_run
/// use courier_net::ErrorKind;
/// use courier_net::http::{Extras, Http, HttpEvents, RequestOptions};
/// use std::time::Duration;
///
/// struct Printer;
///
/// impl HttpEvents for Printer {
///     fn on_request_complete(&mut self, code: i32, response: &str, _extras: &Extras) {
///         println!("{code}: {response}");
///     }
///
///     fn on_error(&mut self, code: i32, kind: ErrorKind, _extras: &Extras) {
///         eprintln!("{code} failed: {kind}");
///     }
/// }
///
/// let mut http = Http::builder().listener(Printer).build()?;
/// http.execute_get("https://example.com/status", RequestOptions::with_code(1));
///
/// loop {
///     http.wait_for_events(Duration::from_millis(50));
/// }
/// # Ok::<(), courier_net::NetworkError>(())
/// ```
///
/// [`process_events`]: Http::process_events
/// [`wait_for_events`]: Http::wait_for_events
pub struct Http {
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ConnectivityProbe>,
    config: HttpConfig,
    debug: AtomicBool,
    event_loop: EventLoop<HttpEvent>,
    listener: Option<Box<dyn HttpEvents>>,
    listener_attached: Arc<AtomicBool>,
}

impl Http {
    /// Create a client with the reqwest transport and the interface probe.
    pub fn new() -> Result<Self> {
        HttpBuilder::new().build()
    }

    /// Create a builder.
    pub fn builder() -> HttpBuilder {
        HttpBuilder::new()
    }

    /// The client configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Whether the connectivity probe currently reports a network.
    pub fn is_connected(&self) -> bool {
        self.probe.is_connected()
    }

    /// Turn request and response body logging on or off.
    ///
    /// Applies to operations started afterwards.
    pub fn set_debugging_enabled(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    /// Whether body logging is on.
    pub fn is_debugging_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Register the listener, replacing any previous one.
    pub fn set_listener(&mut self, listener: impl HttpEvents + 'static) {
        self.listener = Some(Box::new(listener));
        self.listener_attached.store(true, Ordering::Release);
    }

    /// Remove the listener. Events delivered afterwards are discarded.
    pub fn clear_listener(&mut self) -> Option<Box<dyn HttpEvents>> {
        self.listener_attached.store(false, Ordering::Release);
        self.listener.take()
    }

    /// Whether a listener is registered.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// A dispatcher for reporting outcomes from elsewhere, for example a
    /// response validator reporting [`ErrorKind::ResponseDataInvalid`].
    pub fn dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.event_loop.proxy(), self.listener_attached.clone())
    }

    /// Number of events waiting for delivery.
    pub fn pending_events(&self) -> usize {
        self.event_loop.pending_count()
    }

    /// Deliver every queued event to the listener on this thread.
    ///
    /// Returns the number of events processed.
    pub fn process_events(&mut self) -> usize {
        let listener = &mut self.listener;
        self.event_loop.process_pending(|event| deliver(listener, event))
    }

    /// Wait up to `timeout` for an event, then deliver everything queued.
    ///
    /// Returns the number of events processed.
    pub fn wait_for_events(&mut self, timeout: Duration) -> usize {
        let listener = &mut self.listener;
        self.event_loop.wait_and_process(timeout, |event| deliver(listener, event))
    }

    /// Perform a GET request.
    pub fn execute_get(&self, address: &str, options: RequestOptions) -> RequestHandle {
        let timeouts = (self.config.default_timeout, self.config.default_timeout);
        let descriptor = options.descriptor(HttpMethod::Get, address, &self.config, timeouts);
        self.execute(descriptor, options.correlator())
    }

    /// POST a body with the configured POST content type.
    pub fn execute_post(
        &self,
        address: &str,
        body: impl Into<Bytes>,
        options: RequestOptions,
    ) -> RequestHandle {
        let timeouts = (self.config.connect_timeout, self.config.read_timeout);
        let descriptor = options
            .descriptor(HttpMethod::Post, address, &self.config, timeouts)
            .content_type(self.config.post_content_type.clone())
            .body(body);
        self.execute(descriptor, options.correlator())
    }

    /// Upload a file as a deflate-compressed POST body.
    pub fn execute_post_file(
        &self,
        address: &str,
        file: impl AsRef<Path>,
        options: RequestOptions,
    ) -> RequestHandle {
        let descriptor = upload_descriptor(address, &options, &self.config);
        let file = file.as_ref().to_path_buf();

        self.launch("upload", options.correlator(), move |ctx, correlator| {
            let mut on_progress = |processed, total| {
                ctx.dispatcher.progress(processed, total, correlator);
            };
            run_upload(
                ctx.transport.as_ref(),
                &descriptor,
                &file,
                &ctx.config,
                &mut on_progress,
            )
        })
    }

    /// Perform a request with any method, content type and body.
    pub fn execute_request(
        &self,
        method: HttpMethod,
        address: &str,
        content_type: Option<&str>,
        body: Option<Bytes>,
        options: RequestOptions,
    ) -> RequestHandle {
        let timeouts = (self.config.connect_timeout, self.config.read_timeout);
        let mut descriptor = options.descriptor(method, address, &self.config, timeouts);
        descriptor.content_type = content_type.map(str::to_string);
        descriptor.body = body;
        self.execute(descriptor, options.correlator())
    }

    /// Download `address` into `destination_dir`.
    ///
    /// The file name is `desired_name` when given, otherwise it comes from the
    /// response's `Content-Disposition` header or the URL path.
    pub fn download_file(
        &self,
        address: &str,
        destination_dir: impl AsRef<Path>,
        desired_name: Option<&str>,
        options: RequestOptions,
    ) -> RequestHandle {
        let timeouts = (self.config.default_timeout, self.config.default_timeout);
        let descriptor = options.descriptor(HttpMethod::Get, address, &self.config, timeouts);
        let destination_dir: PathBuf = destination_dir.as_ref().to_path_buf();
        let desired_name = desired_name.map(str::to_string);

        self.launch("download", options.correlator(), move |ctx, correlator| {
            let mut on_progress = |processed, total| {
                ctx.dispatcher.progress(processed, total, correlator);
            };
            run_download(
                ctx.transport.as_ref(),
                &descriptor,
                &destination_dir,
                desired_name.as_deref(),
                &ctx.config,
                &mut on_progress,
            )
        })
    }

    /// Perform a fully described request.
    pub fn execute(
        &self,
        descriptor: RequestDescriptor,
        correlator: RequestCorrelator,
    ) -> RequestHandle {
        let name = descriptor.method.as_str().to_ascii_lowercase();
        self.launch(&name, correlator, move |ctx, _| {
            run_request(ctx.transport.as_ref(), &descriptor, &ctx.config)
        })
    }

    /// Check connectivity, then run `job` on a new worker and dispatch its outcome.
    fn launch<F>(&self, kind: &str, correlator: RequestCorrelator, job: F) -> RequestHandle
    where
        F: FnOnce(&WorkerContext, &RequestCorrelator) -> Outcome + Send + 'static,
    {
        let id = RequestId::next();
        let dispatcher = self.dispatcher();

        if !self.probe.is_connected() {
            tracing::warn!(target: "courier_net::http", request = %id, "no network connection");
            dispatcher.dispatch(Outcome::Error(ErrorKind::NoConnection), &correlator);
            return RequestHandle { id, worker: None };
        }

        let mut config = self.config.clone();
        config.debug_requests = self.is_debugging_enabled();
        let ctx = WorkerContext {
            transport: self.transport.clone(),
            config,
            dispatcher: dispatcher.clone(),
        };
        let worker_correlator = correlator.clone();

        let spawned = spawn_worker(format!("courier-{kind}-{id}"), move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&ctx, &worker_correlator)))
                .unwrap_or_else(|_| {
                    tracing::error!(target: "courier_net::http", request = %id, "request worker panicked");
                    Outcome::Error(ErrorKind::ServerError)
                });
            ctx.dispatcher.dispatch(outcome, &worker_correlator);
        });

        match spawned {
            Ok(worker) => RequestHandle {
                id,
                worker: Some(worker),
            },
            Err(err) => {
                tracing::error!(target: "courier_net::http", request = %id, error = %err, "failed to start request");
                dispatcher.dispatch(Outcome::Error(ErrorKind::ServerError), &correlator);
                RequestHandle { id, worker: None }
            }
        }
    }
}

fn deliver(listener: &mut Option<Box<dyn HttpEvents>>, event: HttpEvent) {
    match listener.as_deref_mut() {
        Some(listener) => event.deliver_to(listener),
        None => tracing::trace!(target: "courier_net::dispatch", "no listener, event discarded"),
    }
}

impl fmt::Debug for Http {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http")
            .field("config", &self.config)
            .field("has_listener", &self.listener.is_some())
            .field("pending_events", &self.event_loop.pending_count())
            .finish_non_exhaustive()
    }
}
