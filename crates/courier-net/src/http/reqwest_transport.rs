//! Default transport built on `reqwest`.
//!
//! Workers are plain OS threads, so each blocking [`Connection`] call drives
//! the async client to completion on the shared tokio [`runtime`]. Request
//! bodies are streamed: bytes written to the output stream travel through a
//! bounded channel into a `reqwest::Body` while the request is in flight.
//! Bodies known up front are sent whole with a `Content-Length`.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use reqwest::header::CONTENT_LENGTH;
use reqwest::redirect::Policy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use super::transport::{Connection, ConnectionSettings, Transport};
use crate::error::{NetworkError, Result};

/// Chunks buffered between the writer and the in-flight request.
const BODY_CHANNEL_CAPACITY: usize = 8;

/// Shared async runtime used by the reqwest transport.
pub mod runtime {
    use std::future::Future;
    use std::sync::OnceLock;
    use std::time::Duration;
    use tokio::runtime::Runtime;
    use tokio::time::error::Elapsed;

    static RUNTIME: OnceLock<Runtime> = OnceLock::new();

    /// Initialize the async runtime.
    ///
    /// If not called explicitly, the runtime is created on first use.
    pub fn init() -> &'static Runtime {
        RUNTIME.get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("courier-io")
                .enable_all()
                .build()
                .expect("Failed to create tokio runtime")
        })
    }

    /// Get a reference to the async runtime.
    pub fn get() -> &'static Runtime {
        init()
    }

    /// Block on a future using the global runtime.
    ///
    /// # Warning
    ///
    /// Only call this from worker threads. Calling it from inside an async
    /// context panics.
    pub fn block_on<F: Future>(future: F) -> F::Output {
        get().block_on(future)
    }

    /// Block on a future with a deadline.
    ///
    /// The timer is created inside the runtime, so callers on plain threads
    /// need no runtime context of their own.
    pub fn block_on_timeout<F: Future>(
        duration: Duration,
        future: F,
    ) -> Result<F::Output, Elapsed> {
        block_on(async move { tokio::time::timeout(duration, future).await })
    }

    /// Spawn a future on the global runtime.
    pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        get().spawn(future)
    }
}

/// Configuration for the reqwest transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Connect timeout of the client built with the transport.
    ///
    /// Each request still connects within its own configured timeout.
    pub connect_timeout: Duration,
    /// Whether to follow redirects.
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// User agent header.
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            follow_redirects: true,
            max_redirects: 10,
            user_agent: Some(format!("Courier/{} (Rust)", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Default)]
pub struct ReqwestTransportBuilder {
    config: TransportConfig,
}

impl ReqwestTransportBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Disable redirect following.
    pub fn no_redirects(mut self) -> Self {
        self.config.follow_redirects = false;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<ReqwestTransport> {
        let pool = ClientPool::new(self.config);
        // Client configuration errors surface at build time.
        pool.client(pool.config.connect_timeout)?;
        Ok(ReqwestTransport { pool })
    }
}

fn build_client(config: &TransportConfig, connect_timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);

    if config.follow_redirects {
        builder = builder.redirect(Policy::limited(config.max_redirects));
    } else {
        builder = builder.redirect(Policy::none());
    }

    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua);
    }

    Ok(builder.build()?)
}

/// Clients keyed by connect timeout.
///
/// reqwest fixes the connect timeout per client, so every distinct timeout
/// gets a client of its own. Clones share the same clients.
#[derive(Clone)]
struct ClientPool {
    config: TransportConfig,
    clients: Arc<Mutex<HashMap<Duration, reqwest::Client>>>,
}

impl ClientPool {
    fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn client(&self, connect_timeout: Duration) -> Result<reqwest::Client> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, connect_timeout)?;
        clients.insert(connect_timeout, client.clone());
        tracing::trace!(
            target: "courier_net::http",
            connect_timeout_ms = connect_timeout.as_millis() as u64,
            "Built HTTP client"
        );
        Ok(client)
    }

    #[cfg(test)]
    fn connect_timeouts(&self) -> Vec<Duration> {
        let mut timeouts: Vec<Duration> = self.clients.lock().keys().copied().collect();
        timeouts.sort();
        timeouts
    }
}

/// Transport that performs real HTTP through `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    pool: ClientPool,
}

impl ReqwestTransport {
    /// Create a transport with default settings.
    pub fn new() -> Result<Self> {
        ReqwestTransportBuilder::new().build()
    }

    /// Create a builder.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    /// The transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.pool.config
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.pool.config)
            .finish_non_exhaustive()
    }
}

impl Transport for ReqwestTransport {
    fn open(&self, url: &Url) -> Result<Box<dyn Connection>> {
        Ok(Box::new(ReqwestConnection::new(self.pool.clone(), url.clone())))
    }
}

type PendingResponse = JoinHandle<reqwest::Result<reqwest::Response>>;

/// A single request/response exchange over reqwest.
struct ReqwestConnection {
    pool: ClientPool,
    url: Url,
    settings: Option<ConnectionSettings>,
    writer: Option<BodyWriter>,
    pending: Option<PendingResponse>,
    status: Option<u16>,
    headers: http::HeaderMap,
    response: Option<reqwest::Response>,
}

impl ReqwestConnection {
    fn new(pool: ClientPool, url: Url) -> Self {
        Self {
            pool,
            url,
            settings: None,
            writer: None,
            pending: None,
            status: None,
            headers: http::HeaderMap::new(),
            response: None,
        }
    }

    fn settings(&self) -> Result<&ConnectionSettings> {
        self.settings
            .as_ref()
            .ok_or_else(|| NetworkError::Request("connection used before configure".to_string()))
    }

    fn build_request(&self) -> Result<reqwest::RequestBuilder> {
        let settings = self.settings()?;
        let mut headers = http::HeaderMap::new();
        for (name, value) in &settings.headers {
            headers.append(
                http::HeaderName::from_bytes(name.as_bytes())?,
                http::HeaderValue::from_str(value)?,
            );
        }
        let client = self.pool.client(settings.connect_timeout)?;
        Ok(client
            .request(settings.method.to_reqwest(), self.url.clone())
            .headers(headers))
    }

    fn body_started(&self) -> bool {
        self.writer.is_some() || self.pending.is_some() || self.status.is_some()
    }

    fn send(&mut self) -> Result<reqwest::Response> {
        let settings = self.settings()?;
        let send_timeout = settings.connect_timeout + settings.read_timeout;

        // Closing the writer ends the streamed body.
        self.writer = None;

        match self.pending.take() {
            Some(mut pending) => match runtime::block_on_timeout(send_timeout, &mut pending) {
                Err(_) => {
                    pending.abort();
                    Err(NetworkError::Timeout)
                }
                Ok(Err(join)) => Err(NetworkError::Request(join.to_string())),
                Ok(Ok(response)) => Ok(response?),
            },
            None => {
                let request = self.build_request()?;
                match runtime::block_on_timeout(send_timeout, request.send()) {
                    Err(_) => Err(NetworkError::Timeout),
                    Ok(response) => Ok(response?),
                }
            }
        }
    }
}

impl Connection for ReqwestConnection {
    fn configure(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn output_stream(&mut self) -> Result<&mut (dyn Write + Send)> {
        if self.writer.is_none() {
            if self.pending.is_some() || self.status.is_some() {
                return Err(NetworkError::Io("request body already closed".to_string()));
            }

            let settings = self.settings()?;
            let write_timeout = settings.read_timeout;
            let body_length = settings.body_length;
            let (sender, receiver) = mpsc::channel::<io::Result<Bytes>>(BODY_CHANNEL_CAPACITY);
            let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|chunk| (chunk, receiver))
            });
            let mut request = self.build_request()?;
            if let Some(length) = body_length {
                request = request.header(CONTENT_LENGTH, length);
            }
            let request = request.body(reqwest::Body::wrap_stream(stream));

            self.pending = Some(runtime::spawn(request.send()));
            self.writer = Some(BodyWriter {
                sender,
                write_timeout,
            });
        }

        match self.writer.as_mut() {
            Some(writer) => Ok(writer as &mut (dyn Write + Send)),
            None => Err(NetworkError::Io("request body unavailable".to_string())),
        }
    }

    fn write_body(&mut self, body: &[u8]) -> Result<()> {
        if self.body_started() {
            return Err(NetworkError::Io("request body already started".to_string()));
        }
        let request = self.build_request()?.body(Bytes::copy_from_slice(body));
        self.pending = Some(runtime::spawn(request.send()));
        Ok(())
    }

    fn close_output(&mut self) -> Result<()> {
        self.writer = None;
        Ok(())
    }

    fn response_code(&mut self) -> Result<u16> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let response = self.send()?;
        let status = response.status().as_u16();
        self.headers = response.headers().clone();
        self.status = Some(status);
        self.response = Some(response);
        Ok(status)
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn input_stream(&mut self) -> Result<Box<dyn Read + Send>> {
        if self.status.is_none() {
            self.response_code()?;
        }
        let read_timeout = self.settings()?.read_timeout;
        match self.response.take() {
            Some(response) => Ok(Box::new(ResponseStream {
                response,
                buffer: Bytes::new(),
                read_timeout,
            })),
            None => Err(NetworkError::Io("response stream already taken".to_string())),
        }
    }

    fn disconnect(&mut self) {
        self.writer = None;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.response = None;
    }
}

/// Feeds written bytes into the streamed request body.
struct BodyWriter {
    sender: mpsc::Sender<io::Result<Bytes>>,
    write_timeout: Duration,
}

impl Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = Bytes::copy_from_slice(buf);
        match runtime::block_on_timeout(self.write_timeout, self.sender.send(Ok(chunk))) {
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "request body write timed out")),
            Ok(Err(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "request was closed by the server",
            )),
            Ok(Ok(())) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocking `Read` over a streamed response body.
struct ResponseStream {
    response: reqwest::Response,
    buffer: Bytes,
    read_timeout: Duration,
}

impl Read for ResponseStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.buffer.is_empty() {
            let next = runtime::block_on_timeout(self.read_timeout, self.response.chunk());
            match next {
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "response read timed out"));
                }
                Ok(Err(err)) if err.is_timeout() => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, err));
                }
                Ok(Err(err)) => return Err(io::Error::other(err)),
                Ok(Ok(None)) => return Ok(0),
                Ok(Ok(Some(chunk))) => self.buffer = chunk,
            }
        }

        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{HttpMethod, RequestDescriptor};

    #[test]
    fn test_builder_config() {
        let transport = ReqwestTransport::builder()
            .connect_timeout(Duration::from_secs(1))
            .no_redirects()
            .user_agent("courier-test")
            .build()
            .unwrap();

        assert_eq!(transport.config().connect_timeout, Duration::from_secs(1));
        assert!(!transport.config().follow_redirects);
        assert_eq!(transport.config().user_agent.as_deref(), Some("courier-test"));
    }

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(3000));
        assert!(config.follow_redirects);
        assert!(config.user_agent.unwrap().starts_with("Courier/"));
    }

    #[test]
    fn test_client_per_connect_timeout() {
        let transport = ReqwestTransport::new().unwrap();
        assert_eq!(transport.pool.connect_timeouts(), vec![Duration::from_millis(3000)]);

        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let desc = RequestDescriptor::new(HttpMethod::Get, url.as_str())
            .connect_timeout(Duration::from_secs(10));
        let mut conn = ReqwestConnection::new(transport.pool.clone(), url.clone());
        conn.configure(&ConnectionSettings::from_descriptor(&desc)).unwrap();
        conn.build_request().unwrap();
        conn.build_request().unwrap();

        assert_eq!(
            transport.pool.connect_timeouts(),
            vec![Duration::from_millis(3000), Duration::from_secs(10)]
        );

        let clone = transport.clone();
        let mut conn = ReqwestConnection::new(clone.pool.clone(), url);
        conn.configure(&ConnectionSettings::from_descriptor(&desc)).unwrap();
        conn.build_request().unwrap();
        assert_eq!(transport.pool.connect_timeouts().len(), 2);
    }

    #[test]
    fn test_use_before_configure_is_an_error() {
        let transport = ReqwestTransport::new().unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let mut conn = transport.open(&url).unwrap();
        assert!(matches!(conn.response_code(), Err(NetworkError::Request(_))));
        conn.disconnect();
        conn.disconnect();
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let transport = ReqwestTransport::new().unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let mut conn = transport.open(&url).unwrap();

        let desc = RequestDescriptor::new(HttpMethod::Get, url.as_str()).header("Bad Header", "x");
        conn.configure(&ConnectionSettings::from_descriptor(&desc)).unwrap();
        assert!(matches!(conn.response_code(), Err(NetworkError::InvalidHeader(_))));
    }
}
