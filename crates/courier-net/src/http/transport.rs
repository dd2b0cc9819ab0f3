//! Pluggable transport seam.
//!
//! The retry controller, uploader and downloader only ever talk to a
//! [`Transport`] and the [`Connection`]s it opens. Connections are blocking:
//! every call may park the worker thread for up to the configured timeout.
//! [`ReqwestTransport`](super::ReqwestTransport) is the default
//! implementation; tests substitute scripted ones.

use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use url::Url;

use super::request::{HttpMethod, RequestDescriptor};
use crate::error::Result;

/// Opens connections to URLs.
///
/// Implementations must be safe to share between any number of worker
/// threads.
pub trait Transport: Send + Sync {
    /// Open a connection to `url`. No I/O needs to happen yet.
    fn open(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

/// One HTTP exchange.
///
/// The expected call order is `configure`, then optionally `output_stream`
/// and `close_output` (or `write_body`), then `response_code`,
/// `response_header` and `input_stream`, and finally `disconnect`.
pub trait Connection: Send {
    /// Apply method, headers and timeouts.
    fn configure(&mut self, settings: &ConnectionSettings) -> Result<()>;

    /// The stream the request body is written to.
    fn output_stream(&mut self) -> Result<&mut (dyn Write + Send)>;

    /// Signal that the request body is complete.
    fn close_output(&mut self) -> Result<()>;

    /// Write a complete body in one go.
    fn write_body(&mut self, body: &[u8]) -> Result<()> {
        let out = self.output_stream()?;
        out.write_all(body)?;
        out.flush()?;
        self.close_output()
    }

    /// Send the request if necessary and return the status code.
    fn response_code(&mut self) -> Result<u16>;

    /// A response header value, once the status is known.
    fn response_header(&self, name: &str) -> Option<String>;

    /// The response body stream. Can be taken once.
    fn input_stream(&mut self) -> Result<Box<dyn Read + Send>>;

    /// Release every resource held by the connection. Must be idempotent.
    fn disconnect(&mut self);
}

/// Per-connection settings derived from a request descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionSettings {
    /// The HTTP method.
    pub method: HttpMethod,
    /// Every header to send, automatic ones included.
    pub headers: Vec<(String, String)>,
    /// The content type, also present in `headers`.
    pub content_type: Option<String>,
    /// Body length when known up front.
    pub body_length: Option<u64>,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout.
    pub read_timeout: Duration,
    /// Whether caching was allowed.
    pub allow_caching: bool,
}

impl ConnectionSettings {
    /// Build settings for a descriptor, adding the automatic headers.
    ///
    /// An automatic header replaces any caller header of the same name.
    pub fn from_descriptor(descriptor: &RequestDescriptor) -> Self {
        let mut headers: Vec<(String, String)> = descriptor
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if !descriptor.allow_caching {
            set_header(&mut headers, "Cache-Control", "no-cache");
        }
        if let Some(content_type) = &descriptor.content_type {
            set_header(&mut headers, "Content-Type", content_type);
        }

        Self {
            method: descriptor.method,
            headers,
            content_type: descriptor.content_type.clone(),
            body_length: descriptor.body.as_ref().map(|b| b.len() as u64),
            connect_timeout: descriptor.connect_timeout,
            read_timeout: descriptor.read_timeout,
            allow_caching: descriptor.allow_caching,
        }
    }

    /// Look up a header, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

/// Disconnects the wrapped connection exactly once, on every exit path.
pub struct ConnectionGuard {
    connection: Box<dyn Connection>,
    released: bool,
}

impl ConnectionGuard {
    /// Take ownership of an opened connection.
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            connection,
            released: false,
        }
    }

    /// Disconnect now instead of at drop.
    pub fn release(mut self) {
        self.disconnect_once();
    }

    fn disconnect_once(&mut self) {
        if !self.released {
            self.released = true;
            self.connection.disconnect();
        }
    }
}

impl Deref for ConnectionGuard {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl DerefMut for ConnectionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.disconnect_once();
    }
}
