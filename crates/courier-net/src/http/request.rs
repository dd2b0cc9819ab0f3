//! Request types: methods, descriptors, correlators and per-call options.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::client::HttpConfig;
use crate::error::NetworkError;

/// HTTP request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP PATCH method.
    Patch,
    /// HTTP DELETE method.
    Delete,
}

impl HttpMethod {
    /// The method token as sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(NetworkError::Request(format!("unsupported method: {other}"))),
        }
    }
}

/// Caller-supplied key-value payload echoed back with every outcome event.
///
/// The map is never inspected or modified by the client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extras(BTreeMap<String, serde_json::Value>);

impl Extras {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for Extras {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Correlates outcome events with the call that caused them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestCorrelator {
    /// Caller tag. `None` makes the call fire-and-forget: completion, error
    /// and download events are not delivered.
    pub request_code: Option<i32>,
    /// Opaque payload passed through unmodified.
    pub extras: Extras,
}

impl RequestCorrelator {
    /// Create a correlator.
    pub fn new(request_code: Option<i32>, extras: Extras) -> Self {
        Self {
            request_code,
            extras,
        }
    }

    /// A correlator with no request code and no extras.
    pub fn fire_and_forget() -> Self {
        Self::default()
    }
}

/// Everything needed to perform one logical request.
///
/// A descriptor is immutable once the first attempt begins; every retry
/// reuses it unchanged.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    /// The HTTP method.
    pub method: HttpMethod,
    /// The request address, parsed before the first attempt.
    pub address: String,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<Bytes>,
    /// Value of the `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// When false, `Cache-Control: no-cache` is sent.
    pub allow_caching: bool,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout.
    pub read_timeout: Duration,
    /// How many times a retryable failure is retried.
    pub max_retries: u32,
}

impl RequestDescriptor {
    /// Default connect timeout for generic requests.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);
    /// Default read timeout for generic requests.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);
    /// Default retry budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Create a descriptor with default settings.
    pub fn new(method: HttpMethod, address: impl Into<String>) -> Self {
        Self {
            method,
            address: address.into(),
            headers: BTreeMap::new(),
            body: None,
            content_type: None,
            allow_caching: true,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add several headers.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Allow or forbid intermediate caching.
    pub fn allow_caching(mut self, allow: bool) -> Self {
        self.allow_caching = allow;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set both connect and read timeouts.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.connect_timeout(timeout).read_timeout(timeout)
    }

    /// Set the retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Per-call knobs shared by every public operation.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Caller tag; `None` means fire-and-forget.
    pub request_code: Option<i32>,
    /// Retry budget; falls back to the client's default.
    pub max_retries: Option<u32>,
    /// Overrides both connect and read timeouts when set.
    pub timeout: Option<Duration>,
    /// When false, `Cache-Control: no-cache` is sent. Defaults to true.
    pub disallow_caching: bool,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Opaque payload echoed back with every event.
    pub extras: Extras,
}

impl RequestOptions {
    /// Options with defaults and no request code.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options tagged with a request code.
    pub fn with_code(request_code: i32) -> Self {
        Self::default().request_code(request_code)
    }

    /// Set the request code.
    pub fn request_code(mut self, code: i32) -> Self {
        self.request_code = Some(code);
        self
    }

    /// Set the retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the timeout used for both connecting and reading.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allow or forbid intermediate caching.
    pub fn allow_caching(mut self, allow: bool) -> Self {
        self.disallow_caching = !allow;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the extras payload.
    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    /// Build the correlator for this call.
    pub fn correlator(&self) -> RequestCorrelator {
        RequestCorrelator::new(self.request_code, self.extras.clone())
    }

    /// Build a descriptor carrying these options.
    ///
    /// `timeouts` are the operation's default `(connect, read)` pair; an
    /// explicit [`timeout`](Self::timeout) overrides both.
    pub(crate) fn descriptor(
        &self,
        method: HttpMethod,
        address: &str,
        config: &HttpConfig,
        timeouts: (Duration, Duration),
    ) -> RequestDescriptor {
        let (connect, read) = match self.timeout {
            Some(timeout) => (timeout, timeout),
            None => timeouts,
        };
        RequestDescriptor::new(method, address)
            .headers(self.headers.clone())
            .allow_caching(!self.disallow_caching)
            .connect_timeout(connect)
            .read_timeout(read)
            .max_retries(self.max_retries.unwrap_or(config.default_max_retries))
    }
}
