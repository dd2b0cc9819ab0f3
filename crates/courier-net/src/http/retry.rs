//! The retry controller.
//!
//! A logical request is a loop of attempts with a retries-remaining counter.
//! Each attempt reports a [`NetworkError`] on failure and the loop decides,
//! from [`NetworkError::is_retryable`], whether to go around again. The
//! counter only ever goes down.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::client::HttpConfig;
use super::dispatch::Outcome;
use super::request::RequestDescriptor;
use super::response::{is_success_status, read_response};
use super::transport::{ConnectionGuard, ConnectionSettings, Transport};
use crate::error::{ErrorKind, NetworkError, Result};

/// Optional pause between attempts.
///
/// The default has no delay, so a request blocks its worker for at most
/// `timeout * (max_retries + 1)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff starting at `initial` and capped at `max`.
    pub fn with_backoff(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            ..Self::default()
        }
    }

    /// The pause before retry number `retry_count` (1-based).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if self.initial_delay_ms == 0 || retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if delay.is_finite() { delay as u64 } else { u64::MAX };
        Duration::from_millis(delay.min(self.max_delay_ms.max(self.initial_delay_ms)))
    }
}

/// Run `attempt` until it succeeds, fails terminally, or the budget is spent.
///
/// `attempt` receives the number of retries still available. A retryable
/// failure with budget left is retried; once the budget is spent the result
/// is [`ErrorKind::ServerError`]. Terminal failures return their own kind
/// immediately.
pub fn run_with_retries<T, F>(
    max_retries: u32,
    config: &RetryConfig,
    mut attempt: F,
) -> std::result::Result<T, ErrorKind>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut remaining = max_retries;
    let mut retry_count = 0;

    loop {
        match attempt(remaining) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && remaining > 0 => {
                remaining -= 1;
                retry_count += 1;
                tracing::warn!(
                    target: "courier_net::http",
                    error = %err,
                    retries_remaining = remaining,
                    "attempt failed, retrying"
                );
                let delay = config.delay_for(retry_count);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(
                    target: "courier_net::http",
                    error = %err,
                    attempts = max_retries as u64 + 1,
                    "retries exhausted"
                );
                return Err(ErrorKind::ServerError);
            }
            Err(err) => {
                tracing::warn!(target: "courier_net::http", error = %err, "request failed");
                return Err(err.kind());
            }
        }
    }
}

/// Parse a request address. Only `http` and `https` are accepted.
pub fn parse_address(address: &str) -> Result<Url> {
    let url = Url::parse(address)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(NetworkError::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
}

/// One attempt of a generic request.
pub fn execute_attempt(
    transport: &dyn Transport,
    url: &Url,
    descriptor: &RequestDescriptor,
    debug: bool,
) -> Result<String> {
    let mut conn = ConnectionGuard::new(transport.open(url)?);
    conn.configure(&ConnectionSettings::from_descriptor(descriptor))?;

    if let Some(body) = &descriptor.body {
        if debug {
            tracing::debug!(
                target: "courier_net::http",
                body = %String::from_utf8_lossy(body),
                "request body"
            );
        }
        conn.write_body(body)?;
    }

    let body = read_exchange(&mut conn, descriptor)?;
    conn.release();

    if debug {
        tracing::debug!(target: "courier_net::http", body = %body, "response body");
    }
    Ok(body)
}

/// Read the status and body of a connection whose request is complete.
///
/// Non-success statuses are logged and the body is read anyway; only an empty
/// or unreadable body is a failure.
pub(crate) fn read_exchange(
    conn: &mut ConnectionGuard,
    descriptor: &RequestDescriptor,
) -> Result<String> {
    let status = conn.response_code()?;
    if is_success_status(status) {
        tracing::debug!(target: "courier_net::http", status, method = %descriptor.method, "response received");
    } else {
        tracing::warn!(
            target: "courier_net::http",
            status,
            method = %descriptor.method,
            address = %descriptor.address,
            "non-success status, reading body anyway"
        );
    }

    conn.input_stream()
        .ok()
        .and_then(read_response)
        .ok_or(NetworkError::EmptyResponse)
}

/// Perform a generic request with retries and return its outcome.
pub fn run_request(
    transport: &dyn Transport,
    descriptor: &RequestDescriptor,
    config: &HttpConfig,
) -> Outcome {
    let url = match parse_address(&descriptor.address) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(target: "courier_net::http", address = %descriptor.address, error = %err, "invalid address");
            return Outcome::Error(err.kind());
        }
    };

    if config.debug_requests {
        tracing::debug!(target: "courier_net::http", method = %descriptor.method, url = %url, "request");
    }

    match run_with_retries(descriptor.max_retries, &config.retry, |_| {
        execute_attempt(transport, &url, descriptor, config.debug_requests)
    }) {
        Ok(body) => Outcome::Success(body),
        Err(kind) => Outcome::Error(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_success_on_first_attempt() {
        let calls = Cell::new(0);
        let result = run_with_retries(3, &RetryConfig::default(), |_| {
            calls.set(calls.get() + 1);
            Ok("done")
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_always_timing_out_makes_n_plus_one_attempts() {
        for max_retries in [0, 1, 5] {
            let calls = Cell::new(0);
            let result: std::result::Result<(), _> =
                run_with_retries(max_retries, &RetryConfig::default(), |_| {
                    calls.set(calls.get() + 1);
                    Err(NetworkError::Timeout)
                });
            assert_eq!(result, Err(ErrorKind::ServerError));
            assert_eq!(calls.get(), max_retries + 1);
        }
    }

    #[test]
    fn test_remaining_counter_never_increases() {
        let mut seen = Vec::new();
        let _: std::result::Result<(), _> =
            run_with_retries(4, &RetryConfig::default(), |remaining| {
                seen.push(remaining);
                Err(NetworkError::Io("flaky".into()))
            });
        assert_eq!(seen, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_terminal_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: std::result::Result<(), _> = run_with_retries(5, &RetryConfig::default(), |_| {
            calls.set(calls.get() + 1);
            Err(NetworkError::local_file("/missing", "not found"))
        });
        assert_eq!(result, Err(ErrorKind::LocalFileInvalid));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let result = run_with_retries(3, &RetryConfig::default(), |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(NetworkError::Connection("reset".into()))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_empty_response_is_terminal() {
        let result: std::result::Result<(), _> =
            run_with_retries(2, &RetryConfig::default(), |_| Err(NetworkError::EmptyResponse));
        assert_eq!(result, Err(ErrorKind::EmptyResponse));
    }

    #[test]
    fn test_default_has_no_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::ZERO);
        assert_eq!(config.delay_for(10), Duration::ZERO);
    }

    #[test]
    fn test_backoff_delay() {
        let config =
            RetryConfig::with_backoff(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(500));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address("https://example.com/files/data.csv").is_ok());
        assert!(matches!(parse_address("not a url"), Err(NetworkError::InvalidUrl(_))));
        assert!(matches!(parse_address("ftp://example.com/x"), Err(NetworkError::InvalidUrl(_))));
    }
}
