//! Streaming, deflate-compressed file uploads.
//!
//! The file is read in fixed-size chunks and every chunk is pushed through a
//! zlib (HTTP `deflate`) encoder that writes straight into the connection's
//! output stream, so the whole file is never held in memory. Progress is
//! reported through a [`ProgressThrottle`] that outlives individual attempts:
//! a retry restarts the upload from byte zero, but the listener never sees
//! the count go backwards.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::write::ZlibEncoder;
use url::Url;

use super::client::HttpConfig;
use super::dispatch::Outcome;
use super::request::{HttpMethod, RequestDescriptor, RequestOptions};
use super::retry::{parse_address, read_exchange, run_with_retries};
use super::transport::{ConnectionGuard, ConnectionSettings, Transport};
use crate::error::{NetworkError, Result};

/// Largest file that can be uploaded, in bytes.
pub const MAX_UPLOAD_SIZE: u64 = i32::MAX as u64;

/// Content type sent with file uploads.
pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Rate limiter for progress events.
///
/// Emits when nothing has been emitted yet, when at least `interval` has
/// passed since the last emission, or when the transfer is complete. A count
/// lower than one already reported is never emitted, which keeps the
/// sequence non-decreasing across retries.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    reported: u64,
}

impl ProgressThrottle {
    /// Create a throttle with the given minimum spacing.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            reported: 0,
        }
    }

    /// Decide whether `processed` out of `total` should be reported now.
    pub fn should_emit(&mut self, processed: u64, total: u64) -> bool {
        self.should_emit_at(processed, total, Instant::now())
    }

    /// [`should_emit`](Self::should_emit) with an explicit clock.
    pub fn should_emit_at(&mut self, processed: u64, total: u64, now: Instant) -> bool {
        let is_final = processed >= total;
        let due = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);

        if !is_final && !due {
            return false;
        }
        if processed < self.reported {
            return false;
        }
        if processed == self.reported && self.last_emit.is_some() && !is_final {
            return false;
        }

        self.last_emit = Some(now);
        self.reported = processed;
        true
    }

    /// The highest count reported so far.
    pub fn reported(&self) -> u64 {
        self.reported
    }
}

/// Build the descriptor for a file upload.
///
/// Uploads are always `POST` with the fixed content headers, and use the
/// long upload read timeout unless the caller overrides it.
pub fn upload_descriptor(
    address: &str,
    options: &RequestOptions,
    config: &HttpConfig,
) -> RequestDescriptor {
    options
        .descriptor(
            HttpMethod::Post,
            address,
            config,
            (config.connect_timeout, config.upload_read_timeout),
        )
        .content_type(UPLOAD_CONTENT_TYPE)
        .header("Content-encoding", "deflate")
        .header("Content-Language", "en-GB")
}

/// Check that `path` can be uploaded and return its size.
pub fn check_upload_file(path: &Path) -> Result<u64> {
    let metadata =
        fs::metadata(path).map_err(|err| NetworkError::local_file(path, err.to_string()))?;
    if !metadata.is_file() {
        return Err(NetworkError::local_file(path, "not a regular file"));
    }
    if metadata.len() > MAX_UPLOAD_SIZE {
        return Err(NetworkError::local_file(path, "file is 2 GiB or larger"));
    }
    Ok(metadata.len())
}

/// One upload attempt, from byte zero.
pub fn upload_attempt(
    transport: &dyn Transport,
    url: &Url,
    descriptor: &RequestDescriptor,
    path: &Path,
    config: &HttpConfig,
    throttle: &mut ProgressThrottle,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<String> {
    let total = check_upload_file(path)?;
    let mut file = File::open(path).map_err(|err| NetworkError::local_file(path, err.to_string()))?;

    let mut conn = ConnectionGuard::new(transport.open(url)?);
    conn.configure(&ConnectionSettings::from_descriptor(descriptor))?;

    {
        let out = conn.output_stream()?;
        let mut encoder = ZlibEncoder::new(out, Compression::default());
        let mut buffer = vec![0u8; config.chunk_size.max(1)];
        let mut uploaded = 0u64;

        if total == 0 && throttle.should_emit(0, 0) {
            on_progress(0, 0);
        }

        loop {
            let n = fill_chunk(&mut file, &mut buffer)?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buffer[..n])?;
            uploaded += n as u64;

            if throttle.should_emit(uploaded, total) {
                on_progress(uploaded, total);
            }
        }

        tracing::debug!(target: "courier_net::upload", bytes = uploaded, "upload body written");

        // Compressor first, then the transport stream.
        let out = encoder.finish()?;
        out.flush()?;
    }
    conn.close_output()?;

    let body = read_exchange(&mut conn, descriptor)?;
    conn.release();

    if config.debug_requests {
        tracing::debug!(target: "courier_net::upload", body = %body, "upload response");
    }
    Ok(body)
}

/// Upload `path` with retries and return the outcome.
pub fn run_upload(
    transport: &dyn Transport,
    descriptor: &RequestDescriptor,
    path: &Path,
    config: &HttpConfig,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Outcome {
    let url = match parse_address(&descriptor.address) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(target: "courier_net::upload", address = %descriptor.address, error = %err, "invalid address");
            return Outcome::Error(err.kind());
        }
    };

    if config.debug_requests {
        tracing::debug!(target: "courier_net::upload", url = %url, file = %path.display(), "upload");
    }

    let mut throttle = ProgressThrottle::new(config.progress_interval);
    match run_with_retries(descriptor.max_retries, &config.retry, |_| {
        upload_attempt(
            transport,
            &url,
            descriptor,
            path,
            config,
            &mut throttle,
            &mut *on_progress,
        )
    }) {
        Ok(body) => Outcome::Success(body),
        Err(kind) => Outcome::Error(kind),
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_chunk(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
