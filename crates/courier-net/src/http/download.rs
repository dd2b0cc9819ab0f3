//! File downloads to a local directory.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use url::Url;

use super::client::HttpConfig;
use super::dispatch::Outcome;
use super::request::RequestDescriptor;
use super::response::is_success_status;
use super::retry::{parse_address, run_with_retries};
use super::transport::{ConnectionGuard, ConnectionSettings, Transport};
use super::upload::ProgressThrottle;
use crate::error::{NetworkError, Result};

/// Pick the local file name for a download.
///
/// Precedence: `desired`, then the `filename=` value of a
/// `Content-Disposition` header, then the last segment of the URL path. The
/// result is reduced to a bare file name so it cannot escape the destination
/// directory.
pub fn resolve_file_name(
    desired: Option<&str>,
    content_disposition: Option<&str>,
    url: &Url,
) -> Option<String> {
    desired
        .and_then(bare_file_name)
        .or_else(|| content_disposition.and_then(disposition_file_name))
        .or_else(|| {
            url.path_segments()
                .and_then(|segments| segments.last())
                .and_then(bare_file_name)
        })
}

/// The text after `filename=` to the end of the header, quotes trimmed.
fn disposition_file_name(header: &str) -> Option<String> {
    const TOKEN: &str = "filename=";
    let start = header.find(TOKEN)? + TOKEN.len();
    let value = header[start..].trim().trim_matches('"');
    bare_file_name(value)
}

fn bare_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    match last {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// One download attempt, from byte zero.
#[allow(clippy::too_many_arguments)]
pub fn download_attempt(
    transport: &dyn Transport,
    url: &Url,
    descriptor: &RequestDescriptor,
    destination_dir: &Path,
    desired_name: Option<&str>,
    config: &HttpConfig,
    throttle: &mut ProgressThrottle,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<PathBuf> {
    if !destination_dir.is_dir() {
        return Err(NetworkError::local_file(destination_dir, "destination is not a directory"));
    }

    let mut conn = ConnectionGuard::new(transport.open(url)?);
    conn.configure(&ConnectionSettings::from_descriptor(descriptor))?;

    let status = conn.response_code()?;
    if !is_success_status(status) {
        return Err(NetworkError::HttpStatus { status });
    }

    let disposition = conn.response_header("Content-Disposition");
    let name = resolve_file_name(desired_name, disposition.as_deref(), url).ok_or_else(|| {
        NetworkError::local_file(destination_dir, "could not determine a file name")
    })?;
    let path = destination_dir.join(name);

    let total = conn
        .response_header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());

    let mut input = conn.input_stream()?;
    let mut file =
        File::create(&path).map_err(|err| NetworkError::local_file(&path, err.to_string()))?;
    let copied = copy_body(
        input.as_mut(),
        &mut file,
        config.chunk_size,
        total,
        throttle,
        on_progress,
    );
    drop(file);
    drop(input);

    let downloaded = match copied {
        Ok(downloaded) => downloaded,
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(&path) {
                tracing::warn!(
                    target: "courier_net::download",
                    path = %path.display(),
                    error = %remove_err,
                    "failed to remove partial download"
                );
            }
            return Err(err);
        }
    };
    conn.release();

    // Without a Content-Length only the completed size is known.
    let final_total = total.unwrap_or(downloaded);
    if (total.is_none() || downloaded == 0) && throttle.should_emit(downloaded, final_total) {
        on_progress(downloaded, final_total);
    }

    tracing::debug!(
        target: "courier_net::download",
        bytes = downloaded,
        path = %path.display(),
        "download written"
    );

    if !path.exists() {
        return Err(NetworkError::local_file(&path, "file missing after download"));
    }
    Ok(path)
}

/// Copy the response body into `file`, reporting progress against `total`.
fn copy_body(
    input: &mut dyn Read,
    file: &mut File,
    chunk_size: usize,
    total: Option<u64>,
    throttle: &mut ProgressThrottle,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<u64> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut downloaded = 0u64;

    loop {
        let n = input.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        downloaded += n as u64;

        if let Some(total) = total
            && throttle.should_emit(downloaded, total)
        {
            on_progress(downloaded, total);
        }
    }
    file.flush()?;
    Ok(downloaded)
}

/// Download with retries and return the outcome.
pub fn run_download(
    transport: &dyn Transport,
    descriptor: &RequestDescriptor,
    destination_dir: &Path,
    desired_name: Option<&str>,
    config: &HttpConfig,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Outcome {
    let url = match parse_address(&descriptor.address) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(target: "courier_net::download", address = %descriptor.address, error = %err, "invalid address");
            return Outcome::Error(err.kind());
        }
    };

    if config.debug_requests {
        tracing::debug!(target: "courier_net::download", url = %url, dir = %destination_dir.display(), "download");
    }

    let mut throttle = ProgressThrottle::new(config.progress_interval);
    match run_with_retries(descriptor.max_retries, &config.retry, |_| {
        download_attempt(
            transport,
            &url,
            descriptor,
            destination_dir,
            desired_name,
            config,
            &mut throttle,
            &mut *on_progress,
        )
    }) {
        Ok(path) => Outcome::DownloadedFile(path),
        Err(kind) => Outcome::Error(kind),
    }
}
