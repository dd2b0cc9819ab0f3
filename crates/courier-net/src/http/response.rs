//! Response body materialization.

use std::io::{BufRead, BufReader, Read};

/// Whether `code` is a 2xx status.
pub fn is_success_status(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Drain a response stream into a single string.
///
/// The body is decoded as UTF-8 line by line. Line endings (`\n`, `\r\n` or a
/// lone `\r`) are normalized to `\n`, and a trailing newline is present only
/// when the body itself ended with one, so `"ok"` reads back as `"ok"`.
///
/// Returns `None` when the body is empty, cannot be read, or is not valid
/// UTF-8. The stream is dropped, and so closed, on every path.
pub fn read_response(stream: Box<dyn Read + Send>) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let mut text = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => push_normalized(&mut text, &line),
            Err(err) => {
                tracing::debug!(target: "courier_net::http", error = %err, "failed to read response body");
                return None;
            }
        }
    }

    if text.is_empty() { None } else { Some(text) }
}

fn push_normalized(text: &mut String, line: &str) {
    let (content, ended) = match line.strip_suffix('\n') {
        Some(rest) => (rest.strip_suffix('\r').unwrap_or(rest), true),
        None => (line, false),
    };
    let mut parts = content.split('\r').peekable();
    while let Some(part) = parts.next() {
        text.push_str(part);
        if parts.peek().is_some() {
            text.push('\n');
        }
    }
    if ended {
        text.push('\n');
    }
}
