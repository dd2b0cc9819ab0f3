//! Shared helpers for integration tests: a scripted in-process transport and
//! a recording listener.

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use courier_net::http::{Connection, ConnectionSettings, Extras, Http, HttpEvents, Transport};
use courier_net::{ErrorKind, NetworkError, Result};
use parking_lot::Mutex;
use url::Url;

/// What the scripted server saw for one attempt.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// Zero-based attempt index across the whole transport.
    pub attempt: usize,
    pub url: Url,
    pub settings: ConnectionSettings,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.settings.header(name)
    }
}

/// How the scripted server answers an attempt.
#[derive(Clone, Debug)]
pub enum Reply {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// Headers arrive, then the body breaks after `after` bytes.
    Interrupted {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        after: usize,
    },
    Timeout,
    ConnectionReset,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::Response {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        if let Self::Response { headers, .. } | Self::Interrupted { headers, .. } = &mut self {
            headers.push((name.to_string(), value.into()));
        }
        self
    }

    /// The same response, reset by the peer after `after` body bytes.
    pub fn reset_after(self, after: usize) -> Self {
        match self {
            Self::Response {
                status,
                headers,
                body,
            } => Self::Interrupted {
                status,
                headers,
                body,
                after,
            },
            other => other,
        }
    }

    /// A 200 response carrying `Content-Length`.
    pub fn sized(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let len = body.len();
        Self::ok(body).with_header("Content-Length", len.to_string())
    }
}

type Handler = dyn Fn(&RecordedRequest) -> Reply + Send + Sync;

/// Maps a zero-based connection index to a request body byte limit.
type WriteLimit = dyn Fn(usize) -> Option<usize> + Send + Sync;

fn reset() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer")
}

struct Shared {
    handler: Box<Handler>,
    write_limit: Mutex<Option<Box<WriteLimit>>>,
    opens: AtomicUsize,
    attempts: AtomicUsize,
    disconnects: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Transport whose answers come from a closure.
#[derive(Clone)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&RecordedRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler: Box::new(handler),
                write_limit: Mutex::new(None),
                opens: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Always answer with the same reply.
    pub fn replying(reply: Reply) -> Self {
        Self::new(move |_| reply.clone())
    }

    /// Reset the connection once a request body passes the returned limit.
    ///
    /// `limit` receives the zero-based index of each opened connection.
    pub fn reset_writes(
        self,
        limit: impl Fn(usize) -> Option<usize> + Send + Sync + 'static,
    ) -> Self {
        *self.shared.write_limit.lock() = Some(Box::new(limit));
        self
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, url: &Url) -> Result<Box<dyn Connection>> {
        let index = self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let limit = self.shared.write_limit.lock().as_ref().and_then(|limit| limit(index));
        Ok(Box::new(ScriptedConnection {
            shared: self.shared.clone(),
            url: url.clone(),
            settings: None,
            body: BodySink {
                written: Vec::new(),
                limit,
            },
            response: None,
            disconnected: false,
        }))
    }
}

struct ScriptedConnection {
    shared: Arc<Shared>,
    url: Url,
    settings: Option<ConnectionSettings>,
    body: BodySink,
    response: Option<ScriptedResponse>,
    disconnected: bool,
}

struct ScriptedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    reset_after: Option<usize>,
}

/// Request body buffer that resets the connection past `limit` bytes.
struct BodySink {
    written: Vec<u8>,
    limit: Option<usize>,
}

impl Write for BodySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.limit {
            Some(limit) if self.written.len() >= limit && !buf.is_empty() => return Err(reset()),
            Some(limit) => buf.len().min(limit - self.written.len()),
            None => buf.len(),
        };
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Response body that yields its bytes, then fails as a reset connection.
struct BrokenBody {
    data: Cursor<Vec<u8>>,
}

impl Read for BrokenBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 if !buf.is_empty() => Err(reset()),
            n => Ok(n),
        }
    }
}

impl ScriptedConnection {
    fn settings(&self) -> Result<&ConnectionSettings> {
        self.settings
            .as_ref()
            .ok_or_else(|| NetworkError::Request("connection not configured".into()))
    }
}

impl Connection for ScriptedConnection {
    fn configure(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn output_stream(&mut self) -> Result<&mut (dyn Write + Send)> {
        self.settings()?;
        Ok(&mut self.body)
    }

    fn close_output(&mut self) -> Result<()> {
        Ok(())
    }

    fn response_code(&mut self) -> Result<u16> {
        if let Some(response) = &self.response {
            return Ok(response.status);
        }

        let request = RecordedRequest {
            attempt: self.shared.attempts.fetch_add(1, Ordering::SeqCst),
            url: self.url.clone(),
            settings: self.settings()?.clone(),
            body: self.body.written.clone(),
        };
        let reply = (self.shared.handler)(&request);
        self.shared.requests.lock().push(request);

        match reply {
            Reply::Response {
                status,
                headers,
                body,
            } => {
                self.response = Some(ScriptedResponse {
                    status,
                    headers,
                    body,
                    reset_after: None,
                });
                Ok(status)
            }
            Reply::Interrupted {
                status,
                headers,
                body,
                after,
            } => {
                self.response = Some(ScriptedResponse {
                    status,
                    headers,
                    body,
                    reset_after: Some(after),
                });
                Ok(status)
            }
            Reply::Timeout => Err(NetworkError::Timeout),
            Reply::ConnectionReset => Err(reset().into()),
        }
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.response
            .as_ref()?
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn input_stream(&mut self) -> Result<Box<dyn Read + Send>> {
        let response = self
            .response
            .as_mut()
            .ok_or_else(|| NetworkError::Request("no response".into()))?;
        let mut body = std::mem::take(&mut response.body);
        match response.reset_after {
            Some(after) => {
                body.truncate(after);
                Ok(Box::new(BrokenBody {
                    data: Cursor::new(body),
                }))
            }
            None => Ok(Box::new(Cursor::new(body))),
        }
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// A listener callback as observed by the consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Progress {
        code: Option<i32>,
        total: u64,
        processed: u64,
    },
    Complete {
        code: i32,
        response: String,
    },
    Error {
        code: i32,
        kind: ErrorKind,
    },
    Downloaded {
        code: i32,
        path: PathBuf,
    },
}

impl Call {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Progress { code, .. } => *code,
            Self::Complete { code, .. }
            | Self::Error { code, .. }
            | Self::Downloaded { code, .. } => Some(*code),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Record {
    pub call: Call,
    pub extras: Extras,
    pub thread: ThreadId,
}

/// Listener that remembers every callback.
#[derive(Clone, Default)]
pub struct Recorder {
    records: Rc<RefCell<Vec<Record>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.records.borrow().iter().map(|r| r.call.clone()).collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.records.borrow().iter().filter(|r| r.call.is_terminal()).count()
    }

    pub fn progress_for(&self, code: i32) -> Vec<(u64, u64)> {
        self.records
            .borrow()
            .iter()
            .filter_map(|r| match r.call {
                Call::Progress {
                    code: Some(c),
                    total,
                    processed,
                } if c == code => Some((processed, total)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call, extras: &Extras) {
        self.records.borrow_mut().push(Record {
            call,
            extras: extras.clone(),
            thread: thread::current().id(),
        });
    }
}

impl HttpEvents for Recorder {
    fn on_progress(&mut self, code: Option<i32>, total: u64, processed: u64, extras: &Extras) {
        self.push(
            Call::Progress {
                code,
                total,
                processed,
            },
            extras,
        );
    }

    fn on_request_complete(&mut self, code: i32, response: &str, extras: &Extras) {
        self.push(
            Call::Complete {
                code,
                response: response.to_string(),
            },
            extras,
        );
    }

    fn on_error(&mut self, code: i32, kind: ErrorKind, extras: &Extras) {
        self.push(Call::Error { code, kind }, extras);
    }

    fn on_file_downloaded(&mut self, code: i32, path: &Path, extras: &Extras) {
        self.push(
            Call::Downloaded {
                code,
                path: path.to_path_buf(),
            },
            extras,
        );
    }
}

/// Pump events until `recorder` has seen `terminals` terminal callbacks.
pub fn pump_until(http: &mut Http, recorder: &Recorder, terminals: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while recorder.terminal_count() < terminals {
        assert!(Instant::now() < deadline, "timed out waiting for events: {:?}", recorder.calls());
        http.wait_for_events(Duration::from_millis(20));
    }
}
