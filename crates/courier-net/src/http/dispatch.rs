//! Outcome delivery to the single consumer thread.
//!
//! Workers never call the listener. They hand an [`Outcome`] and its
//! [`RequestCorrelator`] to an [`EventDispatcher`], which applies the
//! suppression rules and queues an [`HttpEvent`] on the consumer's event
//! loop. The consumer later drains the loop and the events reach its
//! [`HttpEvents`] listener on that thread, in the order they were queued.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_core::EventLoopProxy;

use super::request::{Extras, RequestCorrelator};
use crate::error::ErrorKind;

/// What happened to a request.
///
/// `Success`, `Error` and `DownloadedFile` are terminal: exactly one of them
/// ends every logical request. `Progress` may precede it any number of times.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The response body.
    Success(String),
    /// The request failed.
    Error(ErrorKind),
    /// A download finished and the file is at this path.
    DownloadedFile(PathBuf),
    /// Bytes transferred so far.
    Progress {
        /// Bytes processed so far.
        processed: u64,
        /// Total bytes expected.
        total: u64,
    },
}

impl Outcome {
    /// Whether this outcome ends the logical request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Listener callbacks, always invoked on the consumer thread.
pub trait HttpEvents {
    /// Transfer progress for an upload or download.
    fn on_progress(
        &mut self,
        request_code: Option<i32>,
        bytes_total: u64,
        bytes_processed: u64,
        extras: &Extras,
    ) {
        let _ = (request_code, bytes_total, bytes_processed, extras);
    }

    /// A request finished with a response body.
    fn on_request_complete(&mut self, request_code: i32, response: &str, extras: &Extras);

    /// A request failed.
    fn on_error(&mut self, request_code: i32, kind: ErrorKind, extras: &Extras);

    /// A download finished.
    fn on_file_downloaded(&mut self, request_code: i32, path: &Path, extras: &Extras) {
        let _ = (request_code, path, extras);
    }
}

/// An event waiting in the consumer's queue.
#[derive(Clone, Debug, PartialEq)]
pub enum HttpEvent {
    /// Transfer progress.
    Progress {
        /// Request code, if the call had one.
        request_code: Option<i32>,
        /// Total bytes expected.
        bytes_total: u64,
        /// Bytes processed so far.
        bytes_processed: u64,
        /// Caller payload.
        extras: Extras,
    },
    /// Successful completion.
    RequestComplete {
        /// Request code.
        request_code: i32,
        /// Response body.
        response: String,
        /// Caller payload.
        extras: Extras,
    },
    /// Failure.
    Error {
        /// Request code.
        request_code: i32,
        /// Failure classification.
        kind: ErrorKind,
        /// Caller payload.
        extras: Extras,
    },
    /// Completed download.
    FileDownloaded {
        /// Request code.
        request_code: i32,
        /// Where the file was written.
        path: PathBuf,
        /// Caller payload.
        extras: Extras,
    },
}

impl HttpEvent {
    /// Build the event for an outcome, or `None` when it is suppressed.
    ///
    /// Terminal outcomes need a request code. Progress is never suppressed
    /// here; the dispatcher drops it when no listener is attached.
    pub fn from_outcome(outcome: Outcome, correlator: &RequestCorrelator) -> Option<Self> {
        let extras = correlator.extras.clone();
        match outcome {
            Outcome::Progress { processed, total } => Some(Self::Progress {
                request_code: correlator.request_code,
                bytes_total: total,
                bytes_processed: processed,
                extras,
            }),
            Outcome::Success(response) => {
                correlator
                    .request_code
                    .map(|request_code| Self::RequestComplete {
                        request_code,
                        response,
                        extras,
                    })
            }
            Outcome::Error(kind) => correlator.request_code.map(|request_code| Self::Error {
                request_code,
                kind,
                extras,
            }),
            Outcome::DownloadedFile(path) => {
                correlator
                    .request_code
                    .map(|request_code| Self::FileDownloaded {
                        request_code,
                        path,
                        extras,
                    })
            }
        }
    }

    /// Hand the event to a listener.
    pub fn deliver_to(&self, listener: &mut dyn HttpEvents) {
        match self {
            Self::Progress {
                request_code,
                bytes_total,
                bytes_processed,
                extras,
            } => listener.on_progress(*request_code, *bytes_total, *bytes_processed, extras),
            Self::RequestComplete {
                request_code,
                response,
                extras,
            } => listener.on_request_complete(*request_code, response, extras),
            Self::Error {
                request_code,
                kind,
                extras,
            } => listener.on_error(*request_code, *kind, extras),
            Self::FileDownloaded {
                request_code,
                path,
                extras,
            } => listener.on_file_downloaded(*request_code, path, extras),
        }
    }
}

/// Worker-side handle for reporting outcomes.
///
/// Cheap to clone and safe to use from any number of workers at once.
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    proxy: EventLoopProxy<HttpEvent>,
    listener_attached: Arc<AtomicBool>,
}

impl EventDispatcher {
    pub(crate) fn new(
        proxy: EventLoopProxy<HttpEvent>,
        listener_attached: Arc<AtomicBool>,
    ) -> Self {
        Self {
            proxy,
            listener_attached,
        }
    }

    /// Queue `outcome` for the consumer thread.
    ///
    /// Returns whether an event was queued.
    pub fn dispatch(&self, outcome: Outcome, correlator: &RequestCorrelator) -> bool {
        if matches!(outcome, Outcome::Progress { .. })
            && !self.listener_attached.load(Ordering::Acquire)
        {
            return false;
        }

        let Some(event) = HttpEvent::from_outcome(outcome, correlator) else {
            tracing::trace!(target: "courier_net::dispatch", "no request code, outcome suppressed");
            return false;
        };

        match self.proxy.send_event(event) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(target: "courier_net::dispatch", error = %err, "outcome dropped");
                false
            }
        }
    }

    /// Queue a progress tick.
    pub fn progress(&self, processed: u64, total: u64, correlator: &RequestCorrelator) -> bool {
        self.dispatch(Outcome::Progress { processed, total }, correlator)
    }
}
