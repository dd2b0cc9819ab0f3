//! One background thread per unit of work.
//!
//! Every network operation runs on its own freshly spawned, named thread.
//! There is no pool and no queue: callers may start as many
//! operations as they like and each one is fully independent. The returned
//! [`WorkerHandle`] can be used to wait for completion; it cannot stop the
//! work early.
//!
//! # Example
//!
//! ```
//! use courier_core::worker::spawn_worker;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let done = Arc::new(AtomicBool::new(false));
//! let done_clone = done.clone();
//!
//! let handle = spawn_worker("courier-doc", move || {
//!     done_clone.store(true, Ordering::SeqCst);
//! })
//! .unwrap();
//!
//! handle.join();
//! assert!(done.load(Ordering::SeqCst));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{CoreError, Result};

/// Handle to a spawned worker thread.
pub struct WorkerHandle {
    name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
    finished: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// The thread name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker's task has returned (or unwound).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wait for the worker thread to finish.
    ///
    /// Returns `true` if the worker was joined successfully, `false` if it
    /// was already joined or the thread panicked.
    pub fn join(&self) -> bool {
        let mut handle = self.handle.lock();
        if let Some(h) = handle.take() {
            h.join().is_ok()
        } else {
            false
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Marks the worker finished even when the task unwinds.
struct FinishedFlag(Arc<AtomicBool>);

impl Drop for FinishedFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Spawn `task` on a new named thread.
pub fn spawn_worker<F>(name: impl Into<String>, task: F) -> Result<WorkerHandle>
where
    F: FnOnce() + Send + 'static,
{
    let name = name.into();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = FinishedFlag(finished.clone());

    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let _flag = flag;
            task();
        })
        .map_err(|err| CoreError::worker_spawn(name.clone(), err))?;

    tracing::trace!(target: "courier_core::worker", worker = %name, "worker spawned");

    Ok(WorkerHandle {
        name,
        handle: Mutex::new(Some(handle)),
        finished,
    })
}
