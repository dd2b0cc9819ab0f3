//! Queued invocations for cross-thread delivery.
//!
//! A [`QueuedInvocation`] wraps a closure built on a background thread so it
//! can travel through an [`EventLoopProxy`](crate::EventLoopProxy) and run
//! later on the consumer thread that owns the [`EventLoop`](crate::EventLoop).

use std::fmt;

/// A type-erased queued invocation that can be executed later.
///
/// This wraps a closure that captures everything it needs, allowing deferred
/// execution on the target thread.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
        }
    }

    /// Execute the invocation on the current thread.
    pub fn execute(self) {
        (self.invoke)();
    }
}

impl fmt::Debug for QueuedInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedInvocation").finish_non_exhaustive()
    }
}
