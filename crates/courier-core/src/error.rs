//! Error types for Courier core.

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the event loop and worker plumbing.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The consumer event loop has been dropped; nothing will receive the message.
    #[error("The event loop has already exited")]
    EventLoopClosed,

    /// The operating system refused to start a worker thread.
    #[error("Failed to spawn worker thread '{name}': {source}")]
    WorkerSpawn {
        /// Name the worker would have had.
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Create a worker spawn error.
    pub fn worker_spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::WorkerSpawn {
            name: name.into(),
            source,
        }
    }
}
