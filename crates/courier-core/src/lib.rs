//! Core systems for Courier.
//!
//! This crate provides the thread plumbing the networking crate builds on:
//!
//! - **Event Loop**: A FIFO message queue owned by a single consumer thread
//!   (typically the UI thread), fed from any number of producer threads
//! - **Queued Invocations**: Closures posted from a background thread and
//!   executed on the consumer thread
//! - **Workers**: One named background thread per unit of work, with a
//!   joinable handle
//!
//! # Event Loop Example
//!
//! ```
//! use courier_core::EventLoop;
//!
//! let event_loop = EventLoop::<String>::new();
//! let proxy = event_loop.proxy();
//!
//! // Producers may live on any thread
//! std::thread::spawn(move || {
//!     proxy.send_event("hello from a worker".to_string()).ok();
//! })
//! .join()
//! .unwrap();
//!
//! // The consumer drains on its own thread
//! let delivered = event_loop.process_pending(|message| {
//!     println!("received: {message}");
//! });
//! assert_eq!(delivered, 1);
//! ```
//!
//! # Worker Example
//!
//! ```
//! use courier_core::worker::spawn_worker;
//!
//! let handle = spawn_worker("courier-example", || {
//!     // Blocking I/O goes here
//! })
//! .expect("spawn worker");
//!
//! assert!(handle.join());
//! ```

mod error;
pub mod event_loop;
pub mod invocation;
pub mod worker;

pub use error::{CoreError, Result};
pub use event_loop::{EventLoop, EventLoopProxy};
pub use invocation::QueuedInvocation;
pub use worker::{WorkerHandle, spawn_worker};
