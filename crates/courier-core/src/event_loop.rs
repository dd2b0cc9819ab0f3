//! Consumer-side event loop for cross-thread delivery.
//!
//! An [`EventLoop`] is owned by exactly one consumer thread. Any number of
//! producer threads hold an [`EventLoopProxy`] and push either typed events or
//! [`QueuedInvocation`]s into it. Nothing runs until the consumer calls
//! [`EventLoop::process_pending`] or [`EventLoop::wait_and_process`], so every
//! handler and every queued closure executes on the consumer thread.
//!
//! # Ordering
//!
//! Messages are delivered strictly in the order they were enqueued. There are
//! no priorities, so messages sent by one producer arrive in the order that
//! producer sent them.
//!
//! # Example
//!
//! ```
//! use courier_core::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::<u32>::new();
//! let proxy = event_loop.proxy();
//!
//! std::thread::spawn(move || {
//!     for n in 0..3 {
//!         proxy.send_event(n).ok();
//!     }
//!     proxy.post(|| println!("ran on the consumer thread")).ok();
//! });
//!
//! let mut seen = Vec::new();
//! while seen.len() < 3 {
//!     event_loop.wait_and_process(Duration::from_millis(100), |n| seen.push(n));
//! }
//! assert_eq!(seen, vec![0, 1, 2]);
//! ```

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::error::{CoreError, Result};
use crate::invocation::QueuedInvocation;

/// A message travelling from a producer to the consumer thread.
enum LoopMessage<E> {
    /// A typed event handed to the consumer's handler.
    Event(E),
    /// A closure executed inline by the consumer.
    Invoke(QueuedInvocation),
}

/// The consumer end of the queue.
///
/// Create one on the thread that should receive events, hand out proxies to
/// producers, and drain it periodically from that same thread.
pub struct EventLoop<E> {
    sender: Sender<LoopMessage<E>>,
    receiver: Receiver<LoopMessage<E>>,
}

impl<E: Send + 'static> Default for EventLoop<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> EventLoop<E> {
    /// Create a new, empty event loop.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Create a proxy that producers use to reach this loop.
    pub fn proxy(&self) -> EventLoopProxy<E> {
        EventLoopProxy {
            sender: self.sender.clone(),
        }
    }

    /// Number of messages waiting to be processed.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Process every message that is queued at the time of the call.
    ///
    /// Events are handed to `handler`; queued invocations are executed
    /// directly. Messages enqueued while this runs are left for the next call.
    ///
    /// Returns the number of messages processed.
    pub fn process_pending<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(E),
    {
        let queued = self.receiver.len();
        let mut processed = 0;
        for _ in 0..queued {
            match self.receiver.try_recv() {
                Ok(message) => {
                    Self::deliver(message, &mut handler);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        processed
    }

    /// Block for up to `timeout` waiting for a message, then drain the queue.
    ///
    /// Returns the number of messages processed, which is zero when the
    /// timeout elapsed with nothing to deliver.
    pub fn wait_and_process<F>(&self, timeout: Duration, mut handler: F) -> usize
    where
        F: FnMut(E),
    {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => {
                Self::deliver(message, &mut handler);
                1 + self.process_pending(handler)
            }
            Err(RecvTimeoutError::Timeout) => 0,
            // The loop keeps its own sender, so this cannot happen while `self` lives.
            Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn deliver<F>(message: LoopMessage<E>, handler: &mut F)
    where
        F: FnMut(E),
    {
        match message {
            LoopMessage::Event(event) => handler(event),
            LoopMessage::Invoke(invocation) => invocation.execute(),
        }
    }
}

impl<E> fmt::Debug for EventLoop<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

/// The producer end of the queue.
///
/// Proxies are cheap to clone and may be moved to any thread.
pub struct EventLoopProxy<E> {
    sender: Sender<LoopMessage<E>>,
}

impl<E> Clone for EventLoopProxy<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Send + 'static> EventLoopProxy<E> {
    /// Queue an event for the consumer's handler.
    pub fn send_event(&self, event: E) -> Result<()> {
        self.sender
            .send(LoopMessage::Event(event))
            .map_err(|_| CoreError::EventLoopClosed)
    }

    /// Queue a closure to run on the consumer thread.
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_invocation(QueuedInvocation::new(task))
    }

    /// Queue a prepared invocation to run on the consumer thread.
    pub fn post_invocation(&self, invocation: QueuedInvocation) -> Result<()> {
        self.sender
            .send(LoopMessage::Invoke(invocation))
            .map_err(|_| CoreError::EventLoopClosed)
    }
}

impl<E> fmt::Debug for EventLoopProxy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopProxy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_process_pending_empty() {
        let event_loop = EventLoop::<i32>::new();
        assert_eq!(event_loop.process_pending(|_| panic!("no events")), 0);
    }

    #[test]
    fn test_events_delivered_in_order() {
        let event_loop = EventLoop::<i32>::new();
        let proxy = event_loop.proxy();

        for i in 0..10 {
            proxy.send_event(i).unwrap();
        }
        assert_eq!(event_loop.pending_count(), 10);

        let mut received = Vec::new();
        let processed = event_loop.process_pending(|n| received.push(n));

        assert_eq!(processed, 10);
        assert_eq!(received, (0..10).collect::<Vec<_>>());
        assert_eq!(event_loop.pending_count(), 0);
    }

    #[test]
    fn test_posted_closures_run_on_consumer_thread() {
        let event_loop = EventLoop::<()>::new();
        let proxy = event_loop.proxy();
        let consumer = thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));

        let ran_on_clone = ran_on.clone();
        thread::spawn(move || {
            proxy
                .post(move || {
                    *ran_on_clone.lock() = Some(thread::current().id());
                })
                .unwrap();
        })
        .join()
        .unwrap();

        assert!(ran_on.lock().is_none());
        event_loop.process_pending(|_| {});
        assert_eq!(*ran_on.lock(), Some(consumer));
    }

    #[test]
    fn test_events_and_closures_interleave_in_order() {
        let event_loop = EventLoop::<&'static str>::new();
        let proxy = event_loop.proxy();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        proxy.send_event("first").unwrap();
        let log_clone = log.clone();
        proxy.post(move || log_clone.lock().push("closure")).unwrap();
        proxy.send_event("last").unwrap();

        let log_clone = log.clone();
        event_loop.process_pending(move |e| log_clone.lock().push(e));

        assert_eq!(*log.lock(), vec!["first", "closure", "last"]);
    }

    #[test]
    fn test_wait_and_process_times_out() {
        let event_loop = EventLoop::<i32>::new();
        let processed = event_loop.wait_and_process(Duration::from_millis(10), |_| {});
        assert_eq!(processed, 0);
    }

    #[test]
    fn test_wait_and_process_wakes_on_event() {
        let event_loop = EventLoop::<i32>::new();
        let proxy = event_loop.proxy();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            proxy.send_event(7).unwrap();
        });

        let mut received = None;
        let processed =
            event_loop.wait_and_process(Duration::from_secs(5), |n| received = Some(n));
        producer.join().unwrap();

        assert_eq!(processed, 1);
        assert_eq!(received, Some(7));
    }

    #[test]
    fn test_send_after_loop_dropped() {
        let event_loop = EventLoop::<i32>::new();
        let proxy = event_loop.proxy();
        drop(event_loop);

        assert!(matches!(proxy.send_event(1), Err(CoreError::EventLoopClosed)));
        assert!(matches!(proxy.post(|| {}), Err(CoreError::EventLoopClosed)));
    }

    #[test]
    fn test_many_producers() {
        let event_loop = EventLoop::<usize>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let proxy = event_loop.proxy();
                thread::spawn(move || {
                    for i in 0..10 {
                        proxy.send_event(i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let counter_clone = counter.clone();
        event_loop.process_pending(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
