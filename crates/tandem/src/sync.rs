//! Synchronization primitives abstraction for loom testing.
//!
//! When compiled with `--cfg loom`, the handoff and closed-flag types use loom's
//! primitives so `tandem-loom-tests` can explore every interleaving of the
//! poller/pump protocol. Otherwise, std types are used.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::{Arc, Condvar, Mutex};

#[cfg(not(loom))]
pub(crate) use std::sync::{Arc, Condvar, Mutex};

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it.
///
/// State outside the loom-modeled handoff (host queue owner, poll buffers,
/// the native loop itself) stays consistent across a panicking callback, so
/// poisoning carries nothing we act on.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// RemoteQueue - lock-free queue for tasks posted to the host thread
// =============================================================================
//
// Under loom, we use a Mutex<VecDeque> since loom doesn't provide SegQueue.
// crossbeam-queue has its own tests; loom checks our usage of the queue.

#[cfg(not(loom))]
mod queue {
    use crossbeam_queue::SegQueue;

    pub struct RemoteQueue<T>(SegQueue<T>);

    impl<T> RemoteQueue<T> {
        pub fn new() -> Self {
            Self(SegQueue::new())
        }

        pub fn push(&self, value: T) {
            self.0.push(value);
        }

        pub fn pop(&self) -> Option<T> {
            self.0.pop()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }
    }
}

#[cfg(loom)]
mod queue {
    use loom::sync::Mutex;
    use std::collections::VecDeque;

    pub struct RemoteQueue<T>(Mutex<VecDeque<T>>);

    impl<T> RemoteQueue<T> {
        pub fn new() -> Self {
            Self(Mutex::new(VecDeque::new()))
        }

        pub fn push(&self, value: T) {
            self.0.lock().unwrap().push_back(value);
        }

        pub fn pop(&self) -> Option<T> {
            self.0.lock().unwrap().pop_front()
        }

        pub fn is_empty(&self) -> bool {
            self.0.lock().unwrap().is_empty()
        }

        pub fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }
}

pub(crate) use queue::RemoteQueue;
