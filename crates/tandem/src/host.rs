//! Host loop abstraction and a reference single-threaded host loop.
//!
//! The bridge only needs to post work to the host thread and ask the host loop
//! to wind down; everything else about the host loop belongs to its owner.
//!
//! `HostQueue` is the loop used by the demo binary and the tests. Cross-thread
//! posts go through a lock-free `SegQueue` and unpark the owner thread, the
//! same slow path an executor uses for remote wakes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};

use crate::sync::{lock, RemoteQueue};

/// A unit of work to run on the host thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait HostLoop: Send + Sync + 'static {
    /// Enqueue `task` for later execution on the host thread. Callable from
    /// any thread.
    fn post_task(&self, task: Task);

    /// Ask the loop to stop once it has no pending work. Work already queued
    /// still runs.
    fn quit_when_idle(&self);

    /// Run queued work on the calling (host) thread until the queue is empty.
    fn run_until_idle(&self);
}

impl<H: HostLoop> HostLoop for Arc<H> {
    fn post_task(&self, task: Task) {
        (**self).post_task(task)
    }

    fn quit_when_idle(&self) {
        (**self).quit_when_idle()
    }

    fn run_until_idle(&self) {
        (**self).run_until_idle()
    }
}

// =============================================================================
// HostQueue
// =============================================================================

struct Inner {
    tasks: RemoteQueue<Task>,
    quit: AtomicBool,
    owner: Mutex<Option<Thread>>,
    executed: AtomicU64,
}

/// Cheaply clonable handle to a task queue run by one thread.
#[derive(Clone)]
pub struct HostQueue {
    inner: Arc<Inner>,
}

impl HostQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RemoteQueue::new(),
                quit: AtomicBool::new(false),
                owner: Mutex::new(None),
                executed: AtomicU64::new(0),
            }),
        }
    }

    /// Run tasks on the calling thread until a quit was requested and the
    /// queue is empty. Parks while there is nothing to do.
    pub fn run(&self) {
        *lock(&self.inner.owner) = Some(thread::current());
        loop {
            self.run_until_idle();
            // Tasks posted after the drain but before this check are picked up
            // by the next iteration: the quit only lands on an empty queue.
            if self.inner.quit.load(Ordering::Acquire) && self.inner.tasks.is_empty() {
                self.inner.quit.store(false, Ordering::Release);
                break;
            }
            // An unpark issued between the drain and here leaves a token, so
            // this returns immediately instead of missing the post.
            thread::park();
        }
        log::trace!("host queue: run loop exited after {} tasks", self.executed());
    }

    /// Number of tasks executed so far.
    pub fn executed(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.inner.tasks.len()
    }

    fn unpark_owner(&self) {
        if let Some(owner) = lock(&self.inner.owner).as_ref() {
            owner.unpark();
        }
    }
}

impl Default for HostQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLoop for HostQueue {
    fn post_task(&self, task: Task) {
        self.inner.tasks.push(task);
        self.unpark_owner();
    }

    fn quit_when_idle(&self) {
        self.inner.quit.store(true, Ordering::Release);
        self.unpark_owner();
    }

    fn run_until_idle(&self) {
        while let Some(task) = self.inner.tasks.pop() {
            task();
            self.inner.executed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
