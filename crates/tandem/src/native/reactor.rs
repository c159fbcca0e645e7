//! Poller backend shared between the host thread and the poller thread.
//!
//! The native loop's callbacks and timers live on the host thread. The only
//! state the poller thread touches is this backend: the OS poller, the buffer
//! it waits into, the readiness it has collected for the next iteration, and
//! the deadline of the next timer published by the last iteration.
//!
//! Sources are registered oneshot. An event disarms its source until the loop
//! re-arms it after running the callback, so a readiness collected by the
//! poller thread is delivered exactly once.

use polling::{Event, Events, Poller};
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sync::lock;

// =============================================================================
// Interest flags
// =============================================================================

pub const READABLE: u8 = 0b01;
pub const WRITABLE: u8 = 0b10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    fn merge(&mut self, other: Readiness) {
        self.readable |= other.readable;
        self.writable |= other.writable;
    }
}

fn interest_event(key: usize, interest: u8) -> Event {
    Event::new(key, interest & READABLE != 0, interest & WRITABLE != 0)
}

// =============================================================================
// Backend
// =============================================================================

pub(crate) struct Backend {
    poller: Poller,
    events: Mutex<Events>,
    ready: Mutex<Vec<(usize, Readiness)>>,
    deadline: Mutex<Option<Instant>>,
}

impl Backend {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Mutex::new(Events::new()),
            ready: Mutex::new(Vec::new()),
            deadline: Mutex::new(None),
        })
    }

    /// Interrupt a blocking `wait` from any thread. Notifications coalesce
    /// until the next `wait` consumes them.
    pub fn notify(&self) -> io::Result<()> {
        self.poller.notify()
    }

    /// # Safety
    ///
    /// `fd` must be open and must stay open until `delete` is called for it.
    pub unsafe fn add(&self, fd: RawFd, key: usize, interest: u8) -> io::Result<()> {
        self.poller.add(fd, interest_event(key, interest))
    }

    pub fn rearm(&self, fd: RawFd, key: usize, interest: u8) {
        // Safety: registered fds stay open until deregistered.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(e) = self.poller.modify(borrowed, interest_event(key, interest)) {
            log::warn!("native loop: re-arm of fd={} key={} failed: {}", fd, key, e);
        }
    }

    pub fn delete(&self, fd: RawFd) {
        // Ignore errors on delete (fd might already be closed)
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let _ = self.poller.delete(borrowed);
    }

    /// Publish when the next timer is due. Returns true if the deadline moved
    /// earlier, i.e. a wait already in flight may now sleep too long.
    pub fn publish_deadline(&self, deadline: Option<Instant>) -> bool {
        let mut slot = lock(&self.deadline);
        let earlier = match (deadline, *slot) {
            (Some(new), Some(old)) => new < old,
            (Some(_), None) => true,
            (None, _) => false,
        };
        *slot = deadline;
        earlier
    }

    /// How long a blocking wait may sleep. `None` waits for I/O or a notify.
    pub fn timeout(&self) -> Option<Duration> {
        lock(&self.deadline).map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Wait for readiness and stash it for the next loop iteration.
    ///
    /// Failures are logged and reported as no readiness; the caller simply
    /// runs another cycle.
    pub fn wait(&self, timeout: Option<Duration>) -> usize {
        let mut events = lock(&self.events);
        events.clear();

        match self.poller.wait(&mut events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return 0,
            Err(e) => {
                log::warn!("native loop: poll failed, treating as no readiness: {}", e);
                return 0;
            }
        }

        let mut ready = lock(&self.ready);
        let mut collected = 0usize;
        for ev in events.iter() {
            if !(ev.readable || ev.writable) {
                continue;
            }
            let readiness = Readiness { readable: ev.readable, writable: ev.writable };
            log::trace!(
                "native loop: event key={} readable={} writable={}",
                ev.key, ev.readable, ev.writable
            );
            match ready.iter_mut().find(|(key, _)| *key == ev.key) {
                Some((_, existing)) => existing.merge(readiness),
                None => ready.push((ev.key, readiness)),
            }
            collected += 1;
        }
        collected
    }

    pub fn take_ready(&self) -> Vec<(usize, Readiness)> {
        std::mem::take(&mut *lock(&self.ready))
    }

    /// Put back readiness taken by `take_ready` but not dispatched.
    pub fn restore_ready(&self, leftover: Vec<(usize, Readiness)>) {
        let mut ready = lock(&self.ready);
        for (key, readiness) in leftover {
            match ready.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => existing.merge(readiness),
                None => ready.push((key, readiness)),
            }
        }
    }

    /// Drop any stashed readiness for `key` (its source was deregistered).
    pub fn forget(&self, key: usize) {
        lock(&self.ready).retain(|(k, _)| *k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_interrupts_wait() {
        let backend = Arc::new(Backend::new().unwrap());
        let remote = backend.clone();
        let waiter = thread::spawn(move || remote.wait(None));

        thread::sleep(Duration::from_millis(20));
        backend.notify().unwrap();
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn notify_without_waiter_is_harmless() {
        let backend = Backend::new().unwrap();
        for _ in 0..5 {
            backend.notify().unwrap();
        }
        // The coalesced notification is consumed by the next wait.
        assert_eq!(backend.wait(Some(Duration::from_secs(1))), 0);
        assert_eq!(backend.wait(Some(Duration::ZERO)), 0);
    }

    #[test]
    fn deadline_publication() {
        let backend = Backend::new().unwrap();
        assert_eq!(backend.timeout(), None);

        let now = Instant::now();
        assert!(backend.publish_deadline(Some(now + Duration::from_secs(10))));
        assert!(backend.publish_deadline(Some(now + Duration::from_secs(1))));
        assert!(!backend.publish_deadline(Some(now + Duration::from_secs(5))));
        assert!(!backend.publish_deadline(None));
        assert_eq!(backend.timeout(), None);

        backend.publish_deadline(Some(now));
        assert_eq!(backend.timeout(), Some(Duration::ZERO));
    }
}
