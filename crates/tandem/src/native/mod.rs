//! Native I/O loop: fd readiness callbacks, timers and a stop flag.
//!
//! A `NativeLoop` can be run standalone (`RunMode::Default`), but its reason
//! to exist is the split with the bridge: the blocking half of an iteration
//! (waiting on the OS poller) can be done by another thread through the
//! shared `Backend`, while callbacks only ever run in `run` on the thread that
//! holds `&mut NativeLoop`.
//!
//! Callbacks are taken out of their slot before being called and put back
//! afterwards, so they receive `&mut NativeLoop` and may add or remove
//! handles and timers, including their own.

mod reactor;
mod timers;

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use reactor::{Readiness, READABLE, WRITABLE};
pub(crate) use reactor::Backend;
use timers::Timers;

pub type IoCallback = Box<dyn FnMut(&mut NativeLoop, Readiness) + Send>;
pub type TimerCallback = Box<dyn FnMut(&mut NativeLoop) + Send>;

/// A native loop referenced by a bridge without being owned by it.
pub type SharedLoop = Arc<Mutex<NativeLoop>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Iterate until nothing keeps the loop alive or it is stopped.
    Default,
    /// One iteration, blocking for I/O if nothing was ready.
    Once,
    /// One iteration that never blocks.
    NoWait,
}

/// Result of `NativeLoop::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Live handles, referenced timers or a keep-alive reference remain.
    pub alive: bool,
    /// The stop flag was set; `run` cleared it on the way out.
    pub stopped: bool,
    /// Callbacks (I/O and timer) executed by this call.
    pub dispatched: usize,
}

struct IoHandle {
    fd: RawFd,
    interest: u8,
    callback: Option<IoCallback>,
}

pub struct NativeLoop {
    backend: Arc<Backend>,
    handles: HashMap<usize, IoHandle>,
    next_key: usize,
    timers: Timers,
    keepalive_refs: usize,
    wake_claimed: bool,
    stop_flag: bool,
    in_iteration: bool,
}

impl NativeLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            backend: Arc::new(Backend::new()?),
            handles: HashMap::new(),
            next_key: 1,
            timers: Timers::new(),
            keepalive_refs: 0,
            wake_claimed: false,
            stop_flag: false,
            in_iteration: false,
        })
    }

    /// Create a loop already wrapped for sharing with a bridge.
    pub fn shared() -> io::Result<SharedLoop> {
        Ok(Arc::new(Mutex::new(Self::new()?)))
    }

    // =========================================================================
    // I/O sources
    // =========================================================================

    /// Watch `fd` for `interest` (`READABLE | WRITABLE`). The callback runs
    /// once per readiness report; the source is re-armed after it returns.
    ///
    /// # Safety
    ///
    /// `fd` must be open and must stay open until the handle is deregistered.
    pub unsafe fn register<F>(
        &mut self,
        fd: RawFd,
        interest: u8,
        callback: F,
    ) -> io::Result<HandleId>
    where
        F: FnMut(&mut NativeLoop, Readiness) + Send + 'static,
    {
        let key = self.next_key;
        self.next_key += 1;
        self.backend.add(fd, key, interest)?;
        self.handles.insert(key, IoHandle { fd, interest, callback: Some(Box::new(callback)) });
        log::trace!("native loop: register fd={} key={} interest={:02b}", fd, key, interest);
        Ok(HandleId(key))
    }

    pub fn deregister(&mut self, id: HandleId) -> bool {
        match self.handles.remove(&id.0) {
            Some(handle) => {
                self.backend.delete(handle.fd);
                self.backend.forget(id.0);
                log::trace!("native loop: deregister key={} fd={}", id.0, handle.fd);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Run `callback` after `delay`, then every `repeat` if given.
    pub fn add_timer<F>(
        &mut self,
        delay: Duration,
        repeat: Option<Duration>,
        callback: F,
    ) -> TimerId
    where
        F: FnMut(&mut NativeLoop) + Send + 'static,
    {
        let id = self.timers.insert(Instant::now() + delay, repeat, Box::new(callback));
        self.deadline_changed();
        TimerId(id)
    }

    pub fn stop_timer(&mut self, id: TimerId) -> bool {
        let removed = self.timers.remove(id.0);
        if removed && !self.in_iteration {
            self.backend.publish_deadline(self.timers.next_deadline());
        }
        removed
    }

    /// Keep the timer firing, but stop it from keeping the loop alive.
    pub fn unref_timer(&mut self, id: TimerId) -> bool {
        self.timers.unref(id.0)
    }

    pub fn has_timer(&self, id: TimerId) -> bool {
        self.timers.contains(id.0)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    // Outside an iteration nobody republishes the deadline, and a remote
    // wait may be sleeping on a later one.
    fn deadline_changed(&mut self) {
        if self.in_iteration {
            return;
        }
        if self.backend.publish_deadline(self.timers.next_deadline()) {
            self.notify_backend();
        }
    }

    // =========================================================================
    // Stop flag / liveness
    // =========================================================================

    /// Ask the current (or next) `run` to return. The flag is consumed by `run`.
    pub fn stop(&mut self) {
        self.stop_flag = true;
        if !self.in_iteration {
            self.notify_backend();
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_flag
    }

    pub fn active_handles(&self) -> usize {
        self.handles.len() + self.timers.referenced() + self.keepalive_refs
    }

    pub fn is_alive(&self) -> bool {
        self.active_handles() > 0
    }

    /// How long a blocking poll may sleep before the next timer is due.
    pub fn backend_timeout(&self) -> Option<Duration> {
        self.timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn backend(&self) -> Arc<Backend> {
        self.backend.clone()
    }

    /// Reserve the loop's single wake source. With `keep_alive`, it counts as
    /// a live handle for the rest of the loop's life.
    pub(crate) fn claim_wake(&mut self, keep_alive: bool) -> bool {
        if self.wake_claimed {
            return false;
        }
        self.wake_claimed = true;
        if keep_alive {
            self.keepalive_refs += 1;
        }
        true
    }

    /// Undo `claim_wake` for a bridge that failed to start.
    pub(crate) fn release_wake(&mut self, keep_alive: bool) {
        if !self.wake_claimed {
            return;
        }
        self.wake_claimed = false;
        if keep_alive {
            self.keepalive_refs = self.keepalive_refs.saturating_sub(1);
        }
    }

    // =========================================================================
    // Running
    // =========================================================================

    pub fn run(&mut self, mode: RunMode) -> RunOutcome {
        let mut dispatched = 0usize;
        loop {
            dispatched += self.iterate(mode != RunMode::NoWait);

            let alive = self.is_alive();
            let stopped = std::mem::take(&mut self.stop_flag);
            if stopped || mode != RunMode::Default || !alive {
                self.backend.publish_deadline(self.timers.next_deadline());
                return RunOutcome { alive, stopped, dispatched };
            }
        }
    }

    fn iterate(&mut self, may_block: bool) -> usize {
        self.in_iteration = true;

        let mut dispatched = self.run_timers();

        let timeout = if may_block && dispatched == 0 && !self.stop_flag && self.is_alive() {
            self.backend_timeout()
        } else {
            Some(Duration::ZERO)
        };
        self.backend.wait(timeout);
        dispatched += self.dispatch_io();
        dispatched += self.run_timers();

        self.in_iteration = false;
        dispatched
    }

    fn run_timers(&mut self) -> usize {
        let now = Instant::now();
        let mut fired = 0usize;
        for id in self.timers.due(now) {
            let Some(mut callback) = self.timers.begin_fire(id, now) else {
                continue;
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut *self)));
            self.timers.finish_fire(id, callback);
            if let Err(payload) = result {
                self.unwind_iteration(payload);
            }
            fired += 1;
        }
        fired
    }

    fn dispatch_io(&mut self) -> usize {
        let mut dispatched = 0usize;
        let mut ready = self.backend.take_ready().into_iter();
        while let Some((key, readiness)) = ready.next() {
            let Some(mut callback) = self.handles.get_mut(&key).and_then(|h| h.callback.take())
            else {
                continue;
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut *self, readiness)));
            if let Some(handle) = self.handles.get_mut(&key) {
                if handle.callback.is_none() {
                    handle.callback = Some(callback);
                }
                self.backend.rearm(handle.fd, key, handle.interest);
            }
            if let Err(payload) = result {
                // Sources still disarmed by their oneshot event keep their
                // readiness for the next iteration.
                self.backend.restore_ready(ready.by_ref().collect());
                self.unwind_iteration(payload);
            }
            dispatched += 1;
        }
        dispatched
    }

    /// A callback panicked. Leave the loop usable for the next pump: end the
    /// iteration, publish the deadline `run` would have published, and wake
    /// a remote poll so leftover readiness is picked up, then keep unwinding.
    fn unwind_iteration(&mut self, payload: Box<dyn Any + Send>) -> ! {
        self.in_iteration = false;
        self.backend.publish_deadline(self.timers.next_deadline());
        self.notify_backend();
        panic::resume_unwind(payload)
    }

    fn notify_backend(&self) {
        if let Err(e) = self.backend.notify() {
            log::debug!("native loop: notify failed: {}", e);
        }
    }
}
