//! Binary handoff between the host thread and the poller thread.
//!
//! A pump releases the handoff when it is done with the native loop; the
//! poller thread acquires it before each poll. The counter is 0 or 1: a
//! second release before the poller consumed the first is a protocol
//! violation (two pumps for one poll) and trips a debug assertion.
//!
//! Closing is separate from releasing. Once closed, every acquire returns
//! `Acquired::Closed` immediately, so no acquire can block forever after
//! teardown, whatever the counter says.

use crate::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The previous pump finished; the caller may poll once.
    Permit,
    /// The handoff was closed; the caller must exit.
    Closed,
}

#[derive(Debug, Default)]
struct State {
    permits: u8,
    closed: bool,
}

pub struct HandoffSignal {
    state: Mutex<State>,
    cond: Condvar,
}

impl HandoffSignal {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()), cond: Condvar::new() }
    }

    /// Block until a release or `close`. Closing wins over a pending permit.
    pub fn acquire(&self) -> Acquired {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if state.closed {
                return Acquired::Closed;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return Acquired::Permit;
            }
            state = self.cond.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Hand the native loop back to the poller. Called once per pump.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        debug_assert!(
            state.permits == 0 || state.closed,
            "handoff released twice without an acquire in between"
        );
        if state.permits > 0 && !state.closed {
            log::error!("handoff: double release, permit count saturated at 1");
        }
        state.permits = 1;
        drop(state);
        self.cond.notify_one();
    }

    /// Wake any waiter and make every later acquire return `Closed`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).closed
    }

    /// Pending releases not yet consumed by an acquire (0 or 1).
    pub fn pending(&self) -> u8 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).permits
    }

    /// A guard that releases the handoff when dropped, on every exit path.
    pub fn release_on_drop(&self) -> ReleaseGuard<'_> {
        ReleaseGuard { signal: self }
    }
}

impl Default for HandoffSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "the handoff is released when the guard is dropped"]
pub struct ReleaseGuard<'a> {
    signal: &'a HandoffSignal,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.signal.release();
    }
}
