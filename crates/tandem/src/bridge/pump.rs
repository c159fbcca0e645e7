//! Host-loop pump task.
//!
//! One pump = one non-blocking iteration of the native loop, run on the host
//! thread inside the script context. Whatever happens in the iteration, the
//! handoff is released exactly once when the pump returns: the release guard
//! is the first thing created and the last thing dropped, so it also fires
//! when a native callback panics. A pump that never released would leave the
//! poller thread blocked for good.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use super::Shared;
use crate::host::HostLoop;
use crate::native::{RunMode, RunOutcome};
use crate::script::{ContextScope, ScriptRuntime};
use crate::sync::lock;

/// How a pump left the native loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The loop has more to do; the poller keeps watching it.
    Continue { dispatched: usize },
    /// Nothing keeps the native loop alive any more.
    Drained,
    /// Someone set the native loop's stop flag.
    Stopped,
}

impl PumpOutcome {
    pub fn from_run(outcome: RunOutcome) -> Self {
        if outcome.stopped {
            PumpOutcome::Stopped
        } else if !outcome.alive {
            PumpOutcome::Drained
        } else {
            PumpOutcome::Continue { dispatched: outcome.dispatched }
        }
    }

    /// Both a drained loop and an explicit stop end the host loop; they are
    /// kept apart for logging and stats.
    pub fn requests_quit(self) -> bool {
        !matches!(self, PumpOutcome::Continue { .. })
    }
}

/// Enqueue a pump on the host loop. Called by the poller thread after each poll.
pub(super) fn post<H: HostLoop, R: ScriptRuntime>(shared: &Arc<Shared<H, R>>) {
    let task_shared = shared.clone();
    shared.counters.pumps_posted.fetch_add(1, Ordering::Relaxed);
    shared.host.post_task(Box::new(move || {
        run(&task_shared);
    }));
}

pub(super) fn run<H: HostLoop, R: ScriptRuntime>(shared: &Shared<H, R>) -> PumpOutcome {
    let _release = shared.handoff.release_on_drop();

    if let Some(host_thread) = shared.host_thread.get() {
        debug_assert_eq!(*host_thread, thread::current().id(), "pump ran off the host thread");
    }

    let outcome = {
        let _scope = ContextScope::enter(&*shared.runtime);
        let mut native = lock(&shared.native);
        PumpOutcome::from_run(native.run(RunMode::NoWait))
    };
    shared.counters.pumps_run.fetch_add(1, Ordering::Relaxed);

    match outcome {
        PumpOutcome::Continue { dispatched } => {
            log::trace!("pump: dispatched {} callbacks", dispatched);
        }
        PumpOutcome::Drained => {
            log::debug!("pump: native loop drained, quitting host loop when idle");
            shared.counters.drained.fetch_add(1, Ordering::Relaxed);
            shared.host.quit_when_idle();
        }
        PumpOutcome::Stopped => {
            log::debug!("pump: native loop stopped, quitting host loop when idle");
            shared.counters.stopped.fetch_add(1, Ordering::Relaxed);
            shared.host.quit_when_idle();
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(alive: bool, stopped: bool, dispatched: usize) -> RunOutcome {
        RunOutcome { alive, stopped, dispatched }
    }

    #[test]
    fn stop_takes_precedence_over_drain() {
        assert_eq!(PumpOutcome::from_run(outcome(false, true, 0)), PumpOutcome::Stopped);
        assert_eq!(PumpOutcome::from_run(outcome(true, true, 2)), PumpOutcome::Stopped);
        assert_eq!(PumpOutcome::from_run(outcome(false, false, 1)), PumpOutcome::Drained);
        assert_eq!(
            PumpOutcome::from_run(outcome(true, false, 3)),
            PumpOutcome::Continue { dispatched: 3 }
        );
    }

    #[test]
    fn only_continue_keeps_host_running() {
        assert!(!PumpOutcome::Continue { dispatched: 0 }.requests_quit());
        assert!(PumpOutcome::Drained.requests_quit());
        assert!(PumpOutcome::Stopped.requests_quit());
    }
}
