//! Poller thread.
//!
//! Alternates between waiting for the handoff and one blocking wait on the
//! native loop's backend. Every wait, whether it returned for readiness, a
//! timer deadline, a wake signal or an error, is followed by exactly one
//! posted pump, and the thread does not wait again until that pump released
//! the handoff. An already-ready source therefore cannot make it spin.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::handoff::Acquired;
use super::{pump, Shared};
use crate::host::HostLoop;
use crate::script::ScriptRuntime;

pub(super) fn spawn<H: HostLoop, R: ScriptRuntime>(
    name: &str,
    shared: Arc<Shared<H, R>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(move || run(&shared))
}

fn run<H: HostLoop, R: ScriptRuntime>(shared: &Arc<Shared<H, R>>) {
    log::debug!("poller: started");
    loop {
        if shared.handoff.acquire() == Acquired::Closed || shared.closed.is_cancelled() {
            break;
        }

        let timeout = shared.backend.timeout();
        log::trace!("poller: waiting, timeout {:?}", timeout);
        let events = shared.backend.wait(timeout);
        shared.counters.polls.fetch_add(1, Ordering::Relaxed);
        log::trace!("poller: woke with {} events", events);

        pump::post(shared);
    }
    log::debug!("poller: closed, exiting");
}
