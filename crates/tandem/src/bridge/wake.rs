//! Wake handle: interrupts the poller thread's blocking wait.
//!
//! Backed by the OS poller's own notification primitive (eventfd/pipe/kqueue
//! user event), so there is no callback to run on the native loop. Signals
//! coalesce: any number of `signal` calls before the next wait produce one
//! wakeup, and signalling with nobody waiting just arms the next wait.

use std::sync::Arc;

use crate::native::Backend;

#[derive(Clone)]
pub struct WakeHandle {
    backend: Arc<Backend>,
}

impl WakeHandle {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// Interrupt a blocking poll. Safe from any thread, never fails.
    pub fn signal(&self) {
        if let Err(e) = self.backend.notify() {
            log::debug!("wake handle: notify failed: {}", e);
        }
    }
}

impl std::fmt::Debug for WakeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeHandle").finish_non_exhaustive()
    }
}
