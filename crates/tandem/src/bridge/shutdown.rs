//! Bridge lifecycle and the ordered teardown.
//!
//! ```text
//! Created ──prepare──▶ Prepared ──run──▶ Running
//!    │                    │                 │
//!    │                    └──────┬──────────┘
//!    │                           ▼
//!    │                        Closing ──join──▶ Joined ──drain──▶ Destroyed
//!    └─────────────────────────────────────────────────────────────▲
//! ```
//!
//! Teardown order matters: the closed flag is set before the handoff is
//! closed and the wake handle fired, so the poller thread, whichever of its
//! two suspension points it is in, comes out and sees it. Only after the
//! thread is joined can no new pump be posted, and only then is the host loop
//! drained so no pump outlives the bridge.
//!
//! A native callback may panic inside that drain. Teardown then stops in
//! `Joined` and the next call (or `Drop`) resumes from there.

use std::thread::JoinHandle;

use super::idle::IdleTimer;
use super::Shared;
use crate::error::{BridgeError, Result};
use crate::host::HostLoop;
use crate::script::ScriptRuntime;
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    Created,
    Prepared,
    Running,
    Closing,
    Joined,
    Destroyed,
}

impl BridgeState {
    pub fn can_advance_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Created, Prepared)
                | (Created, Destroyed)
                | (Prepared, Running)
                | (Prepared, Closing)
                | (Running, Closing)
                | (Closing, Joined)
                | (Joined, Destroyed)
        )
    }
}

#[derive(Debug)]
pub(super) struct Lifecycle {
    state: BridgeState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { state: BridgeState::Created }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn advance(&mut self, next: BridgeState) -> Result<()> {
        let from = self.state;
        if !from.can_advance_to(next) {
            debug_assert!(false, "invalid bridge transition {:?} -> {:?}", from, next);
            return Err(BridgeError::InvalidTransition { from, to: next });
        }
        log::debug!("bridge: {:?} -> {:?}", from, next);
        self.state = next;
        Ok(())
    }
}

pub(super) fn teardown<H: HostLoop, R: ScriptRuntime>(
    lifecycle: &mut Lifecycle,
    shared: &Shared<H, R>,
    poller: &mut Option<JoinHandle<()>>,
    idle: &mut Option<IdleTimer>,
) -> Result<()> {
    match lifecycle.state() {
        BridgeState::Destroyed => return Ok(()),
        BridgeState::Created => return lifecycle.advance(BridgeState::Destroyed),
        BridgeState::Prepared | BridgeState::Running => {
            // -> Closing: unstick both suspension points of the poller.
            lifecycle.advance(BridgeState::Closing)?;
            shared.closed.cancel();
            shared.handoff.close();
            shared.wake.signal();
        }
        // An earlier teardown unwound part way; pick up where it stopped.
        BridgeState::Closing | BridgeState::Joined => {
            log::debug!("bridge: resuming teardown from {:?}", lifecycle.state());
        }
    }

    // Closing -> Joined: no timeout, the wake above guarantees progress.
    if lifecycle.state() == BridgeState::Closing {
        if let Some(handle) = poller.take() {
            if handle.join().is_err() {
                log::error!("bridge: poller thread panicked");
            }
        }
        lifecycle.advance(BridgeState::Joined)?;
    }

    // Joined -> Destroyed. The idle timer goes first so a panicking pump in
    // the drain below cannot leave it registered.
    if let Some(idle) = idle.take() {
        idle.stop(&mut lock(&shared.native));
    }
    // Run the pumps the poller posted on its way out.
    shared.host.run_until_idle();
    lifecycle.advance(BridgeState::Destroyed)
}
