//! Cross-loop bridge.
//!
//! Drives a `NativeLoop` from a single-threaded host loop without blocking
//! the host thread:
//!
//! ```text
//!   host thread                          poller thread
//!   ───────────                          ─────────────
//!   run_message_loop: pump ──release──▶  acquire
//!                                        wait on backend (blocks)
//!   pump  ◀──────────post_task────────── readiness / timer / wake
//!     run(NoWait), release ───────────▶  acquire
//!                                        wait on backend ...
//! ```
//!
//! The handoff makes the two sides strictly alternate: at most one poll
//! between two pumps, one pump per poll. The native loop is only mutated by
//! pumps; the poller thread only touches the backend, and never while a pump
//! is running.
//!
//! A bridge must be created, prepared, run and torn down on the host thread.

mod cancel;
pub mod handoff;
mod idle;
mod poller;
mod pump;
mod shutdown;
mod wake;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

pub use cancel::CancellationToken;
pub use handoff::{Acquired, HandoffSignal};
pub use idle::IdleTimer;
pub use pump::PumpOutcome;
pub use shutdown::BridgeState;
pub use wake::WakeHandle;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::HostLoop;
use crate::native::{Backend, NativeLoop, SharedLoop};
use crate::script::ScriptRuntime;
use crate::sync::lock;
use shutdown::Lifecycle;

/// Counters for the poll/pump alternation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Blocking waits completed by the poller thread.
    pub polls: u64,
    /// Pumps posted to the host loop by the poller thread.
    pub pumps_posted: u64,
    /// Pumps executed, including the startup pump.
    pub pumps_run: u64,
    /// Pumps that found the native loop drained.
    pub drained: u64,
    /// Pumps that found the native loop stopped.
    pub stopped: u64,
}

#[derive(Default)]
struct Counters {
    polls: AtomicU64,
    pumps_posted: AtomicU64,
    pumps_run: AtomicU64,
    drained: AtomicU64,
    stopped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            polls: self.polls.load(Ordering::Relaxed),
            pumps_posted: self.pumps_posted.load(Ordering::Relaxed),
            pumps_run: self.pumps_run.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
        }
    }
}

/// State shared by the bridge, the poller thread and posted pumps.
struct Shared<H, R> {
    native: SharedLoop,
    backend: Arc<Backend>,
    handoff: HandoffSignal,
    closed: CancellationToken,
    wake: WakeHandle,
    host: H,
    runtime: Arc<R>,
    host_thread: OnceLock<ThreadId>,
    counters: Counters,
}

pub struct LoopBridge<H: HostLoop, R: ScriptRuntime> {
    config: BridgeConfig,
    shared: Arc<Shared<H, R>>,
    lifecycle: Lifecycle,
    poller: Option<JoinHandle<()>>,
    idle_timer: Option<IdleTimer>,
}

impl<H: HostLoop, R: ScriptRuntime> LoopBridge<H, R> {
    pub fn new(config: BridgeConfig, native: SharedLoop, host: H, runtime: Arc<R>) -> Self {
        let backend = lock(&native).backend();
        let wake = WakeHandle::new(backend.clone());
        Self {
            config,
            shared: Arc::new(Shared {
                native,
                backend,
                handoff: HandoffSignal::new(),
                closed: CancellationToken::new(),
                wake,
                host,
                runtime,
                host_thread: OnceLock::new(),
                counters: Counters::default(),
            }),
            lifecycle: Lifecycle::new(),
            poller: None,
            idle_timer: None,
        }
    }

    /// Bridge over a fresh native loop of its own.
    pub fn with_new_loop(config: BridgeConfig, host: H, runtime: Arc<R>) -> Result<Self> {
        let native = NativeLoop::shared().map_err(BridgeError::NativeLoop)?;
        Ok(Self::new(config, native, host, runtime))
    }

    /// Claim the native loop's wake source, start the idle timer (primary
    /// role) and spawn the poller thread. The poller waits for the first
    /// pump before it polls.
    pub fn prepare_message_loop(&mut self) -> Result<()> {
        let state = self.lifecycle.state();
        if state != BridgeState::Created {
            return Err(BridgeError::AlreadyPrepared(state));
        }
        // Builder::spawn panics on an interior NUL instead of failing.
        if self.config.thread_name.contains('\0') {
            return Err(BridgeError::InvalidThreadName(self.config.thread_name.clone()));
        }

        {
            let mut native = lock(&self.shared.native);
            if !native.claim_wake(self.config.keep_alive) {
                return Err(BridgeError::WakeHandleTaken);
            }
            if self.config.role.runs_idle_timer() {
                self.idle_timer = Some(IdleTimer::start(
                    &mut native,
                    self.shared.runtime.clone(),
                    self.config.idle_interval,
                ));
            }
        }

        let _ = self.shared.host_thread.set(thread::current().id());

        match poller::spawn(&self.config.thread_name, self.shared.clone()) {
            Ok(handle) => self.poller = Some(handle),
            Err(e) => {
                let mut native = lock(&self.shared.native);
                if let Some(idle) = self.idle_timer.take() {
                    idle.stop(&mut native);
                }
                native.release_wake(self.config.keep_alive);
                return Err(BridgeError::Spawn(e));
            }
        }

        log::debug!("bridge: prepared ({:?} role)", self.config.role);
        self.lifecycle.advance(BridgeState::Prepared)
    }

    /// Run the startup pump on the host thread. It gives the native loop its
    /// first iteration and hands the handoff to the poller thread; from then
    /// on pumps arrive through the host loop.
    pub fn run_message_loop(&mut self) -> Result<PumpOutcome> {
        let state = self.lifecycle.state();
        if state != BridgeState::Prepared {
            return Err(BridgeError::NotPrepared(state));
        }
        self.lifecycle.advance(BridgeState::Running)?;
        Ok(pump::run(&self.shared))
    }

    /// Ordered teardown: close, join the poller thread, drain the host loop,
    /// stop the idle timer. Idempotent; also run on drop.
    pub fn shutdown(&mut self) -> Result<()> {
        shutdown::teardown(
            &mut self.lifecycle,
            &self.shared,
            &mut self.poller,
            &mut self.idle_timer,
        )
    }

    pub fn state(&self) -> BridgeState {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn native(&self) -> &SharedLoop {
        &self.shared.native
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.shared.wake.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Pending handoff releases (0 or 1).
    pub fn handoff_pending(&self) -> u8 {
        self.shared.handoff.pending()
    }

    pub fn idle_timer(&self) -> Option<&IdleTimer> {
        self.idle_timer.as_ref()
    }
}

impl<H: HostLoop, R: ScriptRuntime> Drop for LoopBridge<H, R> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("bridge: teardown failed: {}", e);
        }
    }
}
