//! tandem: run a blocking native I/O loop under a single-threaded host loop.
//!
//! The native loop owns fd readiness and timers and wants to block in its
//! poller; the host loop (UI or application dispatch) must never block and
//! may only be touched from its own thread. [`LoopBridge`] puts the blocking
//! wait on a dedicated poller thread and turns every wakeup into exactly one
//! pump of the native loop on the host thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem::{BridgeConfig, HostQueue, LoopBridge, NativeLoop, NullRuntime, Role};
//!
//! let native = NativeLoop::shared()?;
//! let host = HostQueue::new();
//! let mut bridge = LoopBridge::new(
//!     BridgeConfig::new(Role::Primary),
//!     native,
//!     host.clone(),
//!     Arc::new(NullRuntime),
//! );
//! bridge.prepare_message_loop()?;
//! bridge.run_message_loop()?;
//! host.run();
//! bridge.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod native;
pub mod script;
pub mod startup;
mod sync;

pub use bridge::{BridgeState, BridgeStats, LoopBridge, PumpOutcome, WakeHandle};
pub use config::{BridgeConfig, Role};
pub use error::{BridgeError, Result};
pub use host::{HostLoop, HostQueue, Task};
pub use native::{NativeLoop, Readiness, RunMode, RunOutcome, SharedLoop, READABLE, WRITABLE};
pub use script::{ContextScope, NullRuntime, ScriptRuntime};
