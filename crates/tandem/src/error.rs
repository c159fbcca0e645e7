use std::io;

use crate::bridge::BridgeState;

/// Setup and lifecycle errors surfaced by the bridge.
///
/// Protocol violations inside the poll/pump cycle are not represented here;
/// they are prevented by construction and caught by debug assertions.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to create native loop: {0}")]
    NativeLoop(#[source] io::Error),
    #[error("failed to spawn poller thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("poller thread name {0:?} contains a NUL byte")]
    InvalidThreadName(String),
    #[error("bridge already prepared (state {0:?})")]
    AlreadyPrepared(BridgeState),
    #[error("bridge not prepared (state {0:?})")]
    NotPrepared(BridgeState),
    #[error("invalid bridge transition {from:?} -> {to:?}")]
    InvalidTransition { from: BridgeState, to: BridgeState },
    #[error("native loop already has a wake handle registered")]
    WakeHandleTaken,
    #[error("argv is empty, cannot place startup script")]
    EmptyArgv,
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
