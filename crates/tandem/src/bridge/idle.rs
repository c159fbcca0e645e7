//! Idle notification timer (primary role only).
//!
//! A repeating native-loop timer that hands the script runtime a low-priority
//! maintenance hint. It fires from whichever pump happens to run when it is
//! due and is not otherwise tied to the poll/pump cycle. The timer is
//! unreferenced: it never keeps the native loop alive on its own.

use std::sync::Arc;
use std::time::Duration;

use crate::native::{NativeLoop, TimerId};
use crate::script::ScriptRuntime;

#[derive(Debug)]
pub struct IdleTimer {
    id: TimerId,
    interval: Duration,
}

impl IdleTimer {
    pub fn start<R: ScriptRuntime>(
        native: &mut NativeLoop,
        runtime: Arc<R>,
        interval: Duration,
    ) -> Self {
        let id = native.add_timer(interval, Some(interval), move |_| {
            log::trace!("idle timer: notifying runtime");
            runtime.idle_notification();
        });
        native.unref_timer(id);
        log::debug!("idle timer: started, period {:?}", interval);
        Self { id, interval }
    }

    pub fn stop(self, native: &mut NativeLoop) -> bool {
        log::debug!("idle timer: stopped");
        native.stop_timer(self.id)
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
