//! Bridge configuration.
//!
//! Defaults match the embedding this bridge was written for: a 5s idle
//! notification period and a wake handle that keeps the native loop alive.
//! `from_env` lets a deployment override them without recompiling.

use std::time::Duration;

pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_THREAD_NAME: &str = "tandem-poller";

pub const ENV_IDLE_INTERVAL_MS: &str = "TANDEM_IDLE_INTERVAL_MS";
pub const ENV_KEEP_ALIVE: &str = "TANDEM_KEEP_ALIVE";

/// Which side of the embedding this bridge serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The initiating process. Runs the idle notification timer.
    Primary,
    /// A secondary (rendering) process.
    Secondary,
}

impl Role {
    pub fn runs_idle_timer(self) -> bool {
        matches!(self, Role::Primary)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub role: Role,
    /// Period of the idle notification timer (primary role only).
    pub idle_interval: Duration,
    /// Whether the wake handle counts as a live handle on the native loop.
    /// When false, the host loop is asked to quit once the native loop drains.
    pub keep_alive: bool,
    pub thread_name: String,
}

impl BridgeConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            keep_alive: true,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Defaults for `role`, overridden by `TANDEM_IDLE_INTERVAL_MS` and
    /// `TANDEM_KEEP_ALIVE`. Unparseable values are logged and ignored.
    pub fn from_env(role: Role) -> Self {
        Self::from_lookup(role, |key| std::env::var(key).ok())
    }

    fn from_lookup(role: Role, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(role);

        if let Some(raw) = lookup(ENV_IDLE_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.idle_interval = Duration::from_millis(ms),
                _ => log::warn!(
                    "ignoring {}={:?}: expected a positive integer",
                    ENV_IDLE_INTERVAL_MS,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(ENV_KEEP_ALIVE) {
            match parse_flag(&raw) {
                Some(flag) => config.keep_alive = flag,
                None => log::warn!("ignoring {}={:?}: expected a boolean", ENV_KEEP_ALIVE, raw),
            }
        }

        config
    }

    /// A zero period would make the idle timer due on every pump and keep the
    /// poller spinning; it is logged and ignored like a bad env value.
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            log::warn!("ignoring zero idle interval, keeping {:?}", self.idle_interval);
            return self;
        }
        self.idle_interval = interval;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(Role::Primary)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
