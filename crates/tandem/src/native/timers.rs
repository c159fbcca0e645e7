use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::TimerCallback;

struct TimerEntry {
    deadline: Instant,
    repeat: Option<Duration>,
    referenced: bool,
    // None while the callback is running.
    callback: Option<TimerCallback>,
}

pub(super) struct Timers {
    entries: HashMap<u64, TimerEntry>,
    next_id: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), next_id: 1 }
    }

    pub fn insert(
        &mut self,
        deadline: Instant,
        repeat: Option<Duration>,
        callback: TimerCallback,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let entry = TimerEntry { deadline, repeat, referenced: true, callback: Some(callback) };
        self.entries.insert(id, entry);
        id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn unref(&mut self, id: u64) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.referenced = false;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn referenced(&self) -> usize {
        self.entries.values().filter(|e| e.referenced).count()
    }

    /// Earliest deadline across all timers, referenced or not.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    /// Ids due at `now`, in firing order.
    pub fn due(&self, now: Instant) -> Vec<u64> {
        let mut due: Vec<(Instant, u64)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, e)| (e.deadline, *id))
            .collect();
        due.sort_unstable();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Take the callback of a due timer. A repeating timer is rescheduled
    /// `repeat` from `now`; a one-shot timer is removed.
    pub fn begin_fire(&mut self, id: u64, now: Instant) -> Option<TimerCallback> {
        let entry = self.entries.get_mut(&id)?;
        if entry.deadline > now {
            return None;
        }
        match entry.repeat {
            Some(repeat) => {
                entry.deadline = now + repeat;
                entry.callback.take()
            }
            None => self.entries.remove(&id).and_then(|e| e.callback),
        }
    }

    /// Hand the callback back, unless the timer was stopped while it ran.
    pub fn finish_fire(&mut self, id: u64, callback: TimerCallback) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }
}
