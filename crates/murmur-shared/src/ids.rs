//! Process-local id generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing ids seeded from the wall clock (Unix millis).
///
/// Each call returns `max(now_millis, last + 1)`, so ids never collide within
/// the process lifetime even when the clock stalls or steps backwards.
#[derive(Debug)]
pub struct MonotonicIds {
    last: AtomicU64,
    clock: bool,
}

impl MonotonicIds {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
            clock: true,
        }
    }

    /// Plain counter starting at `seed`, ignoring the clock. Used where
    /// predictable ids matter (tests, replays).
    pub fn starting_at(seed: u64) -> Self {
        Self {
            last: AtomicU64::new(seed.saturating_sub(1)),
            clock: false,
        }
    }

    pub fn next(&self) -> u64 {
        let now = if self.clock {
            chrono::Utc::now().timestamp_millis().max(0) as u64
        } else {
            0
        };
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for MonotonicIds {
    fn default() -> Self {
        Self::new()
    }
}
