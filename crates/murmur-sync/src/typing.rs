//! Single-slot debounce for the outbound typing-stop emit.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Holds at most one deferred stop task. Restarting replaces it.
#[derive(Default)]
pub struct TypingDebounce {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl TypingDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort any scheduled stop and schedule `on_quiet` to run once `quiet`
    /// has elapsed without another restart.
    ///
    /// Returns `true` when no stop was pending, i.e. this call opens a new
    /// typing burst and the caller should announce the start.
    pub fn restart<F>(&self, quiet: Duration, on_quiet: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let new_burst = match slot.take() {
            Some(previous) if !previous.is_finished() => {
                previous.abort();
                false
            }
            _ => true,
        };

        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            on_quiet.await;
        }));
        new_burst
    }

    /// Abort the scheduled stop. Returns `true` if one was still pending.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(pending) if !pending.is_finished() => {
                pending.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TypingDebounce {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_after_quiet() {
        let debounce = TypingDebounce::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let quiet = Duration::from_secs(2);

        let mut starts = 0;
        for _ in 0..3 {
            if debounce.restart(quiet, counting(&stops)) {
                starts += 1;
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }

        assert_eq!(starts, 1);
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!debounce.is_pending());

        // Quiet period elapsed: the next call opens a new burst.
        assert!(debounce.restart(quiet, counting(&stops)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_stop() {
        let debounce = TypingDebounce::new();
        let stops = Arc::new(AtomicUsize::new(0));

        debounce.restart(Duration::from_secs(2), counting(&stops));
        assert!(debounce.is_pending());
        assert!(debounce.cancel());
        assert!(!debounce.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 0);
    }
}
