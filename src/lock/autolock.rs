//! Bridge-owned relock timer.
//!
//! Only used when autolock is in `plugin` mode. At most one timer is pending:
//! arming again aborts the previous one, so repeated unlocks push the relock
//! back instead of stacking several.

use log::{debug, info};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct AutolockScheduler {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl AutolockScheduler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Run `action` once `delay` has elapsed, replacing any pending timer.
    ///
    /// The action is spawned as its own task when the timer fires, so a later
    /// `arm` or `cancel` can only abort the wait, never a relock in flight.
    pub fn arm<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take()
            && !previous.is_finished()
        {
            debug!("[Autolock] Replacing pending timer");
            previous.abort();
        }

        info!("[Autolock] Starting {} second timer", delay.as_secs());
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("[Autolock] Autolocking...");
            tokio::spawn(action);
        }));
    }

    /// Abort the pending timer. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                debug!("[Autolock] Pending timer cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for AutolockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AutolockScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter_action(counter: &Arc<AtomicU32>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay_not_before() {
        let scheduler = AutolockScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));

        scheduler.arm(Duration::from_secs(10), counter_action(&fired));
        assert!(scheduler.is_pending());

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_timer() {
        let scheduler = AutolockScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));

        scheduler.arm(Duration::from_secs(10), counter_action(&fired));
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.arm(Duration::from_secs(10), counter_action(&fired));

        // First timer would have fired at 10s
        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = AutolockScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(!scheduler.cancel());
        scheduler.arm(Duration::from_secs(5), counter_action(&fired));
        assert!(scheduler.cancel());
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
