use std::{collections::HashMap, future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Named one-shot timers owned by a conversation. Scheduling under an
/// existing name replaces (aborts) the previous timer.
#[derive(Debug, Default)]
pub struct TimerScope {
    slots: HashMap<String, JoinHandle<()>>,
}

impl TimerScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&mut self, name: impl Into<String>, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = self.slots.insert(name.into(), handle) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self, name: &str) {
        if let Some(handle) = self.slots.remove(name) {
            handle.abort();
        }
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(|h| !h.is_finished())
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.slots.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_timer() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scope = TimerScope::new();

        for value in [1, 10] {
            let fired = Arc::clone(&fired);
            scope.schedule("stop", Duration::from_secs(1), async move {
                fired.fetch_add(value, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scope_cancels_everything() {
        let fired = Arc::new(AtomicU32::new(0));
        {
            let mut scope = TimerScope::new();
            let counter = Arc::clone(&fired);
            scope.schedule("expiry", Duration::from_secs(5), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert!(scope.is_pending("expiry"));
        }
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_with_different_names_run_independently() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scope = TimerScope::new();
        for id in 1..=3 {
            let fired = Arc::clone(&fired);
            scope.schedule(format!("echo:{id}"), Duration::from_secs(2), async move {
                fired.fetch_add(id, Ordering::SeqCst);
            });
        }
        scope.cancel("echo:2");
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 4);
        assert!(!scope.is_pending("echo:1"));
    }
}
