//! Cancellable one-shot timers.

use std::time::Duration;

use tokio::task::JoinHandle;

/// A callback scheduled to run once after a delay.
///
/// Cancellation is explicit through [`ScheduledTask::cancel`]; dropping the
/// handle cancels as well, so a timer never outlives the state that owns it.
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    delay: Duration,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawns a timer on the current tokio runtime.
    pub fn spawn<F>(id: u64, delay: Duration, fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        Self { id, delay, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true once the callback ran or the timer was aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::ScheduledTask;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task = {
            let fired = Arc::clone(&fired);
            ScheduledTask::spawn(1, Duration::from_secs(5), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let task = {
            let fired = Arc::clone(&fired);
            ScheduledTask::spawn(2, Duration::from_secs(1), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(task.id(), 2);
        task.cancel();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            let _task = ScheduledTask::spawn(3, Duration::from_secs(1), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
