//! Cancellable one-shot timers on the tokio runtime.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Handle to work scheduled with [`schedule`].
///
/// Cancelling is idempotent and safe to race against the timer firing: a
/// task that already started its body after the delay is not interrupted
/// unless the body itself awaits.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    /// Cancel the scheduled work if it has not run yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// True once the task ran to completion or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Run `task` once after `delay`, measured from this call.
///
/// Must be called from within a tokio runtime.
pub fn schedule<F>(delay: Duration, task: F) -> ScheduledTask
where
    F: Future<Output = ()> + Send + 'static,
{
    let deadline = Instant::now() + delay;
    let join = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        task.await;
    });
    ScheduledTask {
        handle: join.abort_handle(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let task = schedule(Duration::from_secs(3), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let task = schedule(Duration::from_secs(1), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        task.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let task = schedule(Duration::from_secs(1), async {});
        task.cancel();
        task.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        task.cancel();
        assert!(task.is_finished());
    }
}
