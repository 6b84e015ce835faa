use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A task scheduled for a specific point in the future.
/// It runs by itself at that point, unless cancelled or triggered early.
pub struct ScheduledTask<T> {
    task_handle: JoinHandle<T>,
    wait_handle: JoinHandle<()>,
    signal: Arc<Notify>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule the given task to execute at time `run_at`, as seen from
    /// `now`. If `run_at` is not after `now`, the task runs immediately.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let signal = Arc::new(Notify::new());

        let task_signal = signal.clone();
        let task_handle = tokio::spawn(async move {
            task_signal.notified().await;
            task.await
        });

        // A second task gives the signal when the time comes.
        let sleep_duration = duration_between(now, run_at);
        let wait_signal = signal.clone();
        let wait_handle = tokio::spawn(async move {
            tokio::time::sleep(sleep_duration).await;
            wait_signal.notify_one();
        });

        Self {
            task_handle,
            wait_handle,
            signal,
        }
    }

    /// Cancel the task. Returns true iff it had already completed.
    pub async fn cancel(self) -> bool {
        self.task_handle.abort();
        self.wait_handle.abort();
        self.task_handle.await.is_ok()
    }

    /// Trigger the task now instead of waiting till the original time.
    pub fn trigger_now(&self) {
        self.wait_handle.abort();
        self.signal.notify_one();
    }
}

/// Implement `Future` for `ScheduledTask` so we can directly `await` it.
impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task_handle).poll(cx)
    }
}

/// Time from `now` until `then`; zero if `then` has passed.
fn duration_between(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    let millis = (then - now).num_milliseconds();
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}
