//! Periodic refresh of data shown to the user.
//!
//! [`spawn_refresh`] runs a fetch on an interval and publishes each success
//! on a `watch` channel. The task lives exactly as long as its
//! [`RefreshHandle`]: dropping the handle or calling [`RefreshHandle::stop`]
//! cancels it.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ClientError;

pub struct RefreshHandle<T> {
    rx: watch::Receiver<Option<T>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: Clone> RefreshHandle<T> {
    /// Latest fetched value, if any fetch has succeeded yet
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the task and wait for it to finish
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<T> Drop for RefreshHandle<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Fetch immediately and then every `every` until the handle goes away.
/// Failures are logged and retried on the next tick, except an expired
/// session, which ends the task.
pub fn spawn_refresh<T, F, Fut>(every: Duration, mut fetch: F) -> RefreshHandle<T>
where
    T: Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                result = fetch() => result,
            };
            match result {
                Ok(value) => {
                    if tx.send(Some(value)).is_err() {
                        break;
                    }
                }
                Err(e) if e.needs_login() => {
                    warn!("Stopping refresh: {}", e);
                    cancelled.cancel();
                    break;
                }
                Err(e) => warn!("Refresh failed: {}", e),
            }
        }
        debug!("Refresh task stopped");
    });

    RefreshHandle {
        rx,
        token,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<Result<usize, ClientError>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let fetch = move || std::future::ready(Ok(seen.fetch_add(1, Ordering::SeqCst) + 1));
        (calls, fetch)
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_on_each_tick() {
        let (calls, fetch) = counter();
        let handle = spawn_refresh(Duration::from_secs(5), fetch);
        let mut rx = handle.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(1));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.latest(), Some(3));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_task() {
        let (calls, fetch) = counter();
        let handle = spawn_refresh(Duration::from_secs(1), fetch);
        let mut rx = handle.subscribe();
        rx.changed().await.unwrap();
        drop(handle);

        let after_drop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_stops_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handle = spawn_refresh(Duration::from_secs(1), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<(), _>(ClientError::AuthExpired))
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_stopped());
        assert!(handle.latest().is_none());
    }
}
