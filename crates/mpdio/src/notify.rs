// Manifest update callback delivery. Callbacks run on a dedicated task so a
// slow subscriber can never stall the download loop; updates arriving while
// the callback runs coalesce into a single pending flag.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type ManifestUpdateCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct NotifierShared {
    pending: AtomicBool,
    notify: Notify,
    callback: Mutex<Option<ManifestUpdateCallback>>,
}

/// Fan-out point for "a new manifest was pushed" events.
#[derive(Default)]
pub struct UpdateNotifier {
    shared: Arc<NotifierShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes register/shutdown: the is-active check, the join of the
    /// previous delivery task, and the install must not interleave.
    registration: AsyncMutex<()>,
}

impl UpdateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an update pending and wake the delivery task. Safe to call with
    /// no callback registered; the flag is simply consumed unobserved.
    pub fn notify_update(&self) {
        self.shared.pending.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Install the callback and spawn its delivery task. A second register
    /// while one callback is active is ignored; the first subscriber keeps
    /// the slot until it unregisters.
    pub async fn register(&self, token: &CancellationToken, callback: ManifestUpdateCallback) {
        let _registration = self.registration.lock().await;
        if self.shared.callback.lock().is_some() {
            info!("Manifest update callback already registered, ignoring");
            return;
        }

        // A previous delivery task exits once its callback is cleared; wait
        // it out before installing the next subscriber.
        let previous = self.task.lock().take();
        if let Some(handle) = previous {
            let _ = handle.await;
        }

        *self.shared.callback.lock() = Some(callback);
        let shared = Arc::clone(&self.shared);
        let token = token.clone();
        let handle = tokio::spawn(async move {
            debug!("Manifest update delivery task started");
            loop {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if token.is_cancelled() {
                    break;
                }
                let callback = shared.callback.lock().clone();
                let Some(callback) = callback else {
                    break;
                };
                if shared.pending.swap(false, Ordering::AcqRel) {
                    callback();
                    continue;
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = &mut notified => {}
                }
            }
            debug!("Manifest update delivery task stopped");
        });
        *self.task.lock() = Some(handle);
    }

    /// Remove the callback; the delivery task exits on its next wakeup and
    /// no invocation happens after this returns control to the loop.
    pub fn unregister(&self) {
        *self.shared.callback.lock() = None;
        self.shared.notify.notify_waiters();
    }

    /// Release-time teardown: drop the callback and wait for the delivery
    /// task to finish. The session token must already be cancelled.
    pub async fn shutdown(&self) {
        let _registration = self.registration.lock().await;
        self.unregister();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn counting_callback() -> (ManifestUpdateCallback, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let cloned = Arc::clone(&count);
        let callback: ManifestUpdateCallback = Arc::new(move || {
            cloned.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    #[tokio::test]
    async fn registered_callback_fires_on_update() {
        let notifier = UpdateNotifier::new();
        let token = CancellationToken::new();
        let (callback, count) = counting_callback();

        notifier.register(&token, callback).await;
        notifier.notify_update();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        token.cancel();
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn update_before_register_is_delivered() {
        let notifier = UpdateNotifier::new();
        let token = CancellationToken::new();
        let (callback, count) = counting_callback();

        notifier.notify_update();
        notifier.register(&token, callback).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        token.cancel();
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let notifier = UpdateNotifier::new();
        let token = CancellationToken::new();
        let (callback, count) = counting_callback();

        notifier.register(&token, callback).await;
        notifier.unregister();
        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.notify_update();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        token.cancel();
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn second_register_is_ignored_while_first_active() {
        let notifier = UpdateNotifier::new();
        let token = CancellationToken::new();
        let (first, first_count) = counting_callback();
        let (second, second_count) = counting_callback();

        notifier.register(&token, first).await;
        notifier.register(&token, second).await;
        notifier.notify_update();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(first_count.load(Ordering::SeqCst) >= 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);

        token.cancel();
        notifier.shutdown().await;
    }

    // Two register() calls racing right after an unregister must both
    // return; the loser sees the winner's callback installed and backs off
    // instead of stalling on a delivery task that never exits.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_registers_after_unregister_all_complete() {
        let notifier = Arc::new(UpdateNotifier::new());
        let token = CancellationToken::new();

        for _ in 0..64 {
            let (callback, _count) = counting_callback();
            notifier.register(&token, callback).await;
            notifier.unregister();

            let (first, _first_count) = counting_callback();
            let (second, _second_count) = counting_callback();
            let left = {
                let notifier = Arc::clone(&notifier);
                let token = token.clone();
                tokio::spawn(async move { notifier.register(&token, first).await })
            };
            let right = {
                let notifier = Arc::clone(&notifier);
                let token = token.clone();
                tokio::spawn(async move { notifier.register(&token, second).await })
            };
            tokio::time::timeout(Duration::from_secs(10), async {
                left.await.expect("left register task");
                right.await.expect("right register task");
            })
            .await
            .expect("both registrations completed");

            notifier.unregister();
        }

        token.cancel();
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_clean_without_registration() {
        let notifier = UpdateNotifier::new();
        notifier.notify_update();
        notifier.shutdown().await;
    }
}
