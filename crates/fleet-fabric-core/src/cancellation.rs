//! A cheap, cloneable cancellation signal (spec §5 "Cancellation"). `Execute`
//! threads one of these through discovery, rent and the in-flight transport
//! call so a single `cancel()` call unwinds all three.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Resolves immediately if it
    /// already has been.
    ///
    /// The waiter is registered before the flag check so a `cancel()` landing
    /// in between is not missed: `notify_waiters()` only wakes tasks already
    /// polling the `Notified` future, it stores no permit for later arrivals.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
