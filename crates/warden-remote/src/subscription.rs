//! Live document feeds.
//!
//! A [`Subscription`] is pull-based (`recv().await`). Calling
//! [`Subscription::on_change`] turns it into a callback listener running on
//! its own task; the returned [`ListenerRegistration`] stops it when removed
//! or dropped.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warden_types::{DeviceId, DeviceRecord};

/// A live feed of one device document.
pub struct Subscription {
    device_id: DeviceId,
    initial: Option<DeviceRecord>,
    rx: broadcast::Receiver<DeviceRecord>,
    /// Whatever keeps the feed producing (e.g. a file watcher).
    _source: Option<Box<dyn Send>>,
}

impl Subscription {
    pub(crate) fn new(
        device_id: DeviceId,
        initial: Option<DeviceRecord>,
        rx: broadcast::Receiver<DeviceRecord>,
    ) -> Self {
        Self { device_id, initial, rx, _source: None }
    }

    pub(crate) fn with_source(mut self, source: impl Send + 'static) -> Self {
        self._source = Some(Box::new(source));
        self
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Next document state. `None` once the backend closes the feed.
    pub async fn recv(&mut self) -> Option<DeviceRecord> {
        if let Some(record) = self.initial.take() {
            return Some(record);
        }
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Only the newest state matters; keep reading.
                    warn!(device_id = %self.device_id, lagged = n, "document feed lagged behind");
                }
            }
        }
    }

    /// Stop the feed and free its resources. Dropping the subscription
    /// does the same; this only makes the release explicit at call sites.
    pub fn release(self) {
        debug!(device_id = %self.device_id, "subscription released");
        drop(self);
    }

    /// Deliver every change to `on_change` from a background task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn on_change<F>(self, mut on_change: F) -> ListenerRegistration
    where
        F: FnMut(DeviceRecord) + Send + 'static,
    {
        let device_id = self.device_id.clone();
        let task = tokio::spawn(async move {
            let mut feed = self;
            while let Some(record) = feed.recv().await {
                on_change(record);
            }
            debug!(device_id = %feed.device_id, "document feed closed");
        });
        ListenerRegistration { device_id, task }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Handle to a running callback listener. Dropping it stops the listener.
#[derive(Debug)]
pub struct ListenerRegistration {
    device_id: DeviceId,
    task: JoinHandle<()>,
}

impl ListenerRegistration {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// False once the feed closed or the listener was stopped.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop receiving updates. The listener task is aborted by `Drop`.
    pub fn remove(self) {
        debug!(device_id = %self.device_id, "listener removed");
        drop(self);
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn dev() -> DeviceId {
        DeviceId::new("dev-1").unwrap()
    }

    #[test]
    fn test_release_drops_the_receiver() {
        let (tx, rx) = broadcast::channel::<DeviceRecord>(4);
        let sub = Subscription::new(dev(), None, rx);
        assert_eq!(tx.receiver_count(), 1);
        sub.release();
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_stops_the_listener_task() {
        let (tx, rx) = broadcast::channel::<DeviceRecord>(4);
        let registration = Subscription::new(dev(), None, rx).on_change(|_| {});
        assert!(registration.is_active());
        registration.remove();

        for _ in 0..100 {
            if tx.receiver_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("listener task still holds the feed");
    }
}
