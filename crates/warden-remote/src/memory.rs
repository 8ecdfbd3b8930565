//! In-process document store.
//!
//! Backs tests and single-process deployments. Availability can be toggled
//! to exercise the offline paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;
use warden_types::{DeviceId, DeviceRecord};

use crate::gateway::{Edit, RemoteGateway};
use crate::subscription::Subscription;
use crate::RemoteError;

/// Buffered document states per feed.
const FEED_CAPACITY: usize = 64;

/// Document store held in memory.
///
/// The DashMap entry lock is the per-document exclusive section for
/// [`RemoteGateway::modify`].
#[derive(Debug)]
pub struct MemoryGateway {
    docs: DashMap<DeviceId, DeviceRecord>,
    feeds: DashMap<DeviceId, broadcast::Sender<DeviceRecord>>,
    online: AtomicBool,
    denied: AtomicBool,
    writes: AtomicU64,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            feeds: DashMap::new(),
            online: AtomicBool::new(true),
            denied: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// Seed or replace a document directly, as an operator would, and
    /// notify subscribers.
    pub fn put(&self, device: &DeviceId, mut record: DeviceRecord) {
        record.device_id.get_or_insert_with(|| device.clone());
        self.docs.insert(device.clone(), record.clone());
        self.publish(device, record);
    }

    /// Simulate losing (or regaining) the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Simulate the backend rejecting our credentials.
    pub fn set_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Number of persisted writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RemoteError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("memory backend offline".into()));
        }
        if self.denied.load(Ordering::SeqCst) {
            return Err(RemoteError::Denied("memory backend denied access".into()));
        }
        Ok(())
    }

    fn publish(&self, device: &DeviceId, record: DeviceRecord) {
        if let Some(tx) = self.feeds.get(device) {
            let delivered = tx.send(record).unwrap_or(0);
            trace!(device_id = %device, delivered, "published document change");
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn fetch(&self, device: &DeviceId) -> Result<Option<DeviceRecord>, RemoteError> {
        self.check()?;
        Ok(self.docs.get(device).map(|r| r.clone()))
    }

    async fn modify(
        &self,
        device: &DeviceId,
        create: bool,
        edit: Edit<'_>,
    ) -> Result<Option<DeviceRecord>, RemoteError> {
        self.check()?;
        let (after, changed) = {
            let (mut entry, created) = match self.docs.get_mut(device) {
                Some(entry) => (entry, false),
                None if create => {
                    let entry = self
                        .docs
                        .entry(device.clone())
                        .or_insert_with(|| DeviceRecord::new(device.clone()));
                    (entry, true)
                }
                None => return Ok(None),
            };
            let before = entry.clone();
            edit(entry.value_mut());
            let changed = created || *entry != before;
            (entry.clone(), changed)
        };
        // Entry guard is released before touching the feeds map.
        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.publish(device, after.clone());
        }
        Ok(Some(after))
    }

    fn subscribe(&self, device: &DeviceId) -> Result<Subscription, RemoteError> {
        self.check()?;
        let rx = self
            .feeds
            .entry(device.clone())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();
        let initial = self.docs.get(device).map(|r| r.clone());
        Ok(Subscription::new(device.clone(), initial, rx))
    }
}
