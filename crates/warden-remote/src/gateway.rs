//! The `RemoteGateway` trait.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use warden_types::{DeviceId, DeviceRecord, RecordPatch};

use crate::subscription::Subscription;
use crate::RemoteError;

/// In-place edit applied to a stored document.
pub type Edit<'a> = &'a mut (dyn FnMut(&mut DeviceRecord) + Send);

/// Shared handle used by every service that talks to the backend.
pub type SharedGateway = Arc<dyn RemoteGateway>;

/// Keyed document store with one document per device.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Read one document. `Ok(None)` when the device has none yet.
    async fn fetch(&self, device: &DeviceId) -> Result<Option<DeviceRecord>, RemoteError>;

    /// Run `edit` against the stored document inside one exclusive
    /// read-modify-write section and persist the result if it changed.
    ///
    /// With `create` set, a missing document starts as
    /// [`DeviceRecord::new`]; otherwise a missing document is left alone
    /// and `Ok(None)` is returned.
    async fn modify(
        &self,
        device: &DeviceId,
        create: bool,
        edit: Edit<'_>,
    ) -> Result<Option<DeviceRecord>, RemoteError>;

    /// Open a live feed. The first item is the current document, if any;
    /// later items are delivered on every change until the subscription is
    /// released.
    fn subscribe(&self, device: &DeviceId) -> Result<Subscription, RemoteError>;

    /// Single read that logs and swallows failures.
    async fn fetch_once(&self, device: &DeviceId) -> Option<DeviceRecord> {
        match self.fetch(device).await {
            Ok(record) => record,
            Err(e) => {
                warn!(device_id = %device, error = %e, "remote fetch failed");
                None
            }
        }
    }

    /// Union `markedForDeletion`, overwrite the other fields the patch sets.
    async fn merge_upsert(
        &self,
        device: &DeviceId,
        patch: RecordPatch,
    ) -> Result<DeviceRecord, RemoteError> {
        let mut edit = |record: &mut DeviceRecord| record.apply(&patch);
        self.modify(device, true, &mut edit)
            .await?
            .ok_or_else(|| RemoteError::Missing(device.clone()))
    }

    /// Return the legacy pending list and clear it in the same write.
    ///
    /// Delivery is at most once per stored entry: a second call returns
    /// only entries queued after the first.
    async fn consume_pending_uninstalls(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<String>, RemoteError> {
        let mut taken = Vec::new();
        let mut edit = |record: &mut DeviceRecord| taken = record.take_pending();
        self.modify(device, false, &mut edit).await?;
        Ok(taken)
    }

    /// Remove `observed` from the pending list, leaving newer entries.
    async fn clear_pending_uninstalls(
        &self,
        device: &DeviceId,
        observed: &[String],
    ) -> Result<(), RemoteError> {
        let mut edit = |record: &mut DeviceRecord| record.clear_pending(observed);
        self.modify(device, false, &mut edit).await?;
        Ok(())
    }
}
