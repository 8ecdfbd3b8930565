//! Parent-side edits to a device document.
//!
//! The device never removes names from `markedForDeletion`; only these
//! operator calls do. Every write goes through [`RemoteGateway::modify`] so
//! it serializes with the device's own merges.

use std::collections::BTreeSet;

use tracing::info;
use warden_types::{DeviceId, DeviceRecord, RecordPatch, normalize_names};

use crate::gateway::RemoteGateway;
use crate::RemoteError;

/// Add names to the device's blocklist.
pub async fn mark_for_deletion<I, S>(
    gateway: &dyn RemoteGateway,
    device: &DeviceId,
    names: I,
) -> Result<DeviceRecord, RemoteError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let names = normalize_names(names);
    info!(device_id = %device, count = names.len(), "operator marking packages");
    gateway
        .merge_upsert(device, RecordPatch::new(device.clone()).marked(names))
        .await
}

/// Remove names from the blocklist. Returns `None` if the device has no
/// document.
pub async fn unmark<I, S>(
    gateway: &dyn RemoteGateway,
    device: &DeviceId,
    names: I,
) -> Result<Option<DeviceRecord>, RemoteError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let names: BTreeSet<String> = normalize_names(names);
    info!(device_id = %device, count = names.len(), "operator unmarking packages");
    let mut edit = |record: &mut DeviceRecord| {
        if let Some(marked) = record.marked_for_deletion.as_mut() {
            marked.retain(|n| !names.contains(n));
        }
    };
    gateway.modify(device, false, &mut edit).await
}

/// Queue one-shot uninstall commands on the legacy pending list.
/// Names already queued are not repeated.
pub async fn queue_pending_uninstalls<I, S>(
    gateway: &dyn RemoteGateway,
    device: &DeviceId,
    names: I,
) -> Result<DeviceRecord, RemoteError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let names = normalize_names(names);
    info!(device_id = %device, count = names.len(), "operator queueing pending uninstalls");
    let mut edit = |record: &mut DeviceRecord| {
        let pending = record.pending_uninstalls.get_or_insert_with(Vec::new);
        for name in &names {
            if !pending.contains(name) {
                pending.push(name.clone());
            }
        }
    };
    gateway
        .modify(device, true, &mut edit)
        .await?
        .ok_or_else(|| RemoteError::Missing(device.clone()))
}
