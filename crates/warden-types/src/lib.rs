//! Shared device, package, and document types for warden.
//!
//! This is the leaf crate: the remote document shape, the device key, the
//! installed-app model, and the push payload format. It has **no internal
//! warden dependencies**.
//!
//! # Overview
//!
//! ```text
//! DeviceRecord (keyed by DeviceId) ← one document per device under `devices`
//!     └── packages            snapshot of installed apps, overwritten each sync
//!     └── markedForDeletion   grows by union from the device side
//!     └── pendingUninstalls   legacy one-shot command list
//!
//! RecordPatch   ← what a client writes (unions the set, overwrites scalars)
//! PushCommand   ← parsed push data message
//! InstalledApp  ← one row from the platform's package enumerator
//! ```

pub mod ids;
pub mod package;
pub mod push;
pub mod record;

pub use ids::{DeviceId, IdError};
pub use package::{
    InstallSource, InstalledApp, normalize_names, order_for_display, tidy_name,
};
pub use push::PushCommand;
pub use record::{DeviceRecord, PackageEntry, RecordPatch};

/// Current time as Unix milliseconds. Used for `lastUpdated` stamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
