//! Remote device-document gateway.
//!
//! One document per device, keyed by [`DeviceId`](warden_types::DeviceId),
//! living in a `devices` collection. The gateway offers:
//!
//! - `fetch` / `fetch_once`: a single read (soft-failing variant for triggers)
//! - `merge_upsert`: read-modify-write that unions `markedForDeletion`
//! - `consume_pending_uninstalls`: read and clear the legacy command list
//! - `subscribe`: a live feed of document changes
//!
//! ```text
//!   device triggers ──▶ RemoteGateway ◀── operator tooling
//!                          │
//!          ┌───────────────┴───────────────┐
//!          ▼                               ▼
//!    MemoryGateway                     FsGateway
//!    (DashMap + broadcast)             (devices/<id>.json + notify)
//! ```
//!
//! Every mutation goes through [`RemoteGateway::modify`], which backends
//! implement as one exclusive section per document. Concurrent merges from
//! the device and an operator therefore converge to the union.

pub mod fs;
pub mod gateway;
pub mod memory;
pub mod operator;
pub mod subscription;

pub use fs::FsGateway;
pub use gateway::{Edit, RemoteGateway, SharedGateway};
pub use memory::MemoryGateway;
pub use subscription::{ListenerRegistration, Subscription};

/// Name of the document collection.
pub const DEVICES_COLLECTION: &str = "devices";

/// Errors from remote operations.
///
/// Callers on trigger paths log these and carry on with local state.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("access denied: {0}")]
    Denied(String),
    #[error("document for {0} disappeared during write")]
    Missing(warden_types::DeviceId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("watch error: {0}")]
    Watch(String),
}

impl RemoteError {
    /// Transport and authorization failures: expected while offline.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Denied(_) | Self::Io(_))
    }
}
