//! On-device state for warden.
//!
//! Everything here is process-local and survives restarts except the
//! pending notice, which lives for the process lifetime only.
//!
//! | Store              | File                  | Shape                       |
//! |--------------------|-----------------------|-----------------------------|
//! | [`LocalBlocklist`] | `marked_for_deletion` | newline-delimited names     |
//! | [`FlagStore`]      | `bug_flags`           | newline-delimited names     |
//! | [`DeviceIdentity`] | `device_id`           | one UUID line               |
//! | [`PendingNotice`]  | (memory)              | app names + idempotency key |
//!
//! The blocklist is the only store that talks to the remote gateway: a
//! successful `add` pushes its union upstream.

pub mod blocklist;
pub mod flags;
pub mod identity;
pub mod notice;
mod set_file;

pub use blocklist::LocalBlocklist;
pub use flags::FlagStore;
pub use identity::{DeviceIdentity, KNOWN_BAD_PLATFORM_ID};
pub use notice::{Notice, PendingNotice};

/// File name of the blocklist cache inside the data directory.
pub const BLOCKLIST_FILE: &str = "marked_for_deletion";

/// File name of the bug flag set inside the data directory.
pub const BUG_FLAGS_FILE: &str = "bug_flags";

/// File name of the generated device id inside the data directory.
pub const DEVICE_ID_FILE: &str = "device_id";

/// Default bound on the blocklist's upstream merge.
pub const PROPAGATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Errors from the on-device stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}
