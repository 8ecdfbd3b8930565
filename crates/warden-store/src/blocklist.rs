//! Local blocklist cache.
//!
//! The on-device answer to "what should I uninstall", usable offline. It
//! only grows through [`LocalBlocklist::add`]; a remote read replaces it
//! wholesale through [`LocalBlocklist::replace`].
//!
//! Writers are serialized by one `RwLock`; readers share it. The lock guards
//! file access only and is never held across a network call.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use warden_remote::SharedGateway;
use warden_types::{DeviceId, RecordPatch, normalize_names};

use crate::{PROPAGATION_TIMEOUT, StoreError, set_file};

/// Persisted set of package names awaiting removal.
pub struct LocalBlocklist {
    path: PathBuf,
    own_package: String,
    lock: RwLock<()>,
    remote: Option<(SharedGateway, DeviceId)>,
    remote_timeout: Duration,
}

impl LocalBlocklist {
    /// Open the blocklist at `path`. Names equal to `own_package` are never
    /// stored.
    pub fn new(path: impl Into<PathBuf>, own_package: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            own_package: own_package.into(),
            lock: RwLock::new(()),
            remote: None,
            remote_timeout: PROPAGATION_TIMEOUT,
        }
    }

    /// Propagate every successful `add` to `device`'s remote document.
    pub fn with_remote(mut self, gateway: SharedGateway, device: DeviceId) -> Self {
        self.remote = Some((gateway, device));
        self
    }

    /// Bound on each upstream merge. A merge that runs longer is abandoned.
    pub fn with_remote_timeout(mut self, limit: Duration) -> Self {
        self.remote_timeout = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn own_package(&self) -> &str {
        &self.own_package
    }

    fn clean<I, S>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = normalize_names(names);
        names.remove(&self.own_package);
        names
    }

    /// Union `names` into the stored set and return the result.
    ///
    /// After the local write succeeds the union is merged into the remote
    /// document, bounded by the remote timeout. A remote failure or timeout
    /// is logged; the local set stays updated and the next add carries it
    /// upstream.
    pub async fn add<I, S>(&self, names: I) -> Result<BTreeSet<String>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = self.clean(names);
        let union = {
            let _guard = self.lock.write();
            let mut current = set_file::read(&self.path)?;
            let before = current.len();
            current.extend(names);
            if current.len() != before {
                set_file::write(&self.path, &current)?;
                info!(added = current.len() - before, total = current.len(), "blocklist grew");
            }
            current
        };

        if let Some((gateway, device)) = &self.remote {
            let patch = RecordPatch::new(device.clone()).marked(union.clone());
            match tokio::time::timeout(self.remote_timeout, gateway.merge_upsert(device, patch)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(device_id = %device, error = %e, "blocklist propagation failed"),
                Err(_) => warn!(
                    device_id = %device,
                    limit = ?self.remote_timeout,
                    "blocklist propagation timed out"
                ),
            }
        }
        Ok(union)
    }

    /// Overwrite the stored set. Never propagates upstream.
    pub fn replace<I, S>(&self, names: I) -> Result<BTreeSet<String>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = self.clean(names);
        let _guard = self.lock.write();
        set_file::write(&self.path, &names)?;
        debug!(total = names.len(), "blocklist replaced");
        Ok(names)
    }

    /// Current stored set. Unreadable storage reads as empty.
    pub fn get(&self) -> BTreeSet<String> {
        let _guard = self.lock.read();
        set_file::read(&self.path).unwrap_or_else(|e| {
            warn!(error = %e, "blocklist unreadable, treating as empty");
            BTreeSet::new()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get().contains(name.trim())
    }
}

impl std::fmt::Debug for LocalBlocklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBlocklist")
            .field("path", &self.path)
            .field("own_package", &self.own_package)
            .field("remote", &self.remote.as_ref().map(|(_, device)| device))
            .finish()
    }
}
