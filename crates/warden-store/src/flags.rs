//! Bug flags: packages the user pinned as misbehaving.
//!
//! Same file format as the blocklist. Presentation-only state, so it never
//! leaves the device.

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{StoreError, set_file};

#[derive(Debug)]
pub struct FlagStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// Flip the flag for `package`. Returns whether it is now set.
    pub fn toggle(&self, package: &str) -> Result<bool, StoreError> {
        let package = package.trim();
        let _guard = self.lock.lock();
        let mut flags = set_file::read(&self.path)?;
        let set = if flags.remove(package) {
            false
        } else if package.is_empty() {
            return Ok(false);
        } else {
            flags.insert(package.to_string())
        };
        set_file::write(&self.path, &flags)?;
        debug!(package, set, "bug flag toggled");
        Ok(set)
    }

    pub fn contains(&self, package: &str) -> bool {
        self.get().contains(package.trim())
    }

    /// All flagged packages. Unreadable storage reads as empty.
    pub fn get(&self) -> BTreeSet<String> {
        let _guard = self.lock.lock();
        set_file::read(&self.path).unwrap_or_else(|e| {
            warn!(error = %e, "bug flags unreadable, treating as empty");
            BTreeSet::new()
        })
    }
}
