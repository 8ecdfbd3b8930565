//! Packages actuated during this process lifetime.
//!
//! Suppresses repeat uninstall prompts for the same package. Never
//! persisted: a restart re-arms every package.

use std::collections::BTreeSet;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct UninstallSession {
    requested: Mutex<BTreeSet<String>>,
}

impl UninstallSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `package`. False if it was already recorded.
    pub fn claim(&self, package: &str) -> bool {
        self.requested.lock().insert(package.to_string())
    }

    pub fn contains(&self, package: &str) -> bool {
        self.requested.lock().contains(package)
    }

    pub fn len(&self) -> usize {
        self.requested.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.requested.lock().clone()
    }
}
