//! Install detection by diffing package enumerations.
//!
//! Platforms without an install broadcast get one here: each scan compares
//! the installed set against the previous scan and reports what appeared.

use std::collections::BTreeSet;

use tracing::debug;
use warden_types::InstalledApp;

#[derive(Debug, Default)]
pub struct InstallMonitor {
    known: Option<BTreeSet<String>>,
}

impl InstallMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current installed set and return packages that were not
    /// present last time. The first call only establishes the baseline.
    pub fn observe(&mut self, apps: &[InstalledApp]) -> Vec<String> {
        let current: BTreeSet<String> = apps.iter().map(|a| a.package_name.clone()).collect();
        let added = match &self.known {
            Some(known) => current.difference(known).cloned().collect(),
            None => {
                debug!(packages = current.len(), "install monitor baseline");
                Vec::new()
            }
        };
        self.known = Some(current);
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps(names: &[&str]) -> Vec<InstalledApp> {
        names
            .iter()
            .map(|n| InstalledApp {
                package_name: n.to_string(),
                label: n.to_string(),
                first_install_time: 0,
                installer: None,
                can_uninstall: true,
            })
            .collect()
    }

    #[test]
    fn test_first_scan_is_baseline() {
        let mut monitor = InstallMonitor::new();
        assert!(monitor.observe(&apps(&["com.a", "com.b"])).is_empty());
    }

    #[test]
    fn test_reinstall_is_reported_again() {
        let mut monitor = InstallMonitor::new();
        monitor.observe(&apps(&["com.a"]));
        assert_eq!(monitor.observe(&apps(&["com.a", "com.b"])), vec!["com.b"]);
        assert!(monitor.observe(&apps(&["com.a"])).is_empty());
        assert_eq!(monitor.observe(&apps(&["com.a", "com.b"])), vec!["com.b"]);
    }
}
