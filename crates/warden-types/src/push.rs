//! Push data messages.
//!
//! A push is a flat string map. The package list lives under `packages`, or
//! under the legacy `pendingUninstalls` key, as comma-separated names:
//!
//! ```text
//! { "packages": "com.example.one,com.example.two" }
//! ```
//!
//! Other keys (`action`, `package_name`, ...) are ignored.

use std::collections::{BTreeSet, HashMap};

use crate::package::tidy_name;

/// Preferred payload key.
pub const KEY_PACKAGES: &str = "packages";

/// Legacy payload key.
pub const KEY_PENDING_UNINSTALLS: &str = "pendingUninstalls";

/// A parsed push carrying packages to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCommand {
    /// Names in payload order, trimmed, blanks and repeats dropped.
    pub packages: Vec<String>,
}

impl PushCommand {
    /// Parse a push data map. Returns `None` when there is no usable name.
    pub fn from_data(data: &HashMap<String, String>) -> Option<Self> {
        let raw = data
            .get(KEY_PACKAGES)
            .or_else(|| data.get(KEY_PENDING_UNINSTALLS))?;
        Self::from_csv(raw)
    }

    /// Parse a bare comma-separated list.
    pub fn from_csv(raw: &str) -> Option<Self> {
        let mut seen = BTreeSet::new();
        let packages: Vec<String> = raw
            .split(',')
            .filter_map(tidy_name)
            .filter(|n| seen.insert(n.clone()))
            .collect();
        (!packages.is_empty()).then_some(Self { packages })
    }
}
