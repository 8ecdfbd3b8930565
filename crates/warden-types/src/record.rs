//! The per-device remote document and client-side patches.
//!
//! Field names on the wire are camelCase to match the `devices` collection:
//!
//! ```json
//! {
//!   "deviceId": "a1b2c3",
//!   "packages": [{"packageName": "com.foo", "appName": "Foo",
//!                 "firstInstallTime": 1700000000000,
//!                 "installerPackageName": "com.android.vending"}],
//!   "markedForDeletion": ["com.foo"],
//!   "pendingUninstalls": [],
//!   "fcmToken": "...",
//!   "accessibilityEnabled": true,
//!   "lastUpdated": 1700000000000
//! }
//! ```
//!
//! Documents are edited by people and scripts, so decoding is lenient:
//! non-string or blank names are dropped, undecodable package rows are
//! skipped, and a wrong-typed list field reads as absent.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::ids::DeviceId;
use crate::package::{InstalledApp, tidy_name};

/// One row of the installed-apps snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageEntry {
    pub package_name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub first_install_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_package_name: Option<String>,
}

impl From<&InstalledApp> for PackageEntry {
    fn from(app: &InstalledApp) -> Self {
        Self {
            package_name: app.package_name.clone(),
            app_name: app.label.clone(),
            first_install_time: app.first_install_time,
            installer_package_name: app.installer.clone(),
        }
    }
}

/// Remote sync state for one device.
///
/// `None` on a list field means "absent from the document", which the
/// reconciler treats differently from an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub packages: Vec<PackageEntry>,
    #[serde(default, deserialize_with = "lenient_name_set", skip_serializing_if = "Option::is_none")]
    pub marked_for_deletion: Option<BTreeSet<String>>,
    #[serde(default, deserialize_with = "lenient_name_list", skip_serializing_if = "Option::is_none")]
    pub pending_uninstalls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<u64>,
}

impl DeviceRecord {
    /// Empty document for `device_id`.
    pub fn new(device_id: DeviceId) -> Self {
        Self { device_id: Some(device_id), ..Default::default() }
    }

    /// Pending names, or an empty slice when the field is absent.
    pub fn pending(&self) -> &[String] {
        self.pending_uninstalls.as_deref().unwrap_or(&[])
    }

    /// Merge a client patch: union the blocklist, overwrite everything else
    /// the patch carries.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(id) = &patch.device_id {
            self.device_id = Some(id.clone());
        }
        if let Some(packages) = &patch.packages {
            self.packages = packages.clone();
        }
        if let Some(marked) = &patch.marked_for_deletion {
            self.marked_for_deletion
                .get_or_insert_with(BTreeSet::new)
                .extend(marked.iter().cloned());
        }
        if let Some(token) = &patch.fcm_token {
            self.fcm_token = Some(token.clone());
        }
        if let Some(enabled) = patch.accessibility_enabled {
            self.accessibility_enabled = Some(enabled);
        }
        if let Some(ts) = patch.last_updated {
            self.last_updated = Some(ts);
        }
    }

    /// Return the pending list and leave an empty one behind.
    pub fn take_pending(&mut self) -> Vec<String> {
        match self.pending_uninstalls.as_mut() {
            Some(pending) => std::mem::take(pending),
            None => Vec::new(),
        }
    }

    /// Remove only the `observed` entries from the pending list, keeping
    /// anything queued after the observation was taken.
    pub fn clear_pending(&mut self, observed: &[String]) {
        if let Some(pending) = self.pending_uninstalls.as_mut() {
            pending.retain(|p| !observed.contains(p));
        }
    }
}

/// Fields a client writes with merge-upsert semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub device_id: Option<DeviceId>,
    /// Overwrites the snapshot.
    pub packages: Option<Vec<PackageEntry>>,
    /// Unioned into the remote set, never replaces it.
    pub marked_for_deletion: Option<BTreeSet<String>>,
    pub fcm_token: Option<String>,
    pub accessibility_enabled: Option<bool>,
    pub last_updated: Option<u64>,
}

impl RecordPatch {
    pub fn new(device_id: DeviceId) -> Self {
        Self { device_id: Some(device_id), ..Default::default() }
    }

    pub fn packages(mut self, packages: Vec<PackageEntry>) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn marked(mut self, names: BTreeSet<String>) -> Self {
        self.marked_for_deletion = Some(names);
        self
    }

    pub fn fcm_token(mut self, token: impl Into<String>) -> Self {
        self.fcm_token = Some(token.into());
        self
    }

    pub fn accessibility_enabled(mut self, enabled: bool) -> Self {
        self.accessibility_enabled = Some(enabled);
        self
    }

    pub fn stamped(mut self, millis: u64) -> Self {
        self.last_updated = Some(millis);
        self
    }
}

// ── Lenient decoding ────────────────────────────────────────────────────────

fn string_entries(value: Option<Value>) -> Option<Vec<String>> {
    match value? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => tidy_name(&s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn lenient_name_list<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    Ok(string_entries(Option::<Value>::deserialize(d)?))
}

fn lenient_name_set<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BTreeSet<String>>, D::Error> {
    Ok(string_entries(Option::<Value>::deserialize(d)?).map(|v| v.into_iter().collect()))
}

fn lenient_entries<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PackageEntry>, D::Error> {
    let Some(Value::Array(items)) = Option::<Value>::deserialize(d)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<PackageEntry>(v).ok())
        .filter(|e| !e.package_name.trim().is_empty())
        .collect())
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DeviceId>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => DeviceId::new(s).ok(),
        _ => None,
    })
}
