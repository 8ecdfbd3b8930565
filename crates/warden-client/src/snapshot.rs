//! Device snapshot uploads.
//!
//! Writes the installed-app list, liveness flag, and sync stamp into the
//! device document. The operator's view of "what is on this device" comes
//! from here.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use warden_remote::SharedGateway;
use warden_types::{DeviceId, PackageEntry, RecordPatch, now_millis};

use crate::platform::PackageEnumerator;

pub struct DeviceSync {
    device: DeviceId,
    gateway: SharedGateway,
    packages: Arc<dyn PackageEnumerator>,
}

impl DeviceSync {
    pub fn new(device: DeviceId, gateway: SharedGateway, packages: Arc<dyn PackageEnumerator>) -> Self {
        Self { device, gateway, packages }
    }

    /// Upload the current snapshot. True on success.
    #[instrument(name = "remote.sync_device", skip(self), fields(device_id = %self.device))]
    pub async fn sync_device(&self, accessibility_enabled: bool) -> bool {
        let apps = match self.packages.installed_apps() {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "package enumeration failed, skipping sync");
                return false;
            }
        };
        let entries: Vec<PackageEntry> = apps.iter().map(PackageEntry::from).collect();
        let count = entries.len();
        let patch = RecordPatch::new(self.device.clone())
            .packages(entries)
            .accessibility_enabled(accessibility_enabled)
            .stamped(now_millis());

        match self.gateway.merge_upsert(&self.device, patch).await {
            Ok(_) => {
                info!(packages = count, "device snapshot synced");
                true
            }
            Err(e) => {
                warn!(error = %e, "device snapshot sync failed");
                false
            }
        }
    }

    /// Store a rotated push token.
    #[instrument(name = "remote.save_token", skip_all, fields(device_id = %self.device))]
    pub async fn save_token(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        let patch = RecordPatch::new(self.device.clone()).fcm_token(token);
        match self.gateway.merge_upsert(&self.device, patch).await {
            Ok(_) => {
                info!("push token saved");
                true
            }
            Err(e) => {
                warn!(error = %e, "saving push token failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for DeviceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSync").field("device", &self.device).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use warden_remote::{MemoryGateway, RemoteGateway};
    use warden_types::{InstalledApp, normalize_names};

    use super::*;
    use crate::platform::{PlatformError, Presence};

    struct TwoApps;

    impl PackageEnumerator for TwoApps {
        fn installed_apps(&self) -> Result<Vec<InstalledApp>, PlatformError> {
            Ok(["com.a", "com.b"]
                .into_iter()
                .map(|pkg| InstalledApp {
                    package_name: pkg.into(),
                    label: pkg.to_uppercase(),
                    first_install_time: 7,
                    installer: Some("com.android.vending".into()),
                    can_uninstall: true,
                })
                .collect())
        }

        fn presence(&self, _package: &str) -> Presence {
            Presence::Installed
        }
    }

    struct Broken;

    impl PackageEnumerator for Broken {
        fn installed_apps(&self) -> Result<Vec<InstalledApp>, PlatformError> {
            Err(PlatformError::Unavailable("no device".into()))
        }

        fn presence(&self, _package: &str) -> Presence {
            Presence::Unknown
        }
    }

    fn dev() -> DeviceId {
        DeviceId::new("dev-1").unwrap()
    }

    #[tokio::test]
    async fn test_sync_overwrites_snapshot_and_keeps_blocklist() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway
            .merge_upsert(&dev(), RecordPatch::new(dev()).marked(normalize_names(["com.z"])))
            .await
            .unwrap();

        let sync = DeviceSync::new(dev(), gateway.clone(), Arc::new(TwoApps));
        assert!(sync.sync_device(true).await);

        let record = gateway.fetch(&dev()).await.unwrap().unwrap();
        assert_eq!(record.packages.len(), 2);
        assert_eq!(record.packages[0].app_name, "COM.A");
        assert_eq!(record.accessibility_enabled, Some(true));
        assert!(record.last_updated.is_some());
        assert_eq!(record.marked_for_deletion, Some(normalize_names(["com.z"])));
    }

    #[tokio::test]
    async fn test_sync_reports_failure() {
        let gateway = Arc::new(MemoryGateway::new());
        let sync = DeviceSync::new(dev(), gateway.clone(), Arc::new(Broken));
        assert!(!sync.sync_device(false).await);

        let sync = DeviceSync::new(dev(), gateway.clone(), Arc::new(TwoApps));
        gateway.set_online(false);
        assert!(!sync.sync_device(false).await);
    }

    #[tokio::test]
    async fn test_token_rotation() {
        let gateway = Arc::new(MemoryGateway::new());
        let sync = DeviceSync::new(dev(), gateway.clone(), Arc::new(TwoApps));
        assert!(sync.save_token("tok-1").await);
        assert!(sync.save_token("tok-2").await);
        assert!(!sync.save_token("  ").await);

        let record = gateway.fetch(&dev()).await.unwrap().unwrap();
        assert_eq!(record.fcm_token.as_deref(), Some("tok-2"));
    }
}
