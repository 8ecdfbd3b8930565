//! The reconciliation pass.
//!
//! Given an observation of the device document, bring the local blocklist
//! in line and put at most one uninstall prompt in front of the user.
//!
//! ```text
//!   observation ──▶ markedForDeletion M present? ──▶ replace(M) ──▶ actuate first installed
//!        │
//!        └────────▶ pendingUninstalls P non-empty? ──▶ notice(P) ──▶ add(P) ──▶ actuate one of P
//!                                                                             └─▶ clear observed P
//! ```
//!
//! Passes never fail. Store and remote errors are logged and the pass does
//! as much as it can with local state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};
use warden_remote::SharedGateway;
use warden_store::{LocalBlocklist, Notice, PendingNotice};
use warden_types::{DeviceId, DeviceRecord, PushCommand, normalize_names};

use crate::actuator::{Actuation, UninstallActuator};
use crate::constants::DEFAULT_SYNC_TIMEOUT;
use crate::platform::{PackageEnumerator, Presence};
use crate::session::UninstallSession;

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Resume,
    Push,
    Periodic,
    Live,
    PackageAdded,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub trigger: Trigger,
    /// Blocklist after a replace from `markedForDeletion`, if one happened.
    pub replaced: Option<BTreeSet<String>>,
    /// Pending or pushed names absorbed into the blocklist.
    pub absorbed: Vec<String>,
    /// True when a new notice was raised.
    pub noticed: bool,
    /// Every actuation issued, in order.
    pub actuated: Vec<(String, Actuation)>,
}

impl PassReport {
    fn new(trigger: Trigger) -> Self {
        Self { trigger, replaced: None, absorbed: Vec::new(), noticed: false, actuated: Vec::new() }
    }
}

/// Services one pass needs, constructed once and shared.
pub struct Reconciler {
    device: DeviceId,
    gateway: SharedGateway,
    blocklist: Arc<LocalBlocklist>,
    notice: Arc<PendingNotice>,
    packages: Arc<dyn PackageEnumerator>,
    actuator: Arc<UninstallActuator>,
    session: Arc<UninstallSession>,
    /// Bound on each remote write a pass makes.
    remote_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        device: DeviceId,
        gateway: SharedGateway,
        blocklist: Arc<LocalBlocklist>,
        notice: Arc<PendingNotice>,
        packages: Arc<dyn PackageEnumerator>,
        actuator: Arc<UninstallActuator>,
        session: Arc<UninstallSession>,
    ) -> Self {
        Self {
            device,
            gateway,
            blocklist,
            notice,
            packages,
            actuator,
            session,
            remote_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    /// Abandon any remote write in a pass that runs longer than `limit`.
    pub fn with_remote_timeout(mut self, limit: Duration) -> Self {
        self.remote_timeout = limit;
        self
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    pub fn blocklist(&self) -> &LocalBlocklist {
        &self.blocklist
    }

    pub fn session(&self) -> &UninstallSession {
        &self.session
    }

    /// Apply one observation of the device document.
    #[instrument(name = "reconcile.pass", skip_all, fields(device_id = %self.device, trigger = %trigger))]
    pub async fn reconcile(&self, record: &DeviceRecord, trigger: Trigger) -> PassReport {
        let mut report = PassReport::new(trigger);

        if let Some(marked) = &record.marked_for_deletion {
            let current = match self.blocklist.replace(marked) {
                Ok(set) => set,
                Err(e) => {
                    // Act on what the remote said even if the cache is broken.
                    warn!(error = %e, "blocklist replace failed");
                    let mut set = normalize_names(marked);
                    set.remove(self.actuator.own_package());
                    set
                }
            };
            debug!(total = current.len(), "blocklist replaced from remote");
            report.actuated.extend(self.actuate_first(current.iter()));
            report.replaced = Some(current);
        }

        let pending = record.pending();
        if !pending.is_empty() {
            info!(count = pending.len(), "pending uninstalls observed");
            self.absorb(pending, &mut report).await;
            let clear = self.gateway.clear_pending_uninstalls(&self.device, pending);
            match tokio::time::timeout(self.remote_timeout, clear).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "clearing pending uninstalls failed"),
                Err(_) => warn!(limit = ?self.remote_timeout, "clearing pending uninstalls timed out"),
            }
        }

        report
    }

    /// Apply a push data message.
    #[instrument(name = "reconcile.push", skip_all, fields(device_id = %self.device))]
    pub async fn handle_push(&self, command: &PushCommand) -> PassReport {
        let mut report = PassReport::new(Trigger::Push);
        self.absorb(&command.packages, &mut report).await;
        report
    }

    /// A package was just installed. Blocklisted packages are prompted
    /// again even if this process already prompted for them.
    #[instrument(name = "reconcile.package_added", skip(self))]
    pub fn handle_package_added(&self, package: &str) -> Option<Actuation> {
        let package = package.trim();
        if package == self.actuator.own_package() || !self.blocklist.contains(package) {
            trace!("installed package not blocklisted");
            return None;
        }
        info!("blocklisted package reinstalled");
        self.session.claim(package);
        Some(self.actuator.request(package))
    }

    /// Prompt for the first installed blocklisted package not yet prompted.
    pub fn actuate_blocklisted(&self) -> Option<(String, Actuation)> {
        let current = self.blocklist.get();
        self.actuate_first(current.iter())
    }

    /// Notice, add, and actuate for an explicit list of names.
    async fn absorb(&self, names: &[String], report: &mut PassReport) {
        let names: Vec<String> = {
            let mut seen = BTreeSet::new();
            names
                .iter()
                .map(|n| n.trim())
                .filter(|n| !n.is_empty() && seen.insert(*n))
                .map(str::to_string)
                .collect()
        };
        if names.is_empty() {
            return;
        }

        let labels = names
            .iter()
            .map(|pkg| self.packages.label(pkg).unwrap_or_else(|| pkg.clone()))
            .collect();
        report.noticed = self.notice.set_and_notify(Notice::new(names.as_slice(), labels));

        if let Err(e) = self.blocklist.add(&names).await {
            warn!(error = %e, "blocklist add failed");
        }
        report.actuated.extend(self.actuate_first(names.iter()));
        report.absorbed = names;
    }

    /// Actuate the first candidate that is installed, not our own package,
    /// and not yet prompted this session. At most one per call.
    fn actuate_first<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a String>,
    ) -> Option<(String, Actuation)> {
        for package in candidates {
            if package == self.actuator.own_package() || self.session.contains(package) {
                continue;
            }
            match self.packages.presence(package) {
                Presence::Installed => {
                    self.session.claim(package);
                    let outcome = self.actuator.request(package);
                    return Some((package.clone(), outcome));
                }
                Presence::NotInstalled => trace!(package = %package, "not installed, skipping"),
                Presence::Unknown => debug!(package = %package, "presence unknown, skipping"),
            }
        }
        None
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("device", &self.device)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use tempfile::TempDir;
    use warden_remote::{MemoryGateway, RemoteGateway};
    use warden_types::InstalledApp;

    use super::*;
    use crate::platform::{Intent, LaunchError, Launcher, PlatformError};

    const OWN: &str = "org.warden.agent";

    #[derive(Default)]
    struct FakeDevice {
        installed: Mutex<HashMap<String, String>>,
        launched: Mutex<Vec<String>>,
    }

    impl FakeDevice {
        fn install(&self, pkg: &str, label: &str) {
            self.installed.lock().insert(pkg.into(), label.into());
        }
    }

    impl PackageEnumerator for FakeDevice {
        fn installed_apps(&self) -> Result<Vec<InstalledApp>, PlatformError> {
            Ok(self
                .installed
                .lock()
                .iter()
                .map(|(pkg, label)| InstalledApp {
                    package_name: pkg.clone(),
                    label: label.clone(),
                    first_install_time: 0,
                    installer: None,
                    can_uninstall: true,
                })
                .collect())
        }

        fn presence(&self, package: &str) -> Presence {
            if self.installed.lock().contains_key(package) {
                Presence::Installed
            } else {
                Presence::NotInstalled
            }
        }
    }

    impl Launcher for FakeDevice {
        fn launch(&self, intent: &Intent) -> Result<(), LaunchError> {
            self.launched.lock().push(intent.package().to_string());
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        gateway: Arc<MemoryGateway>,
        device: Arc<FakeDevice>,
        notice: Arc<PendingNotice>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let id = DeviceId::new("dev-1").unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let device = Arc::new(FakeDevice::default());
        device.install(OWN, "Warden");
        let notice = Arc::new(PendingNotice::new());
        let blocklist = Arc::new(
            LocalBlocklist::new(dir.path().join("marked_for_deletion"), OWN)
                .with_remote(gateway.clone(), id.clone()),
        );
        let reconciler = Reconciler::new(
            id,
            gateway.clone(),
            blocklist,
            notice.clone(),
            device.clone(),
            Arc::new(UninstallActuator::new(OWN, device.clone())),
            Arc::new(UninstallSession::new()),
        );
        Harness { _dir: dir, gateway, device, notice, reconciler }
    }

    fn marked(names: &[&str]) -> DeviceRecord {
        let mut record = DeviceRecord::new(DeviceId::new("dev-1").unwrap());
        record.marked_for_deletion = Some(normalize_names(names));
        record
    }

    #[tokio::test]
    async fn test_one_actuation_per_pass_in_sorted_order() {
        let h = harness();
        for pkg in ["com.c", "com.a", "com.b"] {
            h.device.install(pkg, pkg);
        }

        let record = marked(&["com.c", "com.b", "com.a"]);
        let report = h.reconciler.reconcile(&record, Trigger::Resume).await;
        assert_eq!(report.actuated.len(), 1);
        assert_eq!(report.actuated[0].0, "com.a");

        // Next pass moves on to the next one.
        let report = h.reconciler.reconcile(&record, Trigger::Resume).await;
        assert_eq!(report.actuated[0].0, "com.b");
        assert_eq!(*h.device.launched.lock(), vec!["com.a", "com.b"]);
    }

    #[tokio::test]
    async fn test_session_suppresses_repeats() {
        let h = harness();
        h.device.install("com.a", "A");
        let record = marked(&["com.a"]);
        h.reconciler.reconcile(&record, Trigger::Live).await;
        let report = h.reconciler.reconcile(&record, Trigger::Live).await;
        assert!(report.actuated.is_empty());
        assert_eq!(h.device.launched.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_own_package_never_stored_or_actuated() {
        let h = harness();
        let report = h.reconciler.reconcile(&marked(&[OWN]), Trigger::Live).await;
        assert!(report.actuated.is_empty());
        assert!(!h.reconciler.blocklist().contains(OWN));

        let push = PushCommand::from_csv(OWN).unwrap();
        let report = h.reconciler.handle_push(&push).await;
        assert!(report.actuated.is_empty());
        assert!(h.device.launched.lock().is_empty());
    }

    #[tokio::test]
    async fn test_absent_marked_field_leaves_cache_alone() {
        let h = harness();
        h.reconciler.blocklist().replace(["com.cached"]).unwrap();
        let record = DeviceRecord::new(DeviceId::new("dev-1").unwrap());
        let report = h.reconciler.reconcile(&record, Trigger::Periodic).await;
        assert!(report.replaced.is_none());
        assert!(h.reconciler.blocklist().contains("com.cached"));
    }

    #[tokio::test]
    async fn test_pending_is_absorbed_and_cleared() {
        let h = harness();
        h.device.install("com.x", "X Game");
        let id = h.reconciler.device().clone();
        let mut record = DeviceRecord::new(id.clone());
        record.pending_uninstalls = Some(vec!["com.x".into(), "com.y".into()]);
        h.gateway.put(&id, record.clone());

        let report = h.reconciler.reconcile(&record, Trigger::Resume).await;
        assert!(report.noticed);
        assert_eq!(report.absorbed, vec!["com.x", "com.y"]);
        assert_eq!(report.actuated.len(), 1);
        assert_eq!(h.notice.take().unwrap().app_names, vec!["X Game", "com.y"]);

        let stored = h.gateway.fetch(&id).await.unwrap().unwrap();
        assert!(stored.pending().is_empty());
        assert_eq!(stored.marked_for_deletion, Some(normalize_names(["com.x", "com.y"])));
    }

    #[tokio::test]
    async fn test_package_added_reprompts_blocklisted() {
        let h = harness();
        h.device.install("com.a", "A");
        h.reconciler.reconcile(&marked(&["com.a"]), Trigger::Resume).await;

        let outcome = h.reconciler.handle_package_added("com.a");
        assert_eq!(outcome, Some(Actuation::Requested));
        assert_eq!(h.device.launched.lock().len(), 2);

        assert!(h.reconciler.handle_package_added("com.other").is_none());
        assert!(h.reconciler.handle_package_added(OWN).is_none());
    }
}
