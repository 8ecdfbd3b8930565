//! End-to-end agent scenarios against the in-memory document store and a
//! fake device.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use warden_client::{
    AgentConfig, AgentHandle, AgentServices, DeviceSync, Intent, LaunchError, Launcher,
    PackageEnumerator, PlatformError, Presence, Reconciler, SyncOutcome, UninstallActuator,
    UninstallSession, spawn_agent,
};
use warden_remote::{Edit, MemoryGateway, RemoteError, RemoteGateway, SharedGateway, Subscription, operator};
use warden_store::{LocalBlocklist, PendingNotice};
use warden_types::{DeviceId, DeviceRecord, InstalledApp, normalize_names};

const OWN: &str = "org.warden.agent";

/// Installed packages plus a log of every screen launched.
#[derive(Default)]
struct FakeDevice {
    installed: Mutex<Vec<(String, String)>>,
    launched: Mutex<Vec<Intent>>,
}

impl FakeDevice {
    fn with_apps(apps: &[(&str, &str)]) -> Arc<Self> {
        let device = Self::default();
        device.install(OWN, "Warden");
        for (pkg, label) in apps {
            device.install(pkg, label);
        }
        Arc::new(device)
    }

    fn install(&self, pkg: &str, label: &str) {
        self.installed.lock().push((pkg.to_string(), label.to_string()));
    }

    fn uninstall(&self, pkg: &str) {
        self.installed.lock().retain(|(p, _)| p != pkg);
    }

    fn prompts(&self) -> Vec<String> {
        self.launched
            .lock()
            .iter()
            .filter(|i| matches!(i, Intent::UninstallPackage(_)))
            .map(|i| i.package().to_string())
            .collect()
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
                can_uninstall: pkg != OWN,
            })
            .collect())
    }

    fn presence(&self, package: &str) -> Presence {
        if self.installed.lock().iter().any(|(p, _)| p == package) {
            Presence::Installed
        } else {
            Presence::NotInstalled
        }
    }

    fn label(&self, package: &str) -> Option<String> {
        self.installed
            .lock()
            .iter()
            .find(|(p, _)| p == package)
            .map(|(_, label)| label.clone())
    }
}

impl Launcher for FakeDevice {
    fn launch(&self, intent: &Intent) -> Result<(), LaunchError> {
        self.launched.lock().push(intent.clone());
        Ok(())
    }
}

/// Gateway whose writes never complete.
struct StalledGateway(MemoryGateway);

#[async_trait]
impl RemoteGateway for StalledGateway {
    async fn fetch(&self, device: &DeviceId) -> Result<Option<DeviceRecord>, RemoteError> {
        self.0.fetch(device).await
    }

    async fn modify(
        &self,
        _device: &DeviceId,
        _create: bool,
        _edit: Edit<'_>,
    ) -> Result<Option<DeviceRecord>, RemoteError> {
        std::future::pending().await
    }

    fn subscribe(&self, device: &DeviceId) -> Result<Subscription, RemoteError> {
        self.0.subscribe(device)
    }
}

struct Rig {
    _dir: TempDir,
    id: DeviceId,
    device: Arc<FakeDevice>,
    notice: Arc<PendingNotice>,
    blocklist: Arc<LocalBlocklist>,
    agent: AgentHandle,
}

fn dev() -> DeviceId {
    DeviceId::new("pixel-10").unwrap()
}

fn rig(gateway: SharedGateway, device: Arc<FakeDevice>, config: AgentConfig) -> Rig {
    let dir = TempDir::new().unwrap();
    let id = dev();
    let notice = Arc::new(PendingNotice::new());
    let blocklist = Arc::new(
        LocalBlocklist::new(dir.path().join("marked_for_deletion"), OWN)
            .with_remote(gateway.clone(), id.clone())
            .with_remote_timeout(config.sync_timeout),
    );
    let reconciler = Reconciler::new(
        id.clone(),
        gateway.clone(),
        blocklist.clone(),
        notice.clone(),
        device.clone(),
        Arc::new(UninstallActuator::new(OWN, device.clone())),
        Arc::new(UninstallSession::new()),
    );
    let services = AgentServices {
        reconciler,
        sync: DeviceSync::new(id.clone(), gateway, device.clone()),
        notice: notice.clone(),
        packages: device.clone(),
    };
    let agent = spawn_agent(services, config);
    Rig { _dir: dir, id, device, notice, blocklist, agent }
}

/// Poll `check` until it holds or a few seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never held");
}

fn set(names: &[&str]) -> BTreeSet<String> {
    normalize_names(names)
}

#[tokio::test]
async fn remote_mark_on_empty_device_converges_on_resume() {
    let gateway = Arc::new(MemoryGateway::new());
    operator::mark_for_deletion(gateway.as_ref(), &dev(), ["com.foo"]).await.unwrap();
    let r = rig(gateway.clone(), FakeDevice::with_apps(&[("com.foo", "Foo")]), AgentConfig::default());

    let report = r.agent.resume().await.unwrap();
    assert!(report.synced);
    assert!(report.foreground.is_none());
    let pass = report.pass.unwrap();
    assert_eq!(pass.replaced, Some(set(&["com.foo"])));
    assert_eq!(r.blocklist.get(), set(&["com.foo"]));
    assert_eq!(r.device.prompts(), vec!["com.foo"]);

    // Snapshot landed without disturbing the operator's set.
    let record = gateway.fetch(&r.id).await.unwrap().unwrap();
    assert_eq!(record.packages.len(), 2);
    assert_eq!(record.marked_for_deletion, Some(set(&["com.foo"])));
}

#[tokio::test]
async fn push_adds_notices_and_prompts_once() {
    let gateway = Arc::new(MemoryGateway::new());
    let device = FakeDevice::with_apps(&[("com.a", "Alpha"), ("com.b", "Bravo")]);
    let r = rig(gateway.clone(), device, AgentConfig::default());
    let mut notices = r.notice.subscribe();

    let data = HashMap::from([("packages".to_string(), "com.a, com.b".to_string())]);
    let pass = r.agent.push(data).await.unwrap().unwrap();

    assert_eq!(r.blocklist.get(), set(&["com.a", "com.b"]));
    assert_eq!(pass.actuated.len(), 1);
    assert_eq!(r.device.prompts(), vec!["com.a"]);
    assert_eq!(notices.try_recv().unwrap().app_names, vec!["Alpha", "Bravo"]);

    // The same push again raises no second notice and no second prompt for com.a.
    let data = HashMap::from([("packages".to_string(), "com.b,com.a".to_string())]);
    let pass = r.agent.push(data).await.unwrap().unwrap();
    assert!(!pass.noticed);
    assert!(notices.try_recv().is_err());
    assert_eq!(r.device.prompts(), vec!["com.a", "com.b"]);

    // Propagated upstream by union.
    let record = gateway.fetch(&r.id).await.unwrap().unwrap();
    assert_eq!(record.marked_for_deletion, Some(set(&["com.a", "com.b"])));
}

#[tokio::test]
async fn push_without_packages_is_ignored() {
    let gateway = Arc::new(MemoryGateway::new());
    let r = rig(gateway, FakeDevice::with_apps(&[]), AgentConfig::default());
    let data = HashMap::from([("action".to_string(), "uninstall_package".to_string())]);
    assert!(r.agent.push(data).await.unwrap().is_none());
    assert!(r.blocklist.get().is_empty());
}

#[tokio::test]
async fn many_blocklisted_prompt_one_per_pass() {
    let gateway = Arc::new(MemoryGateway::new());
    operator::mark_for_deletion(gateway.as_ref(), &dev(), ["com.a", "com.b", "com.c"])
        .await
        .unwrap();
    let device = FakeDevice::with_apps(&[("com.a", "A"), ("com.b", "B"), ("com.c", "C")]);
    let r = rig(gateway, device, AgentConfig::default());

    let report = r.agent.resume().await.unwrap();
    assert_eq!(report.pass.unwrap().actuated.len(), 1);
    assert_eq!(r.device.prompts(), vec!["com.a"]);

    // Second resume: foreground picks the next one, the pass picks the last.
    let report = r.agent.resume().await.unwrap();
    assert_eq!(report.foreground.map(|(p, _)| p).as_deref(), Some("com.b"));
    assert_eq!(r.device.prompts(), vec!["com.a", "com.b", "com.c"]);

    // Everything prompted once; nothing left to do.
    r.agent.resume().await.unwrap();
    assert_eq!(r.device.prompts().len(), 3);
}

#[tokio::test]
async fn legacy_pending_is_processed_once() {
    let gateway = Arc::new(MemoryGateway::new());
    operator::queue_pending_uninstalls(gateway.as_ref(), &dev(), ["com.x", "com.y"])
        .await
        .unwrap();
    let r = rig(gateway.clone(), FakeDevice::with_apps(&[("com.x", "X")]), AgentConfig::default());

    let report = r.agent.resume().await.unwrap();
    let pass = report.pass.unwrap();
    assert!(pass.noticed);
    assert_eq!(pass.absorbed, vec!["com.x", "com.y"]);
    assert_eq!(r.device.prompts(), vec!["com.x"]);
    assert_eq!(r.notice.take().unwrap().app_names, vec!["X", "com.y"]);

    let record = gateway.fetch(&r.id).await.unwrap().unwrap();
    assert!(record.pending().is_empty());
    assert!(gateway.consume_pending_uninstalls(&r.id).await.unwrap().is_empty());

    let report = r.agent.resume().await.unwrap();
    assert!(report.pass.unwrap().absorbed.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_listener_follows_operator_edits() {
    let gateway = Arc::new(MemoryGateway::new());
    let device = FakeDevice::with_apps(&[("com.game", "Game")]);
    let r = rig(gateway.clone(), device, AgentConfig::default());

    assert!(r.agent.attach_listener().await.unwrap());
    assert!(!r.agent.attach_listener().await.unwrap());

    operator::mark_for_deletion(gateway.as_ref(), &dev(), ["com.game"]).await.unwrap();
    let device = r.device.clone();
    eventually(|| device.prompts() == vec!["com.game"]).await;
    assert_eq!(r.blocklist.get(), set(&["com.game"]));

    assert!(r.agent.status().await.unwrap().listener_active);
    assert!(r.agent.detach_listener().await.unwrap());
    assert!(!r.agent.status().await.unwrap().listener_active);
}

#[tokio::test]
async fn reinstall_is_prompted_again() {
    let gateway = Arc::new(MemoryGateway::new());
    let device = FakeDevice::with_apps(&[]);
    let r = rig(gateway, device, AgentConfig::default());
    r.blocklist.replace(["com.sneaky"]).unwrap();

    // Baseline scan, then the package shows up.
    assert!(r.agent.scan_installs().await.unwrap().is_empty());
    r.device.install("com.sneaky", "Sneaky");
    let actuated = r.agent.scan_installs().await.unwrap();
    assert_eq!(actuated.len(), 1);

    // Removed and installed again: prompted again even within the session.
    r.device.uninstall("com.sneaky");
    r.agent.scan_installs().await.unwrap();
    r.device.install("com.sneaky", "Sneaky");
    r.agent.package_added("com.sneaky").await.unwrap();
    assert_eq!(r.device.prompts(), vec!["com.sneaky", "com.sneaky"]);
}

#[tokio::test]
async fn periodic_reports_retry_while_offline() {
    let gateway = Arc::new(MemoryGateway::new());
    let r = rig(gateway.clone(), FakeDevice::with_apps(&[]), AgentConfig::default());

    gateway.set_online(false);
    assert_eq!(r.agent.periodic().await.unwrap(), SyncOutcome::Retry);
    gateway.set_online(true);
    assert_eq!(r.agent.periodic().await.unwrap(), SyncOutcome::Success);
    assert_eq!(r.agent.status().await.unwrap().last_sync, Some(SyncOutcome::Success));
}

#[tokio::test(start_paused = true)]
async fn periodic_gives_up_on_stalled_backend() {
    let gateway = Arc::new(StalledGateway(MemoryGateway::new()));
    let config = AgentConfig { sync_timeout: Duration::from_secs(30) };
    let r = rig(gateway, FakeDevice::with_apps(&[]), config);

    assert_eq!(r.agent.periodic().await.unwrap(), SyncOutcome::Retry);
}

#[tokio::test(start_paused = true)]
async fn stalled_push_write_does_not_wedge_the_agent() {
    let gateway = Arc::new(StalledGateway(MemoryGateway::new()));
    let config = AgentConfig { sync_timeout: Duration::from_secs(30) };
    let r = rig(gateway, FakeDevice::with_apps(&[("com.a", "Alpha")]), config);

    let data = HashMap::from([("packages".to_string(), "com.a".to_string())]);
    let pass = tokio::time::timeout(Duration::from_secs(600), r.agent.push(data))
        .await
        .expect("push never finished")
        .unwrap()
        .unwrap();
    assert_eq!(pass.absorbed, vec!["com.a"]);
    assert_eq!(r.blocklist.get(), set(&["com.a"]));
    assert_eq!(r.device.prompts(), vec!["com.a"]);

    let status = tokio::time::timeout(Duration::from_secs(600), r.agent.status())
        .await
        .expect("agent stopped answering")
        .unwrap();
    assert_eq!(status.prompted, set(&["com.a"]));
}

#[tokio::test(start_paused = true)]
async fn stalled_pending_clear_still_reports_retry() {
    let inner = MemoryGateway::new();
    let mut record = DeviceRecord::new(dev());
    record.pending_uninstalls = Some(vec!["com.x".to_string()]);
    inner.put(&dev(), record);
    let gateway = Arc::new(StalledGateway(inner));
    let config = AgentConfig { sync_timeout: Duration::from_secs(30) };
    let r = rig(gateway, FakeDevice::with_apps(&[("com.x", "X")]), config);

    let outcome = tokio::time::timeout(Duration::from_secs(600), r.agent.periodic())
        .await
        .expect("periodic never returned")
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Retry);
    assert_eq!(r.blocklist.get(), set(&["com.x"]));
    assert_eq!(r.device.prompts(), vec!["com.x"]);
}

#[tokio::test(start_paused = true)]
async fn stalled_token_save_reports_failure() {
    let gateway = Arc::new(StalledGateway(MemoryGateway::new()));
    let config = AgentConfig { sync_timeout: Duration::from_secs(30) };
    let r = rig(gateway, FakeDevice::with_apps(&[]), config);

    let saved = tokio::time::timeout(Duration::from_secs(600), r.agent.new_token("fcm-abc"))
        .await
        .expect("token save never returned")
        .unwrap();
    assert!(!saved);
}

#[tokio::test]
async fn token_rotation_reaches_document() {
    let gateway = Arc::new(MemoryGateway::new());
    let r = rig(gateway.clone(), FakeDevice::with_apps(&[]), AgentConfig::default());
    assert!(r.agent.new_token("fcm-abc").await.unwrap());
    let record = gateway.fetch(&r.id).await.unwrap().unwrap();
    assert_eq!(record.fcm_token.as_deref(), Some("fcm-abc"));
}
