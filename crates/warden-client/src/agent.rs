//! The device agent actor.
//!
//! Every trigger goes through one inbox, so reconciliation passes never
//! overlap. [`AgentHandle`] is cheap to clone and can be handed to push
//! receivers, the scheduler, and the CLI alike.
//!
//! ```text
//!   resume ──┐
//!   push ────┤                          ┌─────────────────────────────┐
//!   periodic ┼──▶ AgentHandle ── mpsc ─▶│ Agent (one tokio task)      │
//!   install ─┤        ▲                 │  Reconciler + DeviceSync    │
//!   token ───┘        │                 │  InstallMonitor             │
//!                     │ RemoteChanged   │  live ListenerRegistration ─┼──┐
//!                     └─────────────────┴─────────────────────────────┘  │
//!                                  weak sender, from the document feed ◀─┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use warden_remote::{ListenerRegistration, RemoteError};
use warden_store::{Notice, PendingNotice};
use warden_types::{DeviceId, DeviceRecord, PushCommand};

use crate::actuator::Actuation;
use crate::constants::{DEFAULT_SYNC_TIMEOUT, RETRY_BACKOFF_MAX, RETRY_BACKOFF_MIN};
use crate::monitor::InstallMonitor;
use crate::platform::PackageEnumerator;
use crate::reconcile::{PassReport, Reconciler, Trigger};
use crate::snapshot::DeviceSync;

// ============================================================================
// Error and result types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent shut down")]
    Shutdown,
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

/// Result of a background sync, as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    /// The snapshot did not reach the backend; run again later.
    Retry,
}

/// What a foreground resume did.
#[derive(Debug, Clone)]
pub struct ResumeReport {
    /// Notice raised while nobody was looking.
    pub notice: Option<Notice>,
    /// Prompt issued from the local blocklist before any network call.
    pub foreground: Option<(String, Actuation)>,
    pub synced: bool,
    /// Pass over the fetched document, if the fetch succeeded.
    pub pass: Option<PassReport>,
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub device_id: DeviceId,
    pub blocklist: BTreeSet<String>,
    /// Packages prompted during this process lifetime.
    pub prompted: BTreeSet<String>,
    pub listener_active: bool,
    pub last_sync: Option<SyncOutcome>,
}

/// Services the agent owns.
pub struct AgentServices {
    pub reconciler: Reconciler,
    pub sync: DeviceSync,
    pub notice: Arc<PendingNotice>,
    pub packages: Arc<dyn PackageEnumerator>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bound on each remote step of resume and periodic runs.
    pub sync_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { sync_timeout: DEFAULT_SYNC_TIMEOUT }
    }
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum AgentCommand {
    Resume { reply: oneshot::Sender<ResumeReport> },
    Push { data: HashMap<String, String>, reply: oneshot::Sender<Option<PassReport>> },
    Periodic { reply: oneshot::Sender<SyncOutcome> },
    /// From the live document feed. Nobody waits on it.
    RemoteChanged { record: DeviceRecord },
    PackageAdded { package: String, reply: oneshot::Sender<Option<Actuation>> },
    ScanInstalls { reply: oneshot::Sender<Vec<(String, Actuation)>> },
    NewToken { token: String, reply: oneshot::Sender<bool> },
    AttachListener { reply: oneshot::Sender<Result<bool, AgentError>> },
    DetachListener { reply: oneshot::Sender<bool> },
    Status { reply: oneshot::Sender<AgentStatus> },
}

// ============================================================================
// AgentHandle (public API)
// ============================================================================

/// Handle to a running agent. Each method queues a command and awaits the
/// reply.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> AgentCommand,
    ) -> Result<T, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).map_err(|_| AgentError::Shutdown)?;
        rx.await.map_err(|_| AgentError::Shutdown)
    }

    /// The app came to the foreground.
    pub async fn resume(&self) -> Result<ResumeReport, AgentError> {
        self.call(|reply| AgentCommand::Resume { reply }).await
    }

    /// A push data message arrived. `None` when it carried no package list.
    pub async fn push(&self, data: HashMap<String, String>) -> Result<Option<PassReport>, AgentError> {
        self.call(|reply| AgentCommand::Push { data, reply }).await
    }

    /// Run one background sync.
    pub async fn periodic(&self) -> Result<SyncOutcome, AgentError> {
        self.call(|reply| AgentCommand::Periodic { reply }).await
    }

    /// A package was installed.
    pub async fn package_added(&self, package: &str) -> Result<Option<Actuation>, AgentError> {
        let package = package.to_string();
        self.call(|reply| AgentCommand::PackageAdded { package, reply }).await
    }

    /// Re-enumerate packages and treat new ones as installs.
    pub async fn scan_installs(&self) -> Result<Vec<(String, Actuation)>, AgentError> {
        self.call(|reply| AgentCommand::ScanInstalls { reply }).await
    }

    /// The push token rotated.
    pub async fn new_token(&self, token: &str) -> Result<bool, AgentError> {
        let token = token.to_string();
        self.call(|reply| AgentCommand::NewToken { token, reply }).await
    }

    /// Start the live document listener. False if one is already running.
    pub async fn attach_listener(&self) -> Result<bool, AgentError> {
        self.call(|reply| AgentCommand::AttachListener { reply }).await?
    }

    /// Stop the live document listener. False if none was running.
    pub async fn detach_listener(&self) -> Result<bool, AgentError> {
        self.call(|reply| AgentCommand::DetachListener { reply }).await
    }

    pub async fn status(&self) -> Result<AgentStatus, AgentError> {
        self.call(|reply| AgentCommand::Status { reply }).await
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("closed", &self.tx.is_closed()).finish()
    }
}

// ============================================================================
// Agent (internal, runs on one task)
// ============================================================================

struct Agent {
    reconciler: Reconciler,
    sync: DeviceSync,
    notice: Arc<PendingNotice>,
    packages: Arc<dyn PackageEnumerator>,
    monitor: InstallMonitor,
    listener: Option<ListenerRegistration>,
    sync_timeout: Duration,
    last_sync: Option<SyncOutcome>,
    /// Weak so the live feed does not keep the agent alive.
    inbox: mpsc::WeakUnboundedSender<AgentCommand>,
}

/// Run `fut` with a deadline.
async fn bounded<F: Future>(step: &'static str, limit: Duration, fut: F) -> Result<F::Output, AgentError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AgentError::Timeout(step, limit))
}

impl Agent {
    fn listener_active(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| l.is_active())
    }

    /// Process commands until every handle is dropped.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AgentCommand>) {
        while let Some(cmd) = rx.recv().await {
            self.handle_command(cmd).await;
        }
        if let Some(listener) = self.listener.take() {
            listener.remove();
        }
        debug!(device_id = %self.reconciler.device(), "agent shutting down: channel closed");
    }

    async fn handle_command(&mut self, cmd: AgentCommand) {
        match cmd {
            AgentCommand::Resume { reply } => {
                let report = self.resume().await;
                let _ = reply.send(report);
            }
            AgentCommand::Push { data, reply } => {
                let pass = match PushCommand::from_data(&data) {
                    Some(command) => Some(self.reconciler.handle_push(&command).await),
                    None => {
                        debug!(keys = data.len(), "push without packages ignored");
                        None
                    }
                };
                let _ = reply.send(pass);
            }
            AgentCommand::Periodic { reply } => {
                let outcome = self.periodic().await;
                self.last_sync = Some(outcome);
                let _ = reply.send(outcome);
            }
            AgentCommand::RemoteChanged { record } => {
                self.reconciler.reconcile(&record, Trigger::Live).await;
            }
            AgentCommand::PackageAdded { package, reply } => {
                let _ = reply.send(self.reconciler.handle_package_added(&package));
            }
            AgentCommand::ScanInstalls { reply } => {
                let _ = reply.send(self.scan_installs());
            }
            AgentCommand::NewToken { token, reply } => {
                let saved = bounded("token", self.sync_timeout, self.sync.save_token(&token))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "token save abandoned");
                        false
                    });
                let _ = reply.send(saved);
            }
            AgentCommand::AttachListener { reply } => {
                let _ = reply.send(self.attach_listener());
            }
            AgentCommand::DetachListener { reply } => {
                let removed = match self.listener.take() {
                    Some(listener) => {
                        listener.remove();
                        info!("live listener detached");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(removed);
            }
            AgentCommand::Status { reply } => {
                let _ = reply.send(AgentStatus {
                    device_id: self.reconciler.device().clone(),
                    blocklist: self.reconciler.blocklist().get(),
                    prompted: self.reconciler.session().snapshot(),
                    listener_active: self.listener_active(),
                    last_sync: self.last_sync,
                });
            }
        }
    }

    async fn resume(&mut self) -> ResumeReport {
        let notice = self.notice.take();
        let foreground = self.reconciler.actuate_blocklisted();

        let synced = bounded("sync", self.sync_timeout, self.sync.sync_device(self.listener_active()))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "resume sync abandoned");
                false
            });

        let pass = match self.fetch().await {
            Some(record) => Some(self.reconciler.reconcile(&record, Trigger::Resume).await),
            None => None,
        };
        ResumeReport { notice, foreground, synced, pass }
    }

    /// Sync, then fetch and reconcile. Only the sync decides the outcome.
    async fn periodic(&mut self) -> SyncOutcome {
        let synced = match bounded("sync", self.sync_timeout, self.sync.sync_device(self.listener_active())).await {
            Ok(synced) => synced,
            Err(e) => {
                warn!(error = %e, "background sync abandoned");
                false
            }
        };
        if let Some(record) = self.fetch().await {
            self.reconciler.reconcile(&record, Trigger::Periodic).await;
        }
        if synced { SyncOutcome::Success } else { SyncOutcome::Retry }
    }

    async fn fetch(&self) -> Option<DeviceRecord> {
        let gateway = self.reconciler.gateway();
        let device = self.reconciler.device();
        match bounded("fetch", self.sync_timeout, gateway.fetch_once(device)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "document fetch abandoned");
                None
            }
        }
    }

    fn scan_installs(&mut self) -> Vec<(String, Actuation)> {
        let apps = match self.packages.installed_apps() {
            Ok(apps) => apps,
            Err(e) => {
                debug!(error = %e, "install scan skipped");
                return Vec::new();
            }
        };
        self.monitor
            .observe(&apps)
            .into_iter()
            .filter_map(|package| {
                let outcome = self.reconciler.handle_package_added(&package)?;
                Some((package, outcome))
            })
            .collect()
    }

    fn attach_listener(&mut self) -> Result<bool, AgentError> {
        if self.listener_active() {
            return Ok(false);
        }
        let subscription = self.reconciler.gateway().subscribe(self.reconciler.device())?;
        let inbox = self.inbox.clone();
        let registration = subscription.on_change(move |record| {
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(AgentCommand::RemoteChanged { record });
            }
        });
        self.listener = Some(registration);
        info!(device_id = %self.reconciler.device(), "live listener attached");
        Ok(true)
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Spawn the agent on the current tokio runtime.
pub fn spawn_agent(services: AgentServices, config: AgentConfig) -> AgentHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = Agent {
        reconciler: services.reconciler.with_remote_timeout(config.sync_timeout),
        sync: services.sync,
        notice: services.notice,
        packages: services.packages,
        monitor: InstallMonitor::new(),
        listener: None,
        sync_timeout: config.sync_timeout,
        last_sync: None,
        inbox: tx.downgrade(),
    };
    tokio::spawn(agent.run(rx));
    AgentHandle { tx }
}

/// Timers that drive an agent.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub sync_interval: Duration,
    /// `None` disables install scanning.
    pub install_scan: Option<Duration>,
}

enum Wake {
    Sync,
    Scan,
}

/// Drive periodic syncs (with retry backoff) and install scans until the
/// agent shuts down.
pub fn spawn_scheduler(handle: AgentHandle, schedule: Schedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut periodic =
            tokio::time::interval_at(Instant::now() + schedule.sync_interval, schedule.sync_interval);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scan = schedule.install_scan.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut retry: Option<Pin<Box<Sleep>>> = None;
        let mut backoff = RETRY_BACKOFF_MIN;

        loop {
            let wake = tokio::select! {
                _ = periodic.tick() => Wake::Sync,
                _ = until_retry(&mut retry) => Wake::Sync,
                _ = next_tick(&mut scan) => Wake::Scan,
            };
            let alive = match wake {
                Wake::Scan => handle.scan_installs().await.is_ok(),
                Wake::Sync => {
                    retry = None;
                    match handle.periodic().await {
                        Ok(SyncOutcome::Success) => {
                            backoff = RETRY_BACKOFF_MIN;
                            true
                        }
                        Ok(SyncOutcome::Retry) => {
                            info!(delay = ?backoff, "background sync will retry");
                            retry = Some(Box::pin(tokio::time::sleep(backoff)));
                            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                            true
                        }
                        Err(_) => false,
                    }
                }
            };
            if !alive {
                break;
            }
        }
        debug!("scheduler stopped: agent gone");
    })
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn until_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}
