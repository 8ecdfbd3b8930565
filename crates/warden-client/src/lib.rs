//! Device-side reconciliation for warden.
//!
//! Keeps the local blocklist in line with the device document and drives
//! the platform uninstall prompt for blocklisted packages that are still
//! installed. Triggers (foreground resume, push, periodic sync, live
//! document feed, installs) all enter through [`AgentHandle`].
//!
//! Platform access is behind [`PackageEnumerator`] and [`Launcher`]; the
//! binary supplies an ADB backend and the tests supply fakes.

pub mod actuator;
pub mod agent;
pub mod constants;
pub mod monitor;
pub mod platform;
pub mod reconcile;
pub mod session;
pub mod snapshot;

pub use actuator::{Actuation, ActuationError, UninstallActuator};
pub use agent::{
    AgentConfig, AgentError, AgentHandle, AgentServices, AgentStatus, ResumeReport, Schedule,
    SyncOutcome, spawn_agent, spawn_scheduler,
};
pub use monitor::InstallMonitor;
pub use platform::{Intent, LaunchError, Launcher, PackageEnumerator, PlatformError, Presence};
pub use reconcile::{PassReport, Reconciler, Trigger};
pub use session::UninstallSession;
pub use snapshot::DeviceSync;
