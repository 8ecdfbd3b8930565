//! What the engine needs from the host platform.
//!
//! Two seams: enumerating installed packages and launching system
//! screens. Both are synchronous; platform backends shell out or call into
//! the OS and return quickly.

use warden_types::InstalledApp;

/// Whether a package is installed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Installed,
    NotInstalled,
    /// The platform could not answer (device offline, permission denied).
    Unknown,
}

/// Errors from enumerating packages.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected platform output: {0}")]
    Parse(String),
}

/// Lists installed packages.
pub trait PackageEnumerator: Send + Sync {
    /// Every installed package, system apps included.
    fn installed_apps(&self) -> Result<Vec<InstalledApp>, PlatformError>;

    /// Presence of one package.
    fn presence(&self, package: &str) -> Presence;

    /// Display label for a package, if the platform knows one.
    fn label(&self, package: &str) -> Option<String> {
        self.installed_apps()
            .ok()?
            .into_iter()
            .find(|app| app.package_name == package)
            .map(|app| app.label)
    }
}

/// A system screen the actuator can open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// The platform's package-removal confirmation.
    UninstallPackage(String),
    /// The package's details page in system settings.
    AppDetailsSettings(String),
}

impl Intent {
    pub fn package(&self) -> &str {
        match self {
            Self::UninstallPackage(pkg) | Self::AppDetailsSettings(pkg) => pkg,
        }
    }
}

/// Errors from launching a system screen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("launch denied: {0}")]
    Denied(String),
    #[error("launch failed: {0}")]
    Failed(String),
}

/// Starts system screens. Fire-and-forget: success means the screen was
/// requested, not that the user finished anything.
pub trait Launcher: Send + Sync {
    fn launch(&self, intent: &Intent) -> Result<(), LaunchError>;
}
