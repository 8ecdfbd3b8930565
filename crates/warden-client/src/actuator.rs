//! Uninstall actuation.
//!
//! Opens the platform's removal prompt for a package, or its settings page
//! when the prompt cannot be opened. Completion is never reported back; the
//! next enumeration shows whether the package is gone.

use std::sync::Arc;

use tracing::{info, warn};

use crate::platform::{Intent, LaunchError, Launcher};

/// Result of one actuation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    /// The removal prompt was opened.
    Requested,
    /// The prompt failed; the package's settings page was opened instead.
    FellBackToSettings,
    Failed(ActuationError),
}

impl Actuation {
    /// True when something was put in front of the user.
    pub fn reached_user(&self) -> bool {
        matches!(self, Self::Requested | Self::FellBackToSettings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuationError {
    #[error("refusing to uninstall the running agent")]
    OwnPackage,
    #[error("blank package name")]
    BlankName,
    #[error("removal prompt failed ({primary}) and settings fallback failed ({fallback})")]
    Launch { primary: LaunchError, fallback: LaunchError },
}

pub struct UninstallActuator {
    own_package: String,
    launcher: Arc<dyn Launcher>,
}

impl UninstallActuator {
    pub fn new(own_package: impl Into<String>, launcher: Arc<dyn Launcher>) -> Self {
        Self { own_package: own_package.into(), launcher }
    }

    pub fn own_package(&self) -> &str {
        &self.own_package
    }

    /// Ask the platform to remove `package`.
    pub fn request(&self, package: &str) -> Actuation {
        let package = package.trim();
        if package.is_empty() {
            return Actuation::Failed(ActuationError::BlankName);
        }
        if package == self.own_package {
            warn!(package, "ignoring uninstall request for own package");
            return Actuation::Failed(ActuationError::OwnPackage);
        }

        let primary = match self.launcher.launch(&Intent::UninstallPackage(package.to_string())) {
            Ok(()) => {
                info!(package, "uninstall prompt requested");
                return Actuation::Requested;
            }
            Err(e) => e,
        };

        warn!(package, error = %primary, "uninstall prompt failed, opening settings");
        match self.launcher.launch(&Intent::AppDetailsSettings(package.to_string())) {
            Ok(()) => Actuation::FellBackToSettings,
            Err(fallback) => {
                warn!(package, error = %fallback, "settings fallback failed");
                Actuation::Failed(ActuationError::Launch { primary, fallback })
            }
        }
    }
}

impl std::fmt::Debug for UninstallActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UninstallActuator")
            .field("own_package", &self.own_package)
            .finish_non_exhaustive()
    }
}
