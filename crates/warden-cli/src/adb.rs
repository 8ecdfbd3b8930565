//! Android platform access over `adb shell`.
//!
//! Enumeration uses `pm list packages`, presence uses `pm path`, and the
//! removal prompt is an `am start` of the DELETE intent. `adb shell` joins
//! its arguments into one remote command line, so package names are checked
//! against the package-name alphabet before they reach it.

use std::collections::{BTreeMap, BTreeSet};
use std::process::{Command, Output};

use tracing::{debug, warn};
use warden_client::{Intent, LaunchError, Launcher, PackageEnumerator, PlatformError, Presence};
use warden_types::InstalledApp;

use crate::config::AdbConfig;

const ACTION_DELETE: &str = "android.intent.action.DELETE";
const ACTION_APP_DETAILS: &str = "android.settings.APPLICATION_DETAILS_SETTINGS";

#[derive(Debug, Clone)]
pub struct AdbPlatform {
    program: String,
    serial: Option<String>,
}

impl AdbPlatform {
    pub fn new(config: &AdbConfig) -> Self {
        Self { program: config.program.clone(), serial: config.serial.clone() }
    }

    fn shell(&self, args: &[&str]) -> std::io::Result<Output> {
        let mut command = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command.arg("shell").args(args);
        debug!(program = %self.program, ?args, "adb shell");
        command.output()
    }

    /// stdout of a shell command that must succeed.
    fn shell_text(&self, args: &[&str]) -> Result<String, PlatformError> {
        let output = self.shell(args).map_err(|e| PlatformError::Unavailable(e.to_string()))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PlatformError::Unavailable(err));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `Settings.Secure.ANDROID_ID`, if the device reports one.
    pub fn android_id(&self) -> Option<String> {
        match self.shell_text(&["settings", "get", "secure", "android_id"]) {
            Ok(text) => {
                let id = text.trim();
                (!id.is_empty() && id != "null").then(|| id.to_string())
            }
            Err(e) => {
                debug!(error = %e, "android_id unavailable");
                None
            }
        }
    }
}

impl PackageEnumerator for AdbPlatform {
    fn installed_apps(&self) -> Result<Vec<InstalledApp>, PlatformError> {
        let all = parse_package_list(&self.shell_text(&["pm", "list", "packages", "-i"])?)?;
        let user = parse_package_names(&self.shell_text(&["pm", "list", "packages", "-3"])?);
        Ok(all
            .into_iter()
            .map(|(package_name, installer)| InstalledApp {
                can_uninstall: user.contains(&package_name),
                label: package_name.clone(),
                package_name,
                first_install_time: 0,
                installer,
            })
            .collect())
    }

    fn presence(&self, package: &str) -> Presence {
        if !valid_package_name(package) {
            return Presence::NotInstalled;
        }
        match self.shell(&["pm", "path", package]) {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                presence_from_pm_path(&stdout, &stderr)
            }
            Err(e) => {
                warn!(error = %e, package, "presence check failed");
                Presence::Unknown
            }
        }
    }

    // `pm` has no labels; skip the full listing the default would do.
    fn label(&self, _package: &str) -> Option<String> {
        None
    }
}

impl Launcher for AdbPlatform {
    fn launch(&self, intent: &Intent) -> Result<(), LaunchError> {
        let package = intent.package();
        if !valid_package_name(package) {
            return Err(LaunchError::Failed(format!("invalid package name {package:?}")));
        }
        let action = match intent {
            Intent::UninstallPackage(_) => ACTION_DELETE,
            Intent::AppDetailsSettings(_) => ACTION_APP_DETAILS,
        };
        let data = format!("package:{package}");
        let output = self
            .shell(&["am", "start", "-a", action, "-d", &data])
            .map_err(|e| LaunchError::Failed(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        check_am_start(output.status.success(), &stdout, &stderr)
    }
}

/// Package names are dot-separated Java identifiers.
pub fn valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        && !name.starts_with('.')
}

/// Parse `pm list packages -i`:
///
/// ```text
/// package:com.example.game  installer=com.android.vending
/// package:com.android.settings  installer=null
/// ```
pub fn parse_package_list(text: &str) -> Result<Vec<(String, Option<String>)>, PlatformError> {
    let mut packages = BTreeMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(rest) = line.strip_prefix("package:") else {
            return Err(PlatformError::Parse(line.to_string()));
        };
        let mut tokens = rest.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        let installer = tokens
            .find_map(|t| t.strip_prefix("installer="))
            .filter(|i| !i.is_empty() && *i != "null")
            .map(str::to_string);
        packages.insert(name.to_string(), installer);
    }
    Ok(packages.into_iter().collect())
}

/// Names from plain `pm list packages` output. Other lines are ignored.
pub fn parse_package_names(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `pm path` prints `package:<apk>` per split, or nothing for a missing
/// package. adb itself reports a missing device on stderr.
fn presence_from_pm_path(stdout: &str, stderr: &str) -> Presence {
    if stdout.lines().any(|l| l.trim_start().starts_with("package:")) {
        Presence::Installed
    } else if stderr.lines().any(|l| l.starts_with("error:") || l.starts_with("adb:")) {
        Presence::Unknown
    } else {
        Presence::NotInstalled
    }
}

/// `am start` often exits 0 while printing an error.
fn check_am_start(success: bool, stdout: &str, stderr: &str) -> Result<(), LaunchError> {
    let combined = format!("{stdout}\n{stderr}");
    if combined.contains("SecurityException") || combined.contains("Permission Denial") {
        return Err(LaunchError::Denied(first_line_with(&combined, "Exception")));
    }
    if !success || combined.lines().any(|l| l.trim_start().starts_with("Error")) {
        return Err(LaunchError::Failed(first_line_with(&combined, "Error")));
    }
    Ok(())
}

fn first_line_with(text: &str, needle: &str) -> String {
    text.lines()
        .find(|l| l.contains(needle))
        .or_else(|| text.lines().find(|l| !l.trim().is_empty()))
        .unwrap_or("no output")
        .trim()
        .to_string()
}
