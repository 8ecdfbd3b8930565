//! Package names and the installed-app model.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Trim a package name, returning `None` for blank input.
pub fn tidy_name(name: &str) -> Option<String> {
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Trim every name, drop blanks, and collect into a sorted set.
pub fn normalize_names<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().filter_map(|n| tidy_name(n.as_ref())).collect()
}

/// One row from the platform's installed-apps enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub package_name: String,
    /// Display label; enumerators without label access use the package name.
    pub label: String,
    /// Unix millis of first install, 0 when unknown.
    pub first_install_time: u64,
    /// Package that installed this one (e.g. `com.android.vending`).
    pub installer: Option<String>,
    /// User-installed or updated-system apps; pure system apps are false.
    pub can_uninstall: bool,
}

impl InstalledApp {
    pub fn install_source(&self) -> InstallSource {
        InstallSource::from_installer(self.installer.as_deref())
    }
}

/// Where an app came from, for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstallSource {
    Sideloaded,
    GooglePlay,
    PackageInstaller,
    AmazonAppstore,
    Other(String),
}

impl InstallSource {
    /// Preferred tab order; unknown installers sort after these by label.
    pub const PREFERRED: [InstallSource; 4] = [
        InstallSource::Sideloaded,
        InstallSource::GooglePlay,
        InstallSource::PackageInstaller,
        InstallSource::AmazonAppstore,
    ];

    pub fn from_installer(installer: Option<&str>) -> Self {
        match installer.map(str::trim) {
            None | Some("") => Self::Sideloaded,
            Some("com.android.vending") => Self::GooglePlay,
            Some("com.google.android.packageinstaller") => Self::PackageInstaller,
            Some("com.amazon.venezia") => Self::AmazonAppstore,
            Some(other) => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Sideloaded => "Sideloaded",
            Self::GooglePlay => "Google Play",
            Self::PackageInstaller => "Package Installer",
            Self::AmazonAppstore => "Amazon Appstore",
            Self::Other(installer) => installer,
        }
    }
}

impl fmt::Display for InstallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Order apps for listing.
///
/// Groups, in order: bug-flagged uninstallable, bug-flagged system,
/// uninstallable, system, then `own_package` last. Inside a group: by
/// installer, newest install first, then case-insensitive label.
pub fn order_for_display(
    apps: Vec<InstalledApp>,
    bug_flagged: &BTreeSet<String>,
    own_package: &str,
) -> Vec<InstalledApp> {
    let group = |app: &InstalledApp| -> u8 {
        if app.package_name == own_package {
            return 4;
        }
        let bug = bug_flagged.contains(&app.package_name);
        match (bug, app.can_uninstall) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    };

    let mut apps: Vec<_> = apps.into_iter().filter(|a| a.package_name != "android").collect();
    apps.sort_by(|a, b| {
        group(a)
            .cmp(&group(b))
            .then_with(|| {
                a.installer.as_deref().unwrap_or("").cmp(b.installer.as_deref().unwrap_or(""))
            })
            .then_with(|| Reverse(a.first_install_time).cmp(&Reverse(b.first_install_time)))
            .then_with(|| compare_labels(&a.label, &b.label))
    });
    apps
}

fn compare_labels(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(pkg: &str, installed: u64, can_uninstall: bool) -> InstalledApp {
        InstalledApp {
            package_name: pkg.into(),
            label: pkg.rsplit('.').next().unwrap_or(pkg).into(),
            first_install_time: installed,
            installer: Some("com.android.vending".into()),
            can_uninstall,
        }
    }

    #[test]
    fn test_normalize_trims_and_dedups() {
        let names = normalize_names([" com.b ", "com.a", "", "   ", "com.b"]);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["com.a", "com.b"]);
    }

    #[test]
    fn test_install_source_labels() {
        assert_eq!(InstallSource::from_installer(None).label(), "Sideloaded");
        assert_eq!(InstallSource::from_installer(Some(" ")).label(), "Sideloaded");
        assert_eq!(InstallSource::from_installer(Some("com.android.vending")).label(), "Google Play");
        assert_eq!(InstallSource::from_installer(Some("org.fdroid.fdroid")).label(), "org.fdroid.fdroid");
    }

    #[test]
    fn test_display_order_groups() {
        let apps = vec![
            app("com.me.warden", 50, false),
            app("com.sys.clock", 10, false),
            app("com.user.old", 1, true),
            app("com.user.new", 99, true),
            app("com.user.buggy", 5, true),
            app("android", 0, false),
        ];
        let bugs = normalize_names(["com.user.buggy"]);
        let ordered = order_for_display(apps, &bugs, "com.me.warden");
        let names: Vec<_> = ordered.iter().map(|a| a.package_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["com.user.buggy", "com.user.new", "com.user.old", "com.sys.clock", "com.me.warden"]
        );
    }
}
