//! Stable device key for the remote document.
//!
//! A platform-provided id is used when it looks real. Otherwise a random
//! UUID is generated once and persisted next to the other stores, so the key
//! survives restarts.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::{info, warn};
use warden_types::DeviceId;

use crate::StoreError;

/// Platform id shared by a large batch of early devices; useless as a key.
pub const KNOWN_BAD_PLATFORM_ID: &str = "9774d56d682e549c";

#[derive(Debug)]
pub struct DeviceIdentity {
    path: PathBuf,
    platform_id: Option<String>,
    resolved: OnceLock<DeviceId>,
}

impl DeviceIdentity {
    /// `path` is where a generated id is persisted.
    pub fn new(path: impl Into<PathBuf>, platform_id: Option<String>) -> Self {
        Self { path: path.into(), platform_id, resolved: OnceLock::new() }
    }

    /// The device key. Stable for the process lifetime and, through the
    /// persisted file, across restarts.
    pub fn device_id(&self) -> Result<DeviceId, StoreError> {
        if let Some(id) = self.resolved.get() {
            return Ok(id.clone());
        }
        let id = self.resolve()?;
        Ok(self.resolved.get_or_init(|| id).clone())
    }

    fn resolve(&self) -> Result<DeviceId, StoreError> {
        if let Some(id) = self.platform_id.as_deref().and_then(usable_platform_id) {
            return Ok(id);
        }

        match fs::read_to_string(&self.path) {
            Ok(text) => match DeviceId::new(&text) {
                Ok(id) => return Ok(id),
                Err(e) => warn!(path = %self.path.display(), error = %e, "stored device id invalid, regenerating"),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&self.path, e)),
        }

        let id = DeviceId::generate();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::write(&self.path, format!("{id}\n")).map_err(|e| StoreError::io(&self.path, e))?;
        info!(device_id = %id, "generated device id");
        Ok(id)
    }
}

fn usable_platform_id(raw: &str) -> Option<DeviceId> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(KNOWN_BAD_PLATFORM_ID) {
        return None;
    }
    DeviceId::new(raw).ok()
}
