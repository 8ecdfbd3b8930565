//! Device identifiers.
//!
//! A `DeviceId` is the primary key of a device document. Platform-provided
//! ids are opaque hex strings; generated ids are UUIDv4 text. Either way the
//! id also names a file in the filesystem document store, so it must be a
//! single non-blank path component.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable per-installation device key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

/// Rejected device id text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("device id is blank")]
    Blank,
    #[error("device id {0:?} contains a path separator or control character")]
    InvalidChar(String),
}

impl DeviceId {
    /// Validate and wrap an existing id. Surrounding whitespace is trimmed.
    pub fn new(id: impl AsRef<str>) -> Result<Self, IdError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(IdError::Blank);
        }
        if id == "." || id == ".." || id.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(IdError::InvalidChar(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    /// Fresh random id for devices without a usable platform id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> String {
        id.0
    }
}

impl std::str::FromStr for DeviceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
