//! Newline-delimited name sets on disk.
//!
//! One trimmed name per line, sorted, no header, no escaping. Writes go to a
//! sibling temp file first and are renamed into place.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use warden_types::normalize_names;

use crate::StoreError;

/// Read the set at `path`. A missing file is an empty set.
pub(crate) fn read(path: &Path) -> Result<BTreeSet<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(normalize_names(text.lines())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Replace the file contents with `names`.
pub(crate) fn write(path: &Path, names: &BTreeSet<String>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut text = String::new();
    for name in names {
        text.push_str(name);
        text.push('\n');
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, text).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
