//! Filesystem document store.
//!
//! Documents live under `<root>/devices/<device-id>.json`. Writers hold an
//! in-process mutex per device plus an advisory `flock` on
//! `.<device-id>.lock`, so the device agent and operator tooling running as
//! separate processes still serialize their read-modify-write sections.
//! Documents are replaced by rename, so readers never see a torn file.
//! File access goes through `tokio::fs` and the `flock` wait runs on the
//! blocking pool, so a held lock never stalls the runtime.
//!
//! Live feeds use a `notify` watcher on the collection directory.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::{debug, info, trace, warn};
use warden_types::{DeviceId, DeviceRecord};

use crate::gateway::{Edit, RemoteGateway};
use crate::subscription::Subscription;
use crate::{DEVICES_COLLECTION, RemoteError};

const FEED_CAPACITY: usize = 16;
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Document store rooted at a directory.
#[derive(Debug)]
pub struct FsGateway {
    collection: PathBuf,
    locks: DashMap<DeviceId, Arc<AsyncMutex<()>>>,
}

impl FsGateway {
    /// Open (creating if needed) the `devices` collection under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RemoteError> {
        let collection = root.as_ref().join(DEVICES_COLLECTION);
        fs::create_dir_all(&collection)?;
        info!(path = %collection.display(), "filesystem document store opened");
        Ok(Self { collection, locks: DashMap::new() })
    }

    /// Directory holding the device documents.
    pub fn collection(&self) -> &Path {
        &self.collection
    }

    fn doc_path(&self, device: &DeviceId) -> PathBuf {
        self.collection.join(doc_file_name(device))
    }

    fn lock_path(&self, device: &DeviceId) -> PathBuf {
        self.collection.join(format!(".{}.lock", device.as_str()))
    }

    fn tmp_path(&self, device: &DeviceId) -> PathBuf {
        self.collection.join(format!(".{}.json.tmp", device.as_str()))
    }

    fn device_lock(&self, device: &DeviceId) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(device.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn write_doc(&self, device: &DeviceId, record: &DeviceRecord) -> Result<(), RemoteError> {
        let tmp = self.tmp_path(device);
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, self.doc_path(device)).await?;
        Ok(())
    }

    /// Hold the cross-process lock for `device`. `flock` blocks, so the wait
    /// runs on the blocking pool and the caller's timeouts keep working.
    /// The lock is released when the returned file drops.
    async fn lock_document(&self, device: &DeviceId) -> Result<File, RemoteError> {
        let path = self.lock_path(device);
        let file = tokio::task::spawn_blocking(move || open_locked(&path))
            .await
            .map_err(io::Error::other)??;
        Ok(file)
    }
}

fn open_locked(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
    lock_exclusive(&file)?;
    Ok(file)
}

fn doc_file_name(device: &DeviceId) -> String {
    format!("{}.json", device.as_str())
}

/// Missing and empty files both read as "no document".
fn decode_doc(read: io::Result<Vec<u8>>) -> Result<Option<DeviceRecord>, RemoteError> {
    let bytes = match read {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// For the watcher thread and `subscribe`, which are not async.
fn read_doc(path: &Path) -> Result<Option<DeviceRecord>, RemoteError> {
    decode_doc(fs::read(path))
}

async fn read_doc_async(path: &Path) -> Result<Option<DeviceRecord>, RemoteError> {
    decode_doc(tokio::fs::read(path).await)
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    rustix::fs::flock(file, rustix::fs::FlockOperation::LockExclusive)?;
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl RemoteGateway for FsGateway {
    async fn fetch(&self, device: &DeviceId) -> Result<Option<DeviceRecord>, RemoteError> {
        read_doc_async(&self.doc_path(device)).await
    }

    async fn modify(
        &self,
        device: &DeviceId,
        create: bool,
        edit: Edit<'_>,
    ) -> Result<Option<DeviceRecord>, RemoteError> {
        let local = self.device_lock(device);
        let _local = local.lock().await;
        let _flock = self.lock_document(device).await?;

        let (mut record, created) = match read_doc_async(&self.doc_path(device)).await? {
            Some(record) => (record, false),
            None if create => (DeviceRecord::new(device.clone()), true),
            None => return Ok(None),
        };
        let before = record.clone();
        edit(&mut record);
        if created || record != before {
            self.write_doc(device, &record).await?;
            trace!(device_id = %device, created, "document written");
        }
        Ok(Some(record))
    }

    fn subscribe(&self, device: &DeviceId) -> Result<Subscription, RemoteError> {
        let path = self.doc_path(device);
        let initial = read_doc(&path)?;
        let (tx, rx) = broadcast::channel(FEED_CAPACITY);

        let watched_name = doc_file_name(device);
        let last_sent = Arc::new(Mutex::new(initial.clone()));
        let device_id = device.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "document watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                let ours = event.paths.iter().any(|p| {
                    p.file_name().and_then(|n| n.to_str()) == Some(watched_name.as_str())
                });
                if !ours {
                    return;
                }
                match read_doc(&path) {
                    Ok(Some(record)) => {
                        let mut last = last_sent.lock();
                        if last.as_ref() == Some(&record) {
                            return;
                        }
                        *last = Some(record.clone());
                        // No receivers just means the subscriber went away.
                        let _ = tx.send(record);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(device_id = %device_id, error = %e, "skipping unreadable document state");
                    }
                }
            },
            notify::Config::default().with_poll_interval(WATCH_POLL_INTERVAL),
        )
        .map_err(|e| RemoteError::Watch(e.to_string()))?;

        watcher
            .watch(&self.collection, RecursiveMode::NonRecursive)
            .map_err(|e| RemoteError::Watch(e.to_string()))?;
        debug!(device_id = %device, "document watch started");

        Ok(Subscription::new(device.clone(), initial, rx).with_source(watcher))
    }
}
