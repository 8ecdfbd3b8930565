//! One-shot "these apps are about to be removed" notice.
//!
//! The holder keeps at most one notice for whoever shows it next, and
//! broadcasts new notices to live listeners. Each notice carries a key
//! derived from its package set; a notice whose key matches the last one
//! accepted is dropped, so the same push arriving on two channels surfaces
//! once.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const NOTICE_CAPACITY: usize = 8;

/// App names to show once, plus the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub app_names: Vec<String>,
    pub key: String,
}

impl Notice {
    /// Build a notice for `packages`, displayed as `app_names`.
    pub fn new<S: AsRef<str>>(packages: &[S], app_names: Vec<String>) -> Self {
        Self { app_names, key: notice_key(packages) }
    }
}

/// Hex blake3 of the sorted, de-duplicated package names.
pub fn notice_key<S: AsRef<str>>(packages: &[S]) -> String {
    let mut names: Vec<&str> = packages.iter().map(|p| p.as_ref().trim()).collect();
    names.sort_unstable();
    names.dedup();
    blake3::hash(names.join("\n").as_bytes()).to_hex().to_string()
}

#[derive(Debug)]
pub struct PendingNotice {
    slot: Mutex<Option<Notice>>,
    last_key: Mutex<Option<String>>,
    tx: broadcast::Sender<Notice>,
}

impl Default for PendingNotice {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingNotice {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { slot: Mutex::new(None), last_key: Mutex::new(None), tx }
    }

    /// Hold `notice` for the next [`take`](Self::take). Returns false when it
    /// duplicates the last accepted notice.
    pub fn set(&self, notice: Notice) -> bool {
        {
            let mut last = self.last_key.lock();
            if last.as_deref() == Some(notice.key.as_str()) {
                trace!(key = %notice.key, "duplicate notice dropped");
                return false;
            }
            *last = Some(notice.key.clone());
        }
        debug!(apps = notice.app_names.len(), "notice pending");
        *self.slot.lock() = Some(notice);
        true
    }

    /// [`set`](Self::set), then tell live listeners.
    pub fn set_and_notify(&self, notice: Notice) -> bool {
        if !self.set(notice.clone()) {
            return false;
        }
        let delivered = self.tx.send(notice).unwrap_or(0);
        trace!(delivered, "notice broadcast");
        true
    }

    /// Return the held notice and clear it.
    pub fn take(&self) -> Option<Notice> {
        self.slot.lock().take()
    }

    /// Live feed of notices accepted by [`set_and_notify`](Self::set_and_notify).
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(packages: &[&str]) -> Notice {
        let names = packages.iter().map(|p| p.to_uppercase()).collect();
        Notice::new(packages, names)
    }

    #[test]
    fn test_key_ignores_order_and_repeats() {
        assert_eq!(notice_key(&["b", "a"]), notice_key(&["a", "b", "a"]));
        assert_ne!(notice_key(&["a"]), notice_key(&["a", "b"]));
    }

    #[test]
    fn test_take_returns_once() {
        let holder = PendingNotice::new();
        assert!(holder.set(notice(&["com.a"])));
        assert_eq!(holder.take().unwrap().app_names, vec!["COM.A"]);
        assert!(holder.take().is_none());
    }

    #[test]
    fn test_duplicate_key_is_dropped() {
        let holder = PendingNotice::new();
        assert!(holder.set_and_notify(notice(&["com.a", "com.b"])));
        assert!(!holder.set_and_notify(notice(&["com.b", "com.a"])));
        assert!(holder.set(notice(&["com.c"])));
        // A different notice in between re-arms the original key.
        assert!(holder.set(notice(&["com.a", "com.b"])));
    }

    #[tokio::test]
    async fn test_listeners_get_new_notices() {
        let holder = PendingNotice::new();
        let mut rx = holder.subscribe();
        holder.set_and_notify(notice(&["com.a"]));
        holder.set_and_notify(notice(&["com.a"]));
        holder.set_and_notify(notice(&["com.b"]));

        assert_eq!(rx.recv().await.unwrap().app_names, vec!["COM.A"]);
        assert_eq!(rx.recv().await.unwrap().app_names, vec!["COM.B"]);
        assert!(rx.try_recv().is_err());
    }
}
