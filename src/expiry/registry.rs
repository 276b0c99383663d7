//! Registry of IPs with a pending expiry
//!
//! An add first reserves the IP, which makes it pending, and only arms the
//! delayed expiry once the IP is in a shard. So a timer never fires ahead of
//! the write it is meant to undo. Every entry carries a unique token; the
//! fired event echoes it back, so an event for an entry that was deleted,
//! cleared or re-added in the meantime is recognised as stale and ignored.

use super::scheduler::{ExpiryControl, Expired};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Pending expiry for one IP; `timer` is `None` while the write is in flight
#[derive(Debug)]
struct ExpiryHandle {
    token: u64,
    timer: Option<AbortHandle>,
}

impl ExpiryHandle {
    fn abort(&self) {
        if let Some(ref timer) = self.timer {
            timer.abort();
        }
    }
}

/// IP → pending expiry, guarded by one exclusive lock
///
/// The lock is only held for the map mutation itself, never across a store
/// call.
#[derive(Debug)]
pub struct Registry {
    entries: Mutex<HashMap<String, ExpiryHandle>>,
    next_token: AtomicU64,
    expiry: ExpiryControl,
}

impl Registry {
    /// Create an empty registry whose timers report to `expiry`
    pub fn new(expiry: ExpiryControl) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            expiry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ExpiryHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `ip` from absent to pending without a timer yet.
    ///
    /// Returns the entry token, or `None` if `ip` is already pending (the
    /// existing entry is left untouched).
    pub fn reserve(&self, ip: &str) -> Option<u64> {
        let mut entries = self.lock();
        if entries.contains_key(ip) {
            return None;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        entries.insert(ip.to_string(), ExpiryHandle { token, timer: None });
        Some(token)
    }

    /// Start the expiry timer of a reserved entry.
    ///
    /// Returns false if the entry no longer carries `token`: it was deleted
    /// or cleared while the write was in flight, and no timer is started.
    pub fn arm(&self, ip: &str, token: u64, timeout: Duration) -> bool {
        let mut entries = self.lock();
        let Some(handle) = entries.get_mut(ip).filter(|h| h.token == token) else {
            return false;
        };

        let tx = self.expiry.expired_sender();
        let expired = Expired {
            ip: ip.to_string(),
            token,
        };
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Scheduler gone means the process is shutting down
            let _ = tx.send(expired);
        })
        .abort_handle();

        handle.abort();
        handle.timer = Some(timer);
        true
    }

    /// Remove `ip` if its entry still carries `token`. Used by the expiry
    /// path; the timer has already fired so nothing is aborted.
    pub fn claim(&self, ip: &str, token: u64) -> bool {
        let mut entries = self.lock();
        if !entries.get(ip).is_some_and(|h| h.token == token) {
            return false;
        }
        entries.remove(ip);
        true
    }

    /// Undo [`Registry::reserve`] after a failed insert. A no-op if the entry
    /// was already replaced or removed.
    pub fn rollback(&self, ip: &str, token: u64) -> bool {
        let mut entries = self.lock();
        if !entries.get(ip).is_some_and(|h| h.token == token) {
            return false;
        }
        if let Some(handle) = entries.remove(ip) {
            handle.abort();
        }
        true
    }

    /// Remove `ip` and abort its timer. Returns whether it was pending.
    pub fn cancel(&self, ip: &str) -> bool {
        match self.lock().remove(ip) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Remove every entry and abort their timers. Returns how many were pending.
    pub fn clear(&self) -> usize {
        let drained: Vec<ExpiryHandle> = self.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    /// Whether `ip` has a pending expiry
    pub fn contains(&self, ip: &str) -> bool {
        self.lock().contains_key(ip)
    }

    /// Number of pending IPs
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no IP is pending
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
