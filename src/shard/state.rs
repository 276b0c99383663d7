//! Shard state tracking
//!
//! Per-shard counters and provisioning status, shared with the health
//! endpoints. Nothing here decides placement; the write cursor lives in
//! [`super::ShardPool`].

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// State for a single shard
#[derive(Debug, Default)]
pub struct ShardStateEntry {
    pub provisioned: AtomicBool,
    pub ips_added: AtomicU64,
    pub overflows: AtomicU64,
    pub last_full: Option<Instant>,
}

/// Point-in-time view of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardSnapshot {
    pub name: String,
    pub provisioned: bool,
    pub ips_added: u64,
    pub overflows: u64,
    /// Seconds since the shard last answered "full"
    pub full_secs_ago: Option<u64>,
}

/// Shared state across all shards in a pool
#[derive(Debug, Clone)]
pub struct ShardState {
    inner: Arc<ShardStateInner>,
}

#[derive(Debug)]
struct ShardStateInner {
    names: Vec<String>,
    shards: DashMap<String, ShardStateEntry>,
}

impl ShardState {
    /// Create a state tracker for the given shard names
    pub fn new(names: &[String]) -> Self {
        let shards = DashMap::new();
        for name in names {
            shards.insert(name.clone(), ShardStateEntry::default());
        }

        Self {
            inner: Arc::new(ShardStateInner {
                names: names.to_vec(),
                shards,
            }),
        }
    }

    /// Mark a shard as present in the store
    pub fn mark_provisioned(&self, shard: &str) {
        if let Some(entry) = self.inner.shards.get(shard) {
            entry.provisioned.store(true, Ordering::SeqCst);
        }
    }

    /// Increment IPs-added counter
    pub fn record_added(&self, shard: &str) {
        if let Some(entry) = self.inner.shards.get(shard) {
            entry.ips_added.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a set-is-full response
    pub fn record_full(&self, shard: &str) {
        if let Some(mut entry) = self.inner.shards.get_mut(shard) {
            entry.overflows.fetch_add(1, Ordering::Relaxed);
            entry.last_full = Some(Instant::now());
        }
    }

    /// Get total shard count in this pool
    pub fn shard_count(&self) -> usize {
        self.inner.names.len()
    }

    /// Get count of provisioned shards
    pub fn provisioned_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.provisioned.load(Ordering::SeqCst))
            .count()
    }

    /// Check if every shard is provisioned
    pub fn is_ready(&self) -> bool {
        self.shard_count() > 0 && self.provisioned_shards() == self.shard_count()
    }

    /// Get total overflow responses across all shards
    pub fn total_overflows(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.overflows.load(Ordering::Relaxed))
            .sum()
    }

    /// Snapshot of every shard, in pool order
    pub fn snapshot(&self) -> Vec<ShardSnapshot> {
        self.inner
            .names
            .iter()
            .filter_map(|name| {
                self.inner.shards.get(name).map(|e| ShardSnapshot {
                    name: name.clone(),
                    provisioned: e.provisioned.load(Ordering::SeqCst),
                    ips_added: e.ips_added.load(Ordering::Relaxed),
                    overflows: e.overflows.load(Ordering::Relaxed),
                    full_secs_ago: e.last_full.map(|at| at.elapsed().as_secs()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["blocklist0".to_string(), "blocklist1".to_string()]
    }

    #[test]
    fn ready_only_when_every_shard_is_provisioned() {
        let state = ShardState::new(&names());
        assert!(!state.is_ready());

        state.mark_provisioned("blocklist0");
        assert_eq!(state.provisioned_shards(), 1);
        assert!(!state.is_ready());

        state.mark_provisioned("blocklist1");
        assert!(state.is_ready());
    }

    #[test]
    fn unknown_shard_names_are_ignored() {
        let state = ShardState::new(&names());
        state.record_added("blocklist9");
        state.record_full("blocklist9");
        assert_eq!(state.total_overflows(), 0);
        assert_eq!(state.shard_count(), 2);
    }

    #[test]
    fn snapshot_preserves_pool_order() {
        let state = ShardState::new(&names());
        state.record_added("blocklist1");
        state.record_full("blocklist0");

        let snap = state.snapshot();
        assert_eq!(snap[0].name, "blocklist0");
        assert_eq!(snap[0].overflows, 1);
        assert!(snap[0].full_secs_ago.is_some());
        assert!(snap[1].full_secs_ago.is_none());
        assert_eq!(snap[1].name, "blocklist1");
        assert_eq!(snap[1].ips_added, 1);
    }
}
