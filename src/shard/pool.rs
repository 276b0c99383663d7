//! Shard pool implementation
//!
//! Owns the ordered, bounded list of shard sets and the write cursor.
//! New IPs go to the shard at the cursor; a "set is full" answer from the
//! store moves the cursor to the next shard and the insert is retried.

use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use crate::shard::state::ShardState;
use crate::store::{SetKind, SetStore};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Name of the shard at `index`
pub fn shard_name(prefix: &str, index: usize) -> String {
    format!("{prefix}{index}")
}

/// Bounded pool of shard sets plus the umbrella set that lists them
pub struct ShardPool {
    umbrella: String,
    shards: Vec<String>,
    cursor: Mutex<usize>,
    store: Arc<dyn SetStore>,
    state: ShardState,
    metrics: ControllerMetrics,
}

impl ShardPool {
    /// Create a pool of `max_size` shards named `prefix0 .. prefix{max_size-1}`
    ///
    /// Nothing is created in the store until [`ShardPool::ensure_shards`].
    pub fn new(
        prefix: &str,
        umbrella: impl Into<String>,
        max_size: usize,
        store: Arc<dyn SetStore>,
        metrics: ControllerMetrics,
    ) -> Result<Self, ControllerError> {
        if max_size == 0 {
            return Err(ControllerError::Config(
                "shard pool needs at least one shard".to_string(),
            ));
        }

        let shards: Vec<String> = (0..max_size).map(|i| shard_name(prefix, i)).collect();
        let state = ShardState::new(&shards);

        Ok(Self {
            umbrella: umbrella.into(),
            shards,
            cursor: Mutex::new(0),
            store,
            state,
            metrics,
        })
    }

    /// Shard names in pool order
    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    /// Name of the umbrella set
    pub fn umbrella(&self) -> &str {
        &self.umbrella
    }

    /// Get shared state (for health checks)
    pub fn state(&self) -> ShardState {
        self.state.clone()
    }

    fn lock_cursor(&self) -> MutexGuard<'_, usize> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verify or create the umbrella and every shard, registering each shard
    /// in the umbrella. Safe to re-run against an already-provisioned store.
    pub async fn ensure_shards(&self) -> Result<(), ControllerError> {
        self.ensure_set(&self.umbrella, SetKind::Umbrella).await?;

        for shard in &self.shards {
            self.ensure_set(shard, SetKind::Member).await?;

            self.store
                .add_member(&self.umbrella, shard)
                .await
                .map_err(|source| ControllerError::Provision {
                    set: shard.clone(),
                    source,
                })?;

            self.state.mark_provisioned(shard);
        }

        *self.lock_cursor() = 0;

        info!(
            umbrella = %self.umbrella,
            shard_count = self.shards.len(),
            "Shard pool provisioned"
        );
        Ok(())
    }

    async fn ensure_set(&self, set: &str, kind: SetKind) -> Result<(), ControllerError> {
        let provision_err = |source| ControllerError::Provision {
            set: set.to_string(),
            source,
        };

        if self.store.exists(set).await.map_err(provision_err)? {
            debug!(set, ?kind, "Set already exists");
            return Ok(());
        }

        self.store.create(set, kind).await.map_err(provision_err)?;
        info!(set, ?kind, "Created set");
        Ok(())
    }

    /// The shard at the write cursor, with its index
    pub fn current_shard(&self) -> (usize, &str) {
        let index = *self.lock_cursor();
        (index, &self.shards[index])
    }

    /// Move the cursor past `full_index`, wrapping to 0 after the last shard.
    ///
    /// The cursor only moves if it still points at `full_index`; when a
    /// concurrent insert already advanced it, this is a no-op. Returns the
    /// cursor after the call.
    pub fn advance_on_overflow(&self, full_index: usize) -> usize {
        let mut cursor = self.lock_cursor();
        if *cursor == full_index {
            *cursor = if *cursor < self.shards.len() - 1 {
                *cursor + 1
            } else {
                0
            };
        }
        *cursor
    }

    /// Add `ip` to the current shard, advancing past full shards.
    ///
    /// Returns the shard that accepted the IP. Fails with
    /// [`ControllerError::PoolExhausted`] once every shard has answered full
    /// during this call, and with [`ControllerError::Mutation`] on any other
    /// store failure (not retried).
    pub async fn insert(&self, ip: &str) -> Result<&str, ControllerError> {
        let mut full_responses = 0;

        loop {
            let (index, shard) = self.current_shard();

            match self.store.add_member(shard, ip).await {
                Ok(()) => {
                    self.state.record_added(shard);
                    self.metrics.record_added(shard);
                    return Ok(shard);
                }
                Err(source) if source.is_full() => {
                    full_responses += 1;
                    self.state.record_full(shard);
                    self.metrics.record_overflow(shard);
                    warn!(shard, ip, "Shard is full");

                    if full_responses >= self.shards.len() {
                        return Err(ControllerError::PoolExhausted {
                            ip: ip.to_string(),
                            shards: self.shards.len(),
                        });
                    }

                    let next = self.advance_on_overflow(index);
                    debug!(from = shard, to = %self.shards[next], "Write cursor advanced");
                }
                Err(source) => {
                    return Err(ControllerError::Mutation {
                        ip: ip.to_string(),
                        set: shard.to_string(),
                        source,
                    });
                }
            }
        }
    }

    /// Remove `ip` from every shard. Failures are logged; returns how many
    /// shards failed.
    pub async fn remove_everywhere(&self, ip: &str) -> usize {
        let mut failures = 0;
        for shard in &self.shards {
            if let Err(e) = self.store.remove_member(shard, ip).await {
                failures += 1;
                self.metrics.record_error("store_remove");
                warn!(shard, ip, error = %e, "Failed to remove IP from shard");
            }
        }
        failures
    }

    /// Flush every shard. Failures are logged and do not stop the remaining
    /// flushes; returns how many shards failed.
    pub async fn flush_all(&self) -> usize {
        let mut failures = 0;
        for shard in &self.shards {
            if let Err(e) = self.store.flush(shard).await {
                failures += 1;
                self.metrics.record_error("store_flush");
                warn!(shard, error = %e, "Failed to flush shard");
            }
        }
        failures
    }

    /// Remove the umbrella and every shard from the store.
    ///
    /// The umbrella goes first since it references the shards.
    pub async fn teardown(&self) {
        if let Err(e) = self.store.flush(&self.umbrella).await {
            warn!(set = %self.umbrella, error = %e, "Failed to flush umbrella set");
        }
        if let Err(e) = self.store.destroy(&self.umbrella).await {
            warn!(set = %self.umbrella, error = %e, "Failed to destroy umbrella set");
        }
        for shard in &self.shards {
            if let Err(e) = self.store.destroy(shard).await {
                warn!(shard, error = %e, "Failed to destroy shard");
            }
        }
        info!(umbrella = %self.umbrella, "Shard pool torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySetStore;

    fn pool(store: &Arc<MemorySetStore>, max_size: usize) -> ShardPool {
        ShardPool::new(
            "blocklist",
            "blocklist_all",
            max_size,
            store.clone(),
            ControllerMetrics::detached(),
        )
        .unwrap()
    }

    #[test]
    fn shard_names_are_prefix_plus_index() {
        assert_eq!(shard_name("blocklist", 0), "blocklist0");
        assert_eq!(shard_name("bl_", 12), "bl_12");
    }

    #[test]
    fn empty_pool_is_rejected() {
        let store = Arc::new(MemorySetStore::new());
        let result = ShardPool::new(
            "blocklist",
            "blocklist_all",
            0,
            store,
            ControllerMetrics::detached(),
        );
        assert!(matches!(result, Err(ControllerError::Config(_))));
    }

    #[tokio::test]
    async fn ensure_shards_creates_and_registers_every_shard() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 3);

        pool.ensure_shards().await.unwrap();

        assert_eq!(
            store.set_names(),
            ["blocklist0", "blocklist1", "blocklist2", "blocklist_all"]
        );
        assert_eq!(
            store.members("blocklist_all"),
            ["blocklist0", "blocklist1", "blocklist2"]
        );
        assert!(pool.state().is_ready());
    }

    #[tokio::test]
    async fn ensure_shards_is_idempotent() {
        let store = Arc::new(MemorySetStore::new());
        pool(&store, 2).ensure_shards().await.unwrap();
        let created = store.sets_created();

        // A second controller against the same store
        pool(&store, 2).ensure_shards().await.unwrap();

        assert_eq!(store.sets_created(), created);
        assert_eq!(store.set_names().len(), 3);
        assert_eq!(store.members("blocklist_all"), ["blocklist0", "blocklist1"]);
    }

    #[test]
    fn cursor_wraps_after_last_shard() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 3);

        assert_eq!(pool.current_shard(), (0, "blocklist0"));
        assert_eq!(pool.advance_on_overflow(0), 1);
        assert_eq!(pool.advance_on_overflow(1), 2);
        assert_eq!(pool.advance_on_overflow(2), 0);
        assert_eq!(pool.current_shard(), (0, "blocklist0"));
    }

    #[test]
    fn stale_overflow_does_not_skip_a_shard() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 3);

        // Two inserts both saw shard 0 full; only the first one advances.
        assert_eq!(pool.advance_on_overflow(0), 1);
        assert_eq!(pool.advance_on_overflow(0), 1);
        assert_eq!(pool.current_shard(), (1, "blocklist1"));
    }

    #[test]
    fn single_shard_pool_stays_on_shard_zero() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 1);
        assert_eq!(pool.advance_on_overflow(0), 0);
    }

    #[tokio::test]
    async fn insert_overflows_into_next_shard() {
        let store = Arc::new(MemorySetStore::with_capacity(2));
        let pool = pool(&store, 2);
        pool.ensure_shards().await.unwrap();

        assert_eq!(pool.insert("10.0.0.1").await.unwrap(), "blocklist0");
        assert_eq!(pool.insert("10.0.0.2").await.unwrap(), "blocklist0");
        assert_eq!(pool.insert("10.0.0.3").await.unwrap(), "blocklist1");
        assert_eq!(pool.current_shard(), (1, "blocklist1"));
        assert_eq!(pool.state().total_overflows(), 1);
    }

    #[tokio::test]
    async fn insert_fails_fast_when_every_shard_is_full() {
        let store = Arc::new(MemorySetStore::with_capacity(1));
        let pool = pool(&store, 2);
        pool.ensure_shards().await.unwrap();

        pool.insert("10.0.0.1").await.unwrap();
        pool.insert("10.0.0.2").await.unwrap();

        let err = pool.insert("10.0.0.3").await.unwrap_err();
        assert!(matches!(err, ControllerError::PoolExhausted { shards: 2, .. }));
        assert!(!store.contains("blocklist0", "10.0.0.3"));
        assert!(!store.contains("blocklist1", "10.0.0.3"));
    }

    #[tokio::test]
    async fn insert_does_not_retry_other_failures() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 2);
        pool.ensure_shards().await.unwrap();

        let err = pool.insert("not-an-ip").await.unwrap_err();
        assert!(matches!(err, ControllerError::Mutation { .. }));
        assert_eq!(pool.current_shard().0, 0);
    }

    #[tokio::test]
    async fn remove_everywhere_clears_all_shards() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 3);
        pool.ensure_shards().await.unwrap();

        // Same IP placed into two shards behind the pool's back
        store.add_member("blocklist0", "10.0.0.9").await.unwrap();
        store.add_member("blocklist2", "10.0.0.9").await.unwrap();

        assert_eq!(pool.remove_everywhere("10.0.0.9").await, 0);
        for shard in pool.shards() {
            assert!(!store.contains(shard, "10.0.0.9"));
        }
    }

    #[tokio::test]
    async fn flush_all_counts_failures_and_continues() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 3);
        pool.ensure_shards().await.unwrap();
        store.add_member("blocklist2", "10.0.0.1").await.unwrap();

        store.destroy("blocklist1").await.unwrap();

        assert_eq!(pool.flush_all().await, 1);
        assert!(store.members("blocklist2").is_empty());
    }

    #[tokio::test]
    async fn teardown_removes_every_set() {
        let store = Arc::new(MemorySetStore::new());
        let pool = pool(&store, 2);
        pool.ensure_shards().await.unwrap();

        pool.teardown().await;
        assert!(store.set_names().is_empty());
    }
}
