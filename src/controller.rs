//! Applies decoded actions to the shard pool and the expiry registry
//!
//! Add/update reserve the IP in the registry, write it to the current shard
//! and only then arm its expiry; a failed write rolls the reservation back.
//! Delete is broadcast to every shard since the registry does not remember
//! placement.

use crate::action::Action;
use crate::error::ControllerError;
use crate::expiry::{Expired, ExpiryControl, ExpiryHandler, Registry};
use crate::metrics::ControllerMetrics;
use crate::shard::ShardPool;

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of adding a single IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Written to `shard` with a fresh expiry
    Added { shard: String },
    /// Already pending; nothing changed and the expiry was not refreshed
    AlreadyPending,
    /// Deleted or cleared while the write was in flight; the write was undone
    Withdrawn,
}

/// Parse `raw` as an IP address and return its canonical text form
fn canonical_ip(raw: &str) -> Result<String, ControllerError> {
    raw.parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|source| ControllerError::InvalidIp {
            ip: raw.to_string(),
            source,
        })
}

/// Owns the registry and the pool, and is the scheduler's deletion path
pub struct Controller {
    pool: ShardPool,
    registry: Registry,
    expiry: ExpiryControl,
    metrics: ControllerMetrics,
}

impl Controller {
    pub fn new(pool: ShardPool, expiry: ExpiryControl, metrics: ControllerMetrics) -> Self {
        Self {
            pool,
            registry: Registry::new(expiry.clone()),
            expiry,
            metrics,
        }
    }

    pub fn pool(&self) -> &ShardPool {
        &self.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn expiry(&self) -> &ExpiryControl {
        &self.expiry
    }

    /// Apply one decoded action to completion
    pub async fn apply(&self, action: Action) {
        match action {
            Action::Add { ips, timeout } | Action::Update { ips, timeout } => {
                self.add(&ips, timeout).await
            }
            Action::Del { ips } => self.delete(&ips).await,
            Action::Clear => self.clear().await,
            Action::PauseExpiry { duration } => self.pause_expiry(duration),
        }
        self.metrics.set_tracked_ips(self.registry.len());
    }

    /// Add every IP; a failure for one IP does not stop the others
    pub async fn add(&self, ips: &[String], timeout: Duration) {
        for ip in ips {
            match self.add_one(ip, timeout).await {
                Ok(AddOutcome::Added { shard }) => {
                    debug!(ip, shard = %shard, timeout_secs = timeout.as_secs(), "IP added");
                }
                Ok(AddOutcome::AlreadyPending) => {
                    debug!(ip, "IP already pending, expiry unchanged");
                }
                Ok(AddOutcome::Withdrawn) => {
                    info!(ip, "IP removed while being added");
                }
                Err(e @ ControllerError::PoolExhausted { .. }) => {
                    self.metrics.record_error(e.error_type_label());
                    error!(ip, error = %e, "Shard pool exhausted, IP dropped");
                }
                Err(e) => {
                    self.metrics.record_error(e.error_type_label());
                    warn!(ip, error = %e, "Failed to add IP");
                }
            }
        }
    }

    /// Move one IP from absent to pending and write it to a shard
    pub async fn add_one(&self, ip: &str, timeout: Duration) -> Result<AddOutcome, ControllerError> {
        let ip = canonical_ip(ip)?;
        let Some(token) = self.registry.reserve(&ip) else {
            return Ok(AddOutcome::AlreadyPending);
        };

        let shard = match self.pool.insert(&ip).await {
            Ok(shard) => shard.to_string(),
            Err(e) => {
                self.registry.rollback(&ip, token);
                return Err(e);
            }
        };

        if self.registry.arm(&ip, token, timeout) {
            return Ok(AddOutcome::Added { shard });
        }

        // A del or clear ran between reserve and arm; its removal may have
        // missed this write.
        self.pool.remove_everywhere(&ip).await;
        Ok(AddOutcome::Withdrawn)
    }

    /// Remove every IP from all shards and cancel its expiry
    pub async fn delete(&self, ips: &[String]) {
        let mut cancelled = 0;
        for raw in ips {
            let ip = match canonical_ip(raw) {
                Ok(ip) => ip,
                Err(e) => {
                    self.metrics.record_error(e.error_type_label());
                    warn!(ip = %raw, error = %e, "Skipping delete of invalid IP");
                    continue;
                }
            };

            let failures = self.pool.remove_everywhere(&ip).await;
            if self.registry.cancel(&ip) {
                cancelled += 1;
            }
            debug!(ip = %ip, failed_shards = failures, "IP deleted");
        }
        self.metrics.record_removed("deleted", cancelled);
    }

    /// Flush every shard and forget every pending IP
    pub async fn clear(&self) {
        let failures = self.pool.flush_all().await;
        let dropped = self.registry.clear();
        self.metrics.record_removed("cleared", dropped as u64);
        info!(dropped, failed_shards = failures, "All shards cleared");
    }

    /// Ask the scheduler to suspend expiry processing
    pub fn pause_expiry(&self, duration: Duration) {
        if self.expiry.pause(duration) {
            info!(pause_secs = duration.as_secs(), "Expiry pause requested");
        } else {
            warn!("Expiry scheduler is not running, pause ignored");
        }
    }
}

#[async_trait]
impl ExpiryHandler for Controller {
    async fn on_expired(&self, expired: Expired) {
        if !self.registry.claim(&expired.ip, expired.token) {
            debug!(ip = %expired.ip, "Ignoring stale expiry");
            return;
        }

        let failures = self.pool.remove_everywhere(&expired.ip).await;
        self.metrics.record_removed("expired", 1);
        self.metrics.set_tracked_ips(self.registry.len());
        info!(ip = %expired.ip, failed_shards = failures, "IP expired");
    }
}
