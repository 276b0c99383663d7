//! Prometheus metrics module
//!
//! Recording goes through the `metrics` facade, so a [`ControllerMetrics`]
//! without an installed recorder is a cheap no-op (used by tests and by
//! components built before the exporter exists).

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Controller metrics collector
#[derive(Clone, Default)]
pub struct ControllerMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl ControllerMetrics {
    /// Install the global Prometheus recorder and return a rendering handle
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Metrics that record into whatever recorder is installed (if any)
    /// and render nothing
    pub fn detached() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "ipset_actions_total",
            Unit::Count,
            "Control actions decoded from the queue"
        );
        describe_counter!(
            "ipset_decode_failures_total",
            Unit::Count,
            "Inbound messages dropped as malformed"
        );
        describe_counter!(
            "ipset_ips_added_total",
            Unit::Count,
            "IPs written into a shard"
        );
        describe_counter!(
            "ipset_ips_removed_total",
            Unit::Count,
            "IPs removed from the pool (deleted, expired, cleared)"
        );
        describe_counter!(
            "ipset_shard_overflow_total",
            Unit::Count,
            "Set-is-full responses per shard"
        );
        describe_counter!("ipset_errors_total", Unit::Count, "Controller errors");

        describe_histogram!(
            "ipset_store_command_duration_seconds",
            Unit::Seconds,
            "Time spent in a single set-store command"
        );

        describe_gauge!(
            "ipset_tracked_ips",
            Unit::Count,
            "IPs with a pending expiry"
        );
        describe_gauge!(
            "ipset_expiry_paused",
            Unit::Count,
            "Expiry processing state (1=paused, 0=running)"
        );
        describe_gauge!(
            "ipset_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );
    }

    /// Record a decoded action
    pub fn record_action(&self, action: &'static str) {
        counter!("ipset_actions_total", "action" => action).increment(1);
    }

    /// Record a dropped message
    pub fn record_decode_failure(&self, reason: &'static str) {
        counter!("ipset_decode_failures_total", "reason" => reason).increment(1);
    }

    /// Record an IP written to a shard
    pub fn record_added(&self, shard: &str) {
        counter!("ipset_ips_added_total", "shard" => shard.to_string()).increment(1);
    }

    /// Record IPs leaving the pool
    pub fn record_removed(&self, reason: &'static str, count: u64) {
        counter!("ipset_ips_removed_total", "reason" => reason).increment(count);
    }

    /// Record a set-is-full response
    pub fn record_overflow(&self, shard: &str) {
        counter!("ipset_shard_overflow_total", "shard" => shard.to_string()).increment(1);
    }

    /// Record controller error
    pub fn record_error(&self, error_type: &'static str) {
        counter!("ipset_errors_total", "error_type" => error_type).increment(1);
    }

    /// Record duration of one store command
    pub fn record_store_command(&self, op: &'static str, duration: Duration) {
        histogram!("ipset_store_command_duration_seconds", "op" => op)
            .record(duration.as_secs_f64());
    }

    /// Set number of IPs with a pending expiry
    pub fn set_tracked_ips(&self, count: usize) {
        gauge!("ipset_tracked_ips").set(count as f64);
    }

    /// Set expiry pause state
    pub fn set_expiry_paused(&self, paused: bool) {
        gauge!("ipset_expiry_paused").set(if paused { 1.0 } else { 0.0 });
    }

    /// Set NATS connection status
    pub fn set_nats_connected(&self, connected: bool) {
        gauge!("ipset_nats_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
