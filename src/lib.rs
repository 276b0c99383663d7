//! ipset controller
//!
//! Maintains a time-limited IP blocklist spread over a bounded pool of
//! kernel ipset sets:
//! - Decodes control actions (add/update/del/clear/stop) from a NATS queue
//! - Places IPs into shard sets, overflowing to the next shard when full
//! - Removes every IP again once its timeout elapses
//! - Exposes health/ready endpoints and Prometheus metrics

pub mod action;
pub mod config;
pub mod controller;
pub mod error;
pub mod expiry;
pub mod health;
pub mod metrics;
pub mod nats;
pub mod shard;
pub mod store;
