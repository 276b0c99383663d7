//! Domain error types for the ipset controller
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All application code returns Result<T, ControllerError>.

use crate::store::StoreError;
use thiserror::Error;

/// Controller domain errors
///
/// Every variant carries structured context fields for diagnostics, so a
/// log line tells which set or IP was involved without parsing strings.
///
/// Example log output:
/// ```text
/// ControllerError::PoolExhausted { ip: "10.0.0.1", shards: 4 }
/// → "every shard reported full while inserting 10.0.0.1 (4 shards)"
/// ```
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Set creation or verification failed at startup (fatal)
    #[error("failed to provision set '{set}'")]
    Provision {
        set: String,
        #[source]
        source: StoreError,
    },

    /// External add-member failed for a reason other than capacity
    #[error("failed to add {ip} to '{set}'")]
    Mutation {
        ip: String,
        set: String,
        #[source]
        source: StoreError,
    },

    /// An `ip` fragment is not an IPv4 or IPv6 address
    #[error("invalid IP address '{ip}'")]
    InvalidIp {
        ip: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// Every shard in the pool answered "set is full" during one insert
    #[error("every shard reported full while inserting {ip} ({shards} shards)")]
    PoolExhausted { ip: String, shards: usize },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Stream or consumer setup / message pull failed
    #[error("NATS consumer failed on stream '{stream}'")]
    NatsConsumerFailed {
        stream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on the `ipset_errors_total` counter.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Provision { .. } => "provision",
            Self::Mutation { .. } => "mutation",
            Self::InvalidIp { .. } => "invalid_ip",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::NatsConsumerFailed { .. } => "nats_consumer",
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_error() -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, "test"))
    }

    fn store_error() -> StoreError {
        StoreError::Command {
            op: "add",
            set: "blocklist0".to_string(),
            stderr: "Syntax error".to_string(),
        }
    }

    #[test]
    fn every_variant_has_distinct_error_type_label() {
        let labels = [
            ControllerError::Provision {
                set: "blocklist0".to_string(),
                source: store_error(),
            }
            .error_type_label(),
            ControllerError::Mutation {
                ip: "10.0.0.1".to_string(),
                set: "blocklist0".to_string(),
                source: store_error(),
            }
            .error_type_label(),
            ControllerError::InvalidIp {
                ip: "-exist".to_string(),
                source: "-exist".parse::<std::net::IpAddr>().unwrap_err(),
            }
            .error_type_label(),
            ControllerError::PoolExhausted {
                ip: "10.0.0.1".to_string(),
                shards: 2,
            }
            .error_type_label(),
            ControllerError::NatsConnectionFailed(test_error()).error_type_label(),
            ControllerError::NatsConsumerFailed {
                stream: "IPSET".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            ControllerError::Config("test".to_string()).error_type_label(),
        ];

        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len(), "Duplicate error_type_label found");
    }

    #[test]
    fn error_messages_contain_context() {
        let err = ControllerError::PoolExhausted {
            ip: "10.0.0.1".to_string(),
            shards: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains("4 shards"));

        let err = ControllerError::Provision {
            set: "blocklist3".to_string(),
            source: store_error(),
        };
        assert!(err.to_string().contains("blocklist3"));
    }

    #[test]
    fn mutation_error_exposes_store_source() {
        use std::error::Error as _;

        let err = ControllerError::Mutation {
            ip: "bogus".to_string(),
            set: "blocklist0".to_string(),
            source: store_error(),
        };
        let source = err.source().expect("mutation error should carry a source");
        assert!(source.to_string().contains("Syntax error"));
    }

    #[test]
    fn config_error_preserves_message() {
        let err = ControllerError::Config("MAX_SHARDS must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: MAX_SHARDS must be at least 1"
        );
    }
}
