//! Controller configuration module
//!
//! Handles loading configuration from environment variables (a `.env` file
//! is honoured when present).

use crate::error::ControllerError;
use std::env;
use std::str::FromStr;

/// Which set store the controller drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// The `ipset` command-line tool
    Ipset,
    /// In-process sets, for local runs without privileges
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ipset" => Ok(StoreBackend::Ipset),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ControllerError::Config(format!(
                "STORE_BACKEND must be 'ipset' or 'memory', got '{other}'"
            ))),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// NATS server URL(s); `None` runs without a queue (local mode)
    pub nats_url: Option<String>,

    /// JetStream stream holding action messages
    pub nats_stream: String,

    /// Subject action messages are published on
    pub nats_subject: String,

    /// Durable consumer name, shared by restarts of the same controller
    pub nats_consumer: String,

    /// Shard names are `{set_prefix}{index}`
    pub set_prefix: String,

    /// Umbrella set listing every shard
    pub umbrella_set: String,

    /// Number of shards in the pool
    pub max_shards: usize,

    /// Per-shard element cap passed to `ipset create ... maxelem`
    pub shard_max_elements: Option<u64>,

    /// Set store backend
    pub store_backend: StoreBackend,

    /// Path of the ipset binary
    pub ipset_bin: String,

    /// Privilege wrapper; `None` runs ipset directly
    pub sudo_bin: Option<String>,

    /// Maximum actions applied concurrently
    pub dispatch_concurrency: usize,

    /// Destroy the umbrella and every shard on shutdown
    pub teardown_on_exit: bool,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

fn parse<T>(name: &str, raw: Option<String>, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| ControllerError::Config(format!("{name} is invalid: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: Option<String>) -> Result<bool, ControllerError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") => Ok(true),
        Some(v) if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") => Ok(false),
        Some(v) => Err(ControllerError::Config(format!("{name} must be a boolean, got '{v}'"))),
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let nats_url = lookup("NATS_URL").filter(|url| !url.trim().is_empty());

        let max_shards = parse("MAX_SHARDS", lookup("MAX_SHARDS"), 4usize)?;
        if max_shards == 0 {
            return Err(ControllerError::Config("MAX_SHARDS must be at least 1".to_string()));
        }

        let shard_max_elements = lookup("SHARD_MAX_ELEMENTS")
            .map(|raw| parse("SHARD_MAX_ELEMENTS", Some(raw), 0u64))
            .transpose()?;

        let store_backend: StoreBackend = var("STORE_BACKEND", "ipset").parse()?;

        // Empty SUDO_BIN disables the wrapper
        let sudo_bin = Some(var("SUDO_BIN", "/usr/bin/sudo")).filter(|s| !s.trim().is_empty());

        let dispatch_concurrency = parse("DISPATCH_CONCURRENCY", lookup("DISPATCH_CONCURRENCY"), 64usize)?;
        if dispatch_concurrency == 0 {
            return Err(ControllerError::Config(
                "DISPATCH_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let teardown_on_exit = parse_bool("TEARDOWN_ON_EXIT", lookup("TEARDOWN_ON_EXIT"))?;

        let http_port = parse("HTTP_PORT", lookup("HTTP_PORT"), 9090u16)?;

        Ok(Self {
            nats_url,
            nats_stream: var("NATS_STREAM", "IPSET"),
            nats_subject: var("NATS_SUBJECT", "ipset.actions"),
            nats_consumer: var("NATS_CONSUMER", "ipset-controller"),
            set_prefix: var("SET_PREFIX", "blocklist"),
            umbrella_set: var("UMBRELLA_SET", "blocklist_all"),
            max_shards,
            shard_max_elements,
            store_backend,
            ipset_bin: var("IPSET_BIN", "/usr/sbin/ipset"),
            sudo_bin,
            dispatch_concurrency,
            teardown_on_exit,
            http_port,
            log_level: var("LOG_LEVEL", "info"),
        })
    }
}
