//! `ipset` command-line backend
//!
//! Runs the privileged tool (optionally through sudo) once per operation and
//! classifies failures from its stderr, the only feedback channel the tool
//! offers.

use super::{SetKind, SetStore, StoreError};
use crate::metrics::ControllerMetrics;

use async_trait::async_trait;
use std::process::Output;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, trace};

/// stderr fragments (lowercased) that mean the set has no free capacity.
/// `list:set` reports "set is full", hash types report "hash is full".
const FULL_SIGNALS: &[&str] = &["set is full", "hash is full"];

/// Set store backed by the `ipset` tool
#[derive(Clone)]
pub struct IpsetStore {
    ipset_bin: String,
    sudo_bin: Option<String>,
    max_elements: Option<u64>,
    umbrella_size: Option<usize>,
    metrics: ControllerMetrics,
}

impl IpsetStore {
    /// Create a store running `ipset_bin`, wrapped in `sudo_bin` when given
    pub fn new(ipset_bin: impl Into<String>, sudo_bin: Option<String>, metrics: ControllerMetrics) -> Self {
        Self {
            ipset_bin: ipset_bin.into(),
            sudo_bin: sudo_bin.filter(|s| !s.is_empty()),
            max_elements: None,
            umbrella_size: None,
            metrics,
        }
    }

    /// Cap the element count of newly created member sets
    pub fn with_max_elements(mut self, max_elements: Option<u64>) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Size of newly created umbrella sets (`list:set` defaults to 8 entries)
    pub fn with_umbrella_size(mut self, size: usize) -> Self {
        self.umbrella_size = Some(size);
        self
    }

    /// Program and argument vector for one ipset invocation
    fn argv(&self, args: &[&str]) -> (String, Vec<String>) {
        let ipset_args = args.iter().map(|a| a.to_string());
        match self.sudo_bin {
            Some(ref sudo) => (
                sudo.clone(),
                std::iter::once(self.ipset_bin.clone()).chain(ipset_args).collect(),
            ),
            None => (self.ipset_bin.clone(), ipset_args.collect()),
        }
    }

    /// Arguments for `create`
    fn create_args(&self, set: &str, kind: SetKind) -> Vec<String> {
        let mut args = vec!["create".to_string(), set.to_string()];
        match kind {
            SetKind::Umbrella => args.push("list:set".to_string()),
            SetKind::Member => args.push("hash:ip".to_string()),
        }
        args.push("-exist".to_string());
        match kind {
            SetKind::Member => {
                if let Some(max) = self.max_elements {
                    args.push("maxelem".to_string());
                    args.push(max.to_string());
                }
            }
            SetKind::Umbrella => {
                if let Some(size) = self.umbrella_size {
                    args.push("size".to_string());
                    args.push(size.to_string());
                }
            }
        }
        args
    }

    /// Run one ipset command and return its raw output
    async fn output(&self, op: &'static str, args: &[&str]) -> Result<Output, StoreError> {
        let (program, argv) = self.argv(args);
        trace!(program, ?argv, "Running set-store command");

        let start = Instant::now();
        let output = Command::new(&program)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StoreError::Spawn {
                program: program.clone(),
                source,
            })?;
        self.metrics.record_store_command(op, start.elapsed());

        Ok(output)
    }

    /// Run one ipset command, mapping a non-zero exit to a [`StoreError`]
    async fn run(&self, op: &'static str, set: &str, args: &[&str]) -> Result<(), StoreError> {
        let output = self.output(op, args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(op, set, stderr, "Set-store command failed");
        Err(classify_failure(op, set, stderr))
    }
}

/// Refuse a value the tool would parse as an option rather than a member
fn member_arg<'a>(op: &'static str, set: &str, value: &'a str) -> Result<&'a str, StoreError> {
    if value.is_empty() || value.starts_with('-') {
        return Err(StoreError::Command {
            op,
            set: set.to_string(),
            stderr: format!("refusing option-like member '{value}'"),
        });
    }
    Ok(value)
}

/// Map the tool's stderr to a capacity or generic failure
fn classify_failure(op: &'static str, set: &str, stderr: String) -> StoreError {
    let lower = stderr.to_ascii_lowercase();
    if FULL_SIGNALS.iter().any(|signal| lower.contains(signal)) {
        StoreError::SetFull {
            set: set.to_string(),
        }
    } else {
        StoreError::Command {
            op,
            set: set.to_string(),
            stderr,
        }
    }
}

#[async_trait]
impl SetStore for IpsetStore {
    async fn exists(&self, set: &str) -> Result<bool, StoreError> {
        let output = self.output("list", &["list", "-name", set]).await?;
        Ok(output.status.success())
    }

    async fn create(&self, set: &str, kind: SetKind) -> Result<(), StoreError> {
        let args = self.create_args(set, kind);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("create", set, &args).await
    }

    async fn destroy(&self, set: &str) -> Result<(), StoreError> {
        self.run("destroy", set, &["destroy", set]).await
    }

    async fn flush(&self, set: &str) -> Result<(), StoreError> {
        self.run("flush", set, &["flush", set]).await
    }

    async fn add_member(&self, set: &str, value: &str) -> Result<(), StoreError> {
        let value = member_arg("add", set, value)?;
        self.run("add", set, &["add", set, value, "-exist"]).await
    }

    async fn remove_member(&self, set: &str, value: &str) -> Result<(), StoreError> {
        let value = member_arg("del", set, value)?;
        self.run("del", set, &["del", set, value, "-exist"]).await
    }
}
