//! Set-store collaborator
//!
//! The controller never talks to the kernel directly. Every membership
//! mutation goes through [`SetStore`], implemented by [`IpsetStore`] (the
//! privileged `ipset` tool) and [`MemorySetStore`] (in-process, used for
//! local mode and tests).

mod ipset;
mod memory;

pub use ipset::IpsetStore;
pub use memory::MemorySetStore;

use async_trait::async_trait;
use thiserror::Error;

/// What a set holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    /// Set whose members are other set names (`list:set`)
    Umbrella,
    /// Set whose members are IP addresses (`hash:ip`)
    Member,
}

/// Failure of a single store operation
#[derive(Error, Debug)]
pub enum StoreError {
    /// The target set has no free capacity
    #[error("set '{set}' is full")]
    SetFull { set: String },

    /// The tool ran but reported failure
    #[error("ipset {op} on '{set}' failed: {stderr}")]
    Command {
        op: &'static str,
        set: String,
        stderr: String,
    },

    /// The tool could not be executed at all
    #[error("failed to execute {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// True for the capacity signal that triggers a shard advance
    pub fn is_full(&self) -> bool {
        matches!(self, StoreError::SetFull { .. })
    }
}

/// Membership operations on named sets
///
/// Each operation is independently invocable and individually failable. No
/// atomicity across calls is assumed.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Whether `set` exists
    async fn exists(&self, set: &str) -> Result<bool, StoreError>;

    /// Create `set`; creating an existing set of the same kind is not an error
    async fn create(&self, set: &str, kind: SetKind) -> Result<(), StoreError>;

    /// Destroy `set`
    async fn destroy(&self, set: &str) -> Result<(), StoreError>;

    /// Remove every member of `set`
    async fn flush(&self, set: &str) -> Result<(), StoreError>;

    /// Add `value` to `set`. Returns [`StoreError::SetFull`] when out of capacity.
    async fn add_member(&self, set: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `value` from `set`; removing a non-member is not an error
    async fn remove_member(&self, set: &str, value: &str) -> Result<(), StoreError>;
}
