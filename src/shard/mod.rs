//! Shard management module
//!
//! A shard is one named member set in the store; the pool bounds how many
//! exist and decides which one receives new IPs.

mod pool;
mod state;

pub use pool::{shard_name, ShardPool};
pub use state::{ShardSnapshot, ShardState};
