//! Inbound action handling
//!
//! - `decode`: URL-query message format
//! - `dispatch`: per-message tasks with bounded concurrency

mod decode;
mod dispatch;

pub use decode::{decode, Action, DecodeError};
pub use dispatch::Dispatcher;
