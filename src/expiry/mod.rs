//! Per-IP expiry: the registry of pending IPs and the loop that processes
//! fired timers under a global pause control.

mod registry;
mod scheduler;

pub use registry::Registry;
pub use scheduler::{Expired, ExpiryControl, ExpiryHandler, ExpiryScheduler, SchedulerState};
