//! Resource lifecycle management
//!
//! Stream and table creation/deletion are asynchronous on the managed side,
//! so every lifecycle operation here is built on the same primitive:
//! request the change, then poll `describe` until the resource reaches the
//! wanted state or a wait budget runs out.

pub mod poller;
pub mod stream;
pub mod table;

pub use stream::StreamLifecycleManager;
pub use table::TableLifecycleManager;

use std::time::Duration;

/// Polling cadence and wait budgets for one lifecycle manager.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    /// Delay between consecutive status checks.
    pub poll_interval: Duration,
    /// Wait budget for a resource to become active after create.
    pub creation_timeout: Duration,
    /// Wait budget for a resource to disappear after delete.
    pub deletion_timeout: Duration,
}
