//! # lessor-core
//!
//! Time-bound leases over external resources. A lease turns into a pair of
//! timed events; the scheduler fires them through resource plugins, acting
//! on behalf of the original requester via a delegated trust.

pub mod actions;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod manager;
pub mod plugin;
#[path = "plugin_dummy.rs"]
pub mod plugin_dummy;
pub mod rpc;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod actions_test;
#[cfg(test)]
#[path = "infrastructure_test.rs"]
mod infrastructure_test;
