//! driftwatch - endpoint availability and content drift monitoring.
//!
//! The core is [`evaluation::Evaluator`]: for every completed probe it updates
//! the target's debounced UP/DOWN state and, when the probe succeeded, records
//! a content snapshot classified by how much the page changed.

pub mod config;
pub mod db;
pub mod evaluation;
pub mod probe;
pub mod scheduler;
