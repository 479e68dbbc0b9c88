//! Database module for driftwatch.
//!
//! Provides SQLite storage with embedded migrations, plus the collaborator
//! traits the evaluation pipeline reads from and writes to.

mod models;
mod repository;
mod store;

pub use models::*;
pub use repository::*;
pub use store::*;
