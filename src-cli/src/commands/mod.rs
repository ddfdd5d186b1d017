//! CLI command implementations.

pub mod batch;
pub mod check;
pub mod portals;
pub mod query;
