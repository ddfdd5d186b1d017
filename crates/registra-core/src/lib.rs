//! Registra Core - Foundation crate for the Registra portal query engine.
//!
//! This crate provides shared types, the canonical record model, error
//! handling and configuration management that all other Registra crates
//! depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`TargetId`, `SearchMode`, `QueryRequest`)
//! - [`record`] - Raw and canonical record shapes shared across portals
//!
//! # Example
//!
//! ```rust
//! use registra_core::{AppConfig, QueryRequest, SearchMode, TargetId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! assert_eq!(config.engine.max_attempts, 3);
//!
//! let request = QueryRequest::new(TargetId::new("sat-lima")?, SearchMode::Plate, "abc-123")?;
//! assert_eq!(request.value(), "ABC123");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod record;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, EngineConfig, PortalsConfig, SolverConfig, TransportConfig, TransportKind};
pub use error::{ConfigError, ConfigResult, RegistraError, Result};
pub use record::{CanonicalRecord, RawRecord, RecordCategory};
pub use types::{mask_value, QueryRequest, SearchMode, TargetId, WidgetKind};
