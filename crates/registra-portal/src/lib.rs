//! Registra Portal - Site adapters for legacy query portals.
//!
//! Each target portal is described by a TOML definition: where its search
//! form lives, the CAPTCHA it shows, which fields to post, how to recognise
//! results and "no data" answers, and how raw columns map to canonical keys.
//!
//! # Architecture
//!
//! - **Definition Types** ([`definition`]): Strongly-typed portal configuration
//! - **Adapter** ([`adapter`]): The [`SiteAdapter`] mapping interface used by the engine
//! - **Loader** ([`loader`]): TOML file loading from `portal-definitions/`
//! - **Registry** ([`registry`]): In-memory cache with query support
//! - **Errors** ([`error`]): Portal-specific error types
//!
//! # Example
//!
//! ```rust
//! use registra_core::{RecordCategory, TargetId};
//! use registra_portal::{PortalLoader, PortalRegistry, SiteAdapter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = PortalLoader::with_default_dir()?;
//! let registry = PortalRegistry::load_from(&loader)?;
//!
//! let definition = registry.get(&TargetId::new("sat-lima-papeletas")?)?;
//! assert_eq!(definition.category(), RecordCategory::Infraction);
//! assert_eq!(definition.map_field("Falta").map(|f| f.key), Some("description"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod adapter;
pub mod definition;
pub mod error;
pub mod loader;
pub mod registry;

pub use adapter::{normalize_label, FieldTarget, SiteAdapter};
pub use definition::{
    ChallengeSpec, FieldMapping, Markers, PortalDefinition, PortalMetadata, ResultSelectors,
    ResultView, SearchHttpMethod, SearchSpec, SessionSpec, SubmitField, ValueKind,
};
pub use registra_core::WidgetKind;
pub use error::{PortalError, Result};
pub use loader::PortalLoader;
pub use registry::PortalRegistry;
