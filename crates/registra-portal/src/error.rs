//! Error types for the portal definition subsystem.

use thiserror::Error;

/// Errors that can occur in portal definition operations.
#[derive(Error, Debug)]
pub enum PortalError {
    /// Portal definition not found
    #[error("portal definition not found: {target_id}")]
    NotFound {
        /// The target ID that was not found
        target_id: String,
    },

    /// Failed to load portal definition from file
    #[error("failed to load portal definition from {path}: {source}")]
    LoadError {
        /// Path to the definition file
        path: String,
        /// Underlying error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to parse portal definition TOML
    #[error("failed to parse portal definition TOML in {path}: {source}")]
    ParseError {
        /// Path to the definition file
        path: String,
        /// TOML parse error
        #[source]
        source: toml::de::Error,
    },

    /// Invalid portal definition (validation failed)
    #[error("invalid portal definition for {target_id}: {reason}")]
    ValidationError {
        /// Target ID being validated
        target_id: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Portal definition directory not found
    #[error("portal definitions directory not found at {path}")]
    DirectoryNotFound {
        /// Expected directory path
        path: String,
    },

    /// I/O error while accessing portal definitions
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid target ID format
    #[error("invalid target ID: {0}")]
    InvalidId(#[from] registra_core::RegistraError),
}

/// Result type for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;
