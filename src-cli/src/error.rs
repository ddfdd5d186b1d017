//! Error type printed by CLI commands.

use registra_browser::BrowserError;
use registra_core::{ConfigError, RegistraError};
use registra_portal::PortalError;
use registra_solver::SolverError;
use serde::Serialize;
use std::fmt;

/// Serializable command error, written to stdout as JSON.
#[derive(Debug, Serialize)]
pub struct CommandError {
    /// Stable error code for scripts (e.g., "SOLVER_NOT_CONFIGURED")
    pub code: String,
    /// User-friendly error message
    pub message: String,
    /// Optional debugging context (never contains search values or keys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    /// Create a new command error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create a command error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidValue { field, reason } => Self::with_details(
                "CONFIG_INVALID",
                format!("Invalid configuration: {reason}"),
                serde_json::json!({ "field": field }),
            ),
            ConfigError::NoConfigDir => {
                Self::new("CONFIG_DIR_MISSING", "Could not determine config directory")
            }
            other => Self::new("CONFIG_LOAD_FAILED", format!("Could not load config: {other}")),
        }
    }
}

impl From<RegistraError> for CommandError {
    fn from(err: RegistraError) -> Self {
        match err {
            RegistraError::Config(err) => err.into(),
            RegistraError::Validation(msg) => Self::new("INVALID_ARGUMENT", msg),
            other => Self::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

impl From<PortalError> for CommandError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::NotFound { target_id } => Self::with_details(
                "PORTAL_NOT_FOUND",
                format!("Portal {target_id} not found"),
                serde_json::json!({ "target_id": target_id }),
            ),
            PortalError::DirectoryNotFound { path } => Self::with_details(
                "PORTALS_DIR_NOT_FOUND",
                "Portal definitions directory does not exist",
                serde_json::json!({ "path": path }),
            ),
            other => Self::new(
                "PORTAL_LOAD_FAILED",
                format!("Could not load portal definitions: {other}"),
            ),
        }
    }
}

impl From<SolverError> for CommandError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::MissingApiKey => Self::new(
                "SOLVER_NOT_CONFIGURED",
                "No solver API key configured; set REGISTRA_SOLVER_API_KEY",
            ),
            SolverError::Service { code, message } => Self::with_details(
                "SOLVER_ERROR",
                format!("Solver service error: {message}"),
                serde_json::json!({ "code": code }),
            ),
            other => Self::new("SOLVER_ERROR", format!("Solver error: {other}")),
        }
    }
}

impl From<BrowserError> for CommandError {
    fn from(err: BrowserError) -> Self {
        Self::new(
            "TRANSPORT_UNAVAILABLE",
            format!("Could not start transport: {err}"),
        )
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::new("IO_ERROR", err.to_string())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::new("INVALID_INPUT", format!("Invalid JSON input: {err}"))
    }
}
