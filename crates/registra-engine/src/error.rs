//! Query error taxonomy.

use registra_core::{EngineConfig, SearchMode};
use registra_solver::SolverError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error category, surfaced in results and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No search form could be reached
    SessionUnavailable,
    /// The challenge could not be read or fetched
    ChallengeUnavailable,
    /// The portal rejected the captcha answer
    InvalidCaptcha,
    /// The solving service failed on its side
    SolverService,
    /// The solving service did not answer in time
    SolverTimeout,
    /// The portal refused service
    Blocked,
    /// A configured selector matched nothing
    SelectorMissing,
    /// The response no longer fits the site adapter
    SiteChanged,
    /// Slow or inconclusive response
    Transient,
    /// No portal with that id
    UnknownTarget,
    /// Bad search value, or a mode the portal does not support
    InvalidRequest,
    /// Engine misconfiguration
    Configuration,
    /// The request deadline passed
    DeadlineExceeded,
    /// Bug in the engine
    Internal,
}

/// What the retry coordinator may do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry with a new session, up to the attempt bound
    Retry,
    /// Retry at most this many times for this kind of error, then surface it
    RetryLimited(u32),
    /// Stop immediately
    Fatal,
}

/// Why an attempt or a query failed.
#[derive(Debug, Error)]
pub enum QueryError {
    /// See [`ErrorKind::SessionUnavailable`]
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// See [`ErrorKind::ChallengeUnavailable`]
    #[error("captcha challenge unavailable: {0}")]
    ChallengeUnavailable(String),

    /// Carries the portal's rejection text
    #[error("captcha rejected: {0}")]
    InvalidCaptcha(String),

    /// See [`ErrorKind::SolverService`]
    #[error("captcha solver service error: {0}")]
    SolverService(String),

    /// See [`ErrorKind::SolverTimeout`]
    #[error("captcha solver timed out after {seconds}s")]
    SolverTimeout {
        /// Solver deadline
        seconds: u64,
    },

    /// See [`ErrorKind::Blocked`]
    #[error("blocked by portal: {0}")]
    Blocked(String),

    /// See [`ErrorKind::SelectorMissing`]
    #[error("selector matched nothing: {0}")]
    SelectorMissing(String),

    /// See [`ErrorKind::SiteChanged`]
    #[error("portal layout changed: {0}")]
    SiteChanged(String),

    /// See [`ErrorKind::Transient`]
    #[error("transient portal error: {0}")]
    Transient(String),

    /// See [`ErrorKind::UnknownTarget`]
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// The portal has no search field for the mode
    #[error("target {target_id} does not support search mode '{mode}'")]
    UnsupportedMode {
        /// Portal queried
        target_id: String,
        /// Mode requested
        mode: SearchMode,
    },

    /// See [`ErrorKind::InvalidRequest`]
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// See [`ErrorKind::Configuration`]
    #[error("configuration error: {0}")]
    Configuration(String),

    /// See [`ErrorKind::DeadlineExceeded`]
    #[error("query did not finish within {seconds}s")]
    DeadlineExceeded {
        /// Request deadline
        seconds: u64,
    },

    /// See [`ErrorKind::Internal`]
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionUnavailable(_) => ErrorKind::SessionUnavailable,
            Self::ChallengeUnavailable(_) => ErrorKind::ChallengeUnavailable,
            Self::InvalidCaptcha(_) => ErrorKind::InvalidCaptcha,
            Self::SolverService(_) => ErrorKind::SolverService,
            Self::SolverTimeout { .. } => ErrorKind::SolverTimeout,
            Self::Blocked(_) => ErrorKind::Blocked,
            Self::SelectorMissing(_) => ErrorKind::SelectorMissing,
            Self::SiteChanged(_) => ErrorKind::SiteChanged,
            Self::Transient(_) => ErrorKind::Transient,
            Self::UnknownTarget(_) => ErrorKind::UnknownTarget,
            Self::UnsupportedMode { .. } | Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Retry policy for this error under `config`.
    #[must_use]
    pub fn retry_policy(&self, config: &EngineConfig) -> RetryPolicy {
        match self.kind() {
            ErrorKind::SessionUnavailable
            | ErrorKind::ChallengeUnavailable
            | ErrorKind::InvalidCaptcha
            | ErrorKind::SolverTimeout
            | ErrorKind::Transient => RetryPolicy::Retry,
            ErrorKind::SolverService => RetryPolicy::RetryLimited(config.solver_error_retries),
            ErrorKind::SelectorMissing | ErrorKind::SiteChanged => {
                RetryPolicy::RetryLimited(config.site_changed_retries)
            }
            ErrorKind::Blocked
            | ErrorKind::UnknownTarget
            | ErrorKind::InvalidRequest
            | ErrorKind::Configuration
            | ErrorKind::DeadlineExceeded
            | ErrorKind::Internal => RetryPolicy::Fatal,
        }
    }
}

impl From<SolverError> for QueryError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Unsolvable { code } => Self::InvalidCaptcha(format!("solver: {code}")),
            SolverError::Timeout { seconds } => Self::SolverTimeout { seconds },
            SolverError::MissingApiKey | SolverError::InvalidRequest(_) => {
                Self::Configuration(err.to_string())
            }
            SolverError::Service { .. }
            | SolverError::ApiError { .. }
            | SolverError::ParseError(_)
            | SolverError::Network(_) => Self::SolverService(err.to_string()),
        }
    }
}

impl From<registra_core::RegistraError> for QueryError {
    fn from(err: registra_core::RegistraError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, QueryError>;
