//! Error types for the captcha solving subsystem.

use thiserror::Error;

/// Errors that can occur while solving a challenge.
#[derive(Error, Debug)]
pub enum SolverError {
    /// The service could not solve this challenge (or the job expired).
    /// A fresh challenge may succeed.
    #[error("challenge unsolvable ({code})")]
    Unsolvable {
        /// Service failure code
        code: String,
    },

    /// Account, key or service-side failure. Retrying with a new challenge
    /// will not help.
    #[error("solver service error ({code}): {message}")]
    Service {
        /// Service failure code
        code: String,
        /// Human-readable description
        message: String,
    },

    /// No answer before the deadline
    #[error("solver did not answer within {seconds}s")]
    Timeout {
        /// Deadline in seconds
        seconds: u64,
    },

    /// HTTP error status from the service
    #[error("solver API error: status {status}, {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Response parsing error
    #[error("failed to parse solver response: {0}")]
    ParseError(String),

    /// No API key configured
    #[error("solver API key is not configured (set REGISTRA_SOLVER_API_KEY)")]
    MissingApiKey,

    /// Request validation error
    #[error("invalid solver request: {0}")]
    InvalidRequest(String),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl SolverError {
    /// Whether a new challenge could be solved where this one failed.
    #[must_use]
    pub fn is_unsolvable(&self) -> bool {
        matches!(self, Self::Unsolvable { .. })
    }

    /// Whether the failure was in reaching the service rather than a
    /// verdict from it. A queued job survives these.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::ApiError { .. } | Self::ParseError(_)
        )
    }
}

/// Result type alias for solver operations.
pub type Result<T> = std::result::Result<T, SolverError>;

/// Failure codes meaning "this challenge", not "this account".
const UNSOLVABLE_CODES: &[&str] = &[
    "ERROR_CAPTCHA_UNSOLVABLE",
    "ERROR_BAD_DUPLICATES",
    "ERROR_TOKEN_EXPIRED",
    "ERROR_WRONG_CAPTCHA_ID",
    "ERROR_ZERO_CAPTCHA_FILESIZE",
    "ERROR_TOO_BIG_CAPTCHA_FILESIZE",
    "ERROR_IMAGE_TYPE_NOT_SUPPORTED",
];

/// Map a service failure code onto the error taxonomy.
#[must_use]
pub fn classify_failure_code(code: &str) -> SolverError {
    let code = code.trim();
    if UNSOLVABLE_CODES.contains(&code) {
        return SolverError::Unsolvable {
            code: code.to_string(),
        };
    }

    let message = match code {
        "ERROR_WRONG_USER_KEY" | "ERROR_KEY_DOES_NOT_EXIST" => "API key rejected",
        "ERROR_ZERO_BALANCE" => "account balance is empty",
        "ERROR_NO_SLOT_AVAILABLE" | "MAX_USER_TURN" => "service is overloaded",
        "IP_BANNED" | "ERROR_IP_NOT_ALLOWED" | "ERROR_IP_BANNED" => "client IP refused",
        "ERROR_GOOGLEKEY" | "ERROR_SITEKEY" | "ERROR_PAGEURL" => "widget parameters rejected",
        _ => "unexpected failure code",
    };

    SolverError::Service {
        code: code.to_string(),
        message: message.to_string(),
    }
}
