use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("operation not supported by this transport: {0}")]
    Unsupported(String),

    #[error("page already closed")]
    Closed,
}

impl BrowserError {
    /// Whether the failure came from a timer rather than the remote side.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}
