//! Challenge artifacts, solve constraints and solutions.

use registra_core::WidgetKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What gets sent to the solving service.
#[derive(Clone, PartialEq, Eq)]
pub enum ChallengeArtifact {
    /// Image code, as raw bytes
    Image {
        /// Encoded image
        bytes: Vec<u8>,
        /// MIME type (e.g. `image/png`)
        mime: String,
    },

    /// Widget challenge; the service solves it from the site key and page URL
    Widget {
        /// Widget family
        kind: WidgetKind,
        /// Public site key
        site_key: String,
        /// Page the widget is embedded in
        page_url: String,
    },
}

impl ChallengeArtifact {
    /// Whether this is an image code.
    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }

    /// Short label for logs.
    #[must_use]
    pub fn kind_label(&self) -> String {
        match self {
            Self::Image { .. } => "image".to_string(),
            Self::Widget { kind, .. } => kind.to_string(),
        }
    }
}

impl fmt::Debug for ChallengeArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image { bytes, mime } => f
                .debug_struct("Image")
                .field("len", &bytes.len())
                .field("mime", mime)
                .finish(),
            Self::Widget {
                kind,
                site_key,
                page_url,
            } => f
                .debug_struct("Widget")
                .field("kind", kind)
                .field("site_key", site_key)
                .field("page_url", page_url)
                .finish(),
        }
    }
}

/// Hints for short image codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveConstraints {
    /// Digits only
    pub numeric_only: bool,
    /// Minimum length
    pub min_length: Option<u8>,
    /// Maximum length
    pub max_length: Option<u8>,
    /// Case sensitive
    pub case_sensitive: bool,
}

/// Opaque job identifier assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Wrap a service-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One poll of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Not solved yet
    Pending,
    /// Answer text or widget token
    Ready(String),
    /// Terminal failure code
    Failed(String),
}

/// A solved challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSolution {
    /// Answer text or widget token
    pub answer: String,
    /// Time from submission to answer
    pub solve_latency_ms: u64,
    /// Job that produced the answer, kept for bad-answer reports
    pub job_id: JobId,
}
