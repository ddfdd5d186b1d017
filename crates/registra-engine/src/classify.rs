//! Response classification.
//!
//! Rules are applied in priority order: block signals, captcha rejection,
//! server errors, then extracted rows. A "no data" phrase only yields
//! [`Outcome::Empty`] when no well-formed row was extracted, so a results
//! page that happens to include the phrase in a footer is still a success.

use crate::extract::{collapse_whitespace, extract};
use registra_browser::Document;
use registra_core::RawRecord;
use registra_portal::SiteAdapter;
use scraper::Html;
use serde::{Deserialize, Serialize};

/// Anti-bot interstitials recognised on every portal.
const BLOCK_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "Attention Required! | Cloudflare",
    "Incapsula incident ID",
    "_Incapsula_Resource",
    "The requested URL was rejected",
    "Request unsuccessful. Incapsula",
];

const MAX_MESSAGE_CHARS: usize = 300;

/// Classification of one portal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// At least one well-formed row
    Success(Vec<RawRecord>),
    /// The portal said there is nothing on record
    Empty {
        /// The portal's own phrase
        message: String,
    },
    /// The captcha answer was rejected
    InvalidCaptcha {
        /// The portal's rejection text
        message: String,
    },
    /// Anti-bot page, block phrase or a 403/429 status
    Blocked {
        /// What gave the block away
        reason: String,
    },
    /// Nothing conclusive yet
    TransientError {
        /// Why the response was inconclusive
        reason: String,
        /// A results container was present but no row could be read
        suspect_site_change: bool,
    },
}

impl Outcome {
    /// Short label for logs and attempt records.
    #[must_use]
    pub fn label(&self) -> OutcomeLabel {
        match self {
            Self::Success(_) => OutcomeLabel::Success,
            Self::Empty { .. } => OutcomeLabel::Empty,
            Self::InvalidCaptcha { .. } => OutcomeLabel::InvalidCaptcha,
            Self::Blocked { .. } => OutcomeLabel::Blocked,
            Self::TransientError { .. } => OutcomeLabel::TransientError,
        }
    }
}

/// Outcome without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    /// [`Outcome::Success`]
    Success,
    /// [`Outcome::Empty`]
    Empty,
    /// [`Outcome::InvalidCaptcha`]
    InvalidCaptcha,
    /// [`Outcome::Blocked`]
    Blocked,
    /// [`Outcome::TransientError`]
    TransientError,
}

impl std::fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::InvalidCaptcha => "invalid_captcha",
            Self::Blocked => "blocked",
            Self::TransientError => "transient_error",
        };
        f.write_str(label)
    }
}

/// Classify a submission response.
pub fn classify(document: &Document, adapter: &dyn SiteAdapter) -> Outcome {
    let definition = adapter.definition();

    if let Some(reason) = detect_block(document, &definition.markers.blocked) {
        return Outcome::Blocked { reason };
    }

    let text = VisibleText::of(document);

    if let Some(message) = text.find(&definition.markers.invalid_captcha) {
        return Outcome::InvalidCaptcha { message };
    }

    if document.status >= 500 {
        return Outcome::TransientError {
            reason: format!("portal returned HTTP {}", document.status),
            suspect_site_change: false,
        };
    }

    let extraction = extract(document, definition);
    if !extraction.rows.is_empty() {
        return Outcome::Success(extraction.rows);
    }

    if let Some(message) = text.find(&definition.markers.no_data) {
        return Outcome::Empty { message };
    }

    if extraction.container_found {
        Outcome::TransientError {
            reason: "results container present but no rows could be read".to_string(),
            suspect_site_change: true,
        }
    } else {
        Outcome::TransientError {
            reason: "no results or no-data marker in response".to_string(),
            suspect_site_change: false,
        }
    }
}

/// Block signal in `document`, if any: a 403/429 status, a built-in anti-bot
/// marker, or one of the portal's own block phrases.
pub fn detect_block(document: &Document, portal_markers: &[String]) -> Option<String> {
    if matches!(document.status, 403 | 429) {
        return Some(format!("HTTP {}", document.status));
    }

    let body = document.body.to_lowercase();
    if let Some(marker) = BLOCK_MARKERS
        .iter()
        .find(|m| body.contains(&m.to_lowercase()))
    {
        return Some(format!("anti-bot page ({marker})"));
    }

    if portal_markers.is_empty() {
        return None;
    }
    VisibleText::of(document).find(portal_markers)
}

/// Text content of a response, split by text node.
struct VisibleText {
    nodes: Vec<String>,
    joined: String,
}

impl VisibleText {
    fn of(document: &Document) -> Self {
        let nodes: Vec<String> = if document.is_json() {
            vec![collapse_whitespace(&document.body)]
        } else {
            Html::parse_document(&document.body)
                .root_element()
                .text()
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty())
                .collect()
        };
        let joined = nodes.join(" ");
        Self { nodes, joined }
    }

    /// First phrase found, echoed with the surrounding text node.
    fn find(&self, phrases: &[String]) -> Option<String> {
        let joined = self.joined.to_lowercase();
        for phrase in phrases {
            let needle = collapse_whitespace(phrase).to_lowercase();
            if needle.is_empty() || !joined.contains(&needle) {
                continue;
            }
            let echo = self
                .nodes
                .iter()
                .find(|node| node.to_lowercase().contains(&needle))
                .map_or_else(|| phrase.trim().to_string(), Clone::clone);
            return Some(truncate(&echo, MAX_MESSAGE_CHARS));
        }
        None
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max).collect();
        cut.push('…');
        cut
    }
}
