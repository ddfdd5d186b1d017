//! Shared types used across the Registra engine.
//!
//! This module defines the newtypes and enums that identify a target portal
//! and describe one logical query against it.

use crate::error::RegistraError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Newtype for target portal identifiers with validation.
///
/// Target IDs must be lowercase alphanumeric with hyphens, 3-50 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    /// Create a new `TargetId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID doesn't match the required format.
    pub fn new(id: impl Into<String>) -> Result<Self, RegistraError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate target ID format: lowercase alphanumeric with hyphens, 3-50 chars.
    fn validate(id: &str) -> Result<(), RegistraError> {
        static TARGET_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = TARGET_REGEX
            .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,48}[a-z0-9]$").expect("valid regex"));

        if id.len() < 3 || id.len() > 50 {
            return Err(RegistraError::Validation(format!(
                "invalid target ID: must be 3-50 characters, got {} characters",
                id.len()
            )));
        }

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(RegistraError::Validation(format!(
                "invalid target ID: must be lowercase alphanumeric with hyphens, got '{id}'"
            )))
        }
    }
}

impl TryFrom<String> for TargetId {
    type Error = RegistraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The key a portal is searched by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Vehicle license plate
    Plate,
    /// National ID or other identity document number
    Document,
    /// Person or company name
    Name,
    /// Infraction ticket number
    TicketNumber,
}

impl SearchMode {
    /// All modes, in declaration order.
    pub const ALL: [SearchMode; 4] = [
        SearchMode::Plate,
        SearchMode::Document,
        SearchMode::Name,
        SearchMode::TicketNumber,
    ];

    /// Stable identifier used in definition files and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plate => "plate",
            Self::Document => "document",
            Self::Name => "name",
            Self::TicketNumber => "ticket_number",
        }
    }

    /// Normalize a raw search value for this mode.
    ///
    /// Plates are upper-cased with spaces and hyphens removed, document and
    /// ticket numbers lose interior whitespace, names collapse to single spaces.
    ///
    /// # Errors
    /// Returns error if the value is empty after normalization.
    pub fn normalize_value(&self, raw: &str) -> Result<String, RegistraError> {
        let value = match self {
            Self::Plate => raw
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect::<String>()
                .to_uppercase(),
            Self::Document | Self::TicketNumber => {
                raw.chars().filter(|c| !c.is_whitespace()).collect()
            }
            Self::Name => raw.split_whitespace().collect::<Vec<_>>().join(" "),
        };

        if value.is_empty() {
            return Err(RegistraError::Validation(format!(
                "search value for mode '{}' cannot be empty",
                self.as_str()
            )));
        }

        Ok(value)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = RegistraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "plate" | "placa" => Ok(Self::Plate),
            "document" | "dni" => Ok(Self::Document),
            "name" => Ok(Self::Name),
            "ticket_number" | "ticket" => Ok(Self::TicketNumber),
            other => Err(RegistraError::Validation(format!(
                "unknown search mode '{other}'"
            ))),
        }
    }
}

/// Challenge-response widget families a solving service can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetKind {
    /// Google reCAPTCHA v2 checkbox / invisible
    RecaptchaV2,
    /// hCaptcha
    Hcaptcha,
    /// Cloudflare Turnstile
    Turnstile,
}

impl WidgetKind {
    /// Form field the widget writes its token into by default.
    #[must_use]
    pub fn default_response_field(&self) -> &'static str {
        match self {
            Self::RecaptchaV2 => "g-recaptcha-response",
            Self::Hcaptcha => "h-captcha-response",
            Self::Turnstile => "cf-turnstile-response",
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RecaptchaV2 => "recaptcha-v2",
            Self::Hcaptcha => "hcaptcha",
            Self::Turnstile => "turnstile",
        })
    }
}

/// One logical query against a target portal.
///
/// Immutable once built: every attempt made for this request sees the same
/// target, mode and (normalized) value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    target_id: TargetId,
    mode: SearchMode,
    value: String,
}

impl QueryRequest {
    /// Build a request, normalizing the search value for its mode.
    ///
    /// # Errors
    /// Returns error if the value is empty after normalization.
    pub fn new(
        target_id: TargetId,
        mode: SearchMode,
        value: impl AsRef<str>,
    ) -> Result<Self, RegistraError> {
        let value = mode.normalize_value(value.as_ref())?;
        Ok(Self {
            target_id,
            mode,
            value,
        })
    }

    /// Target portal.
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// Search mode.
    #[must_use]
    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Normalized search value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Search value safe for logs.
    #[must_use]
    pub fn masked_value(&self) -> String {
        mask_value(&self.value)
    }
}

/// Mask a search value for logging, keeping the first and last two characters.
#[must_use]
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id_valid() {
        let id = TargetId::new("sat-lima").expect("valid target ID");
        assert_eq!(id.as_str(), "sat-lima");
        assert_eq!(id.to_string(), "sat-lima");
    }

    #[test]
    fn test_target_id_invalid() {
        assert!(TargetId::new("ab").is_err());
        assert!(TargetId::new("Sat-Lima").is_err());
        assert!(TargetId::new("-sat").is_err());
        assert!(TargetId::new("sat lima").is_err());
        assert!(TargetId::new("a".repeat(51)).is_err());
    }

    #[test]
    fn test_target_id_serde_validates() {
        let ok: TargetId = serde_json::from_str("\"apeseg-soat\"").expect("deserialize id");
        assert_eq!(ok.as_str(), "apeseg-soat");
        assert!(serde_json::from_str::<TargetId>("\"NOT VALID\"").is_err());
    }

    #[test]
    fn test_search_mode_parse() {
        assert_eq!("plate".parse::<SearchMode>().unwrap(), SearchMode::Plate);
        assert_eq!(
            "ticket-number".parse::<SearchMode>().unwrap(),
            SearchMode::TicketNumber
        );
        assert_eq!("DNI".parse::<SearchMode>().unwrap(), SearchMode::Document);
        assert!("vin".parse::<SearchMode>().is_err());
    }

    #[test]
    fn test_normalize_plate() {
        assert_eq!(
            SearchMode::Plate.normalize_value(" abc-123 ").unwrap(),
            "ABC123"
        );
    }

    #[test]
    fn test_normalize_name_and_document() {
        assert_eq!(
            SearchMode::Name.normalize_value("  Juan   Perez ").unwrap(),
            "Juan Perez"
        );
        assert_eq!(
            SearchMode::Document.normalize_value("4567 8912").unwrap(),
            "45678912"
        );
    }

    #[test]
    fn test_empty_value_rejected() {
        assert!(SearchMode::Plate.normalize_value(" - ").is_err());
        let target = TargetId::new("sat-lima").unwrap();
        assert!(QueryRequest::new(target, SearchMode::Name, "   ").is_err());
    }

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("ABC123"), "AB***23");
        assert_eq!(mask_value("AB1"), "***");
    }
}
