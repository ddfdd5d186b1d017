//! Portal definition types and structures.
//!
//! A portal definition is the declarative site adapter for one target: where
//! the search form lives, what challenge it shows, which fields to post, how
//! to recognise results and "no data" answers, and how raw columns map to
//! canonical record keys. It carries no control flow.

use crate::error::{PortalError, Result};
use chrono::NaiveDate;
use regex::Regex;
use registra_core::{RecordCategory, SearchMode, TargetId, WidgetKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete portal definition loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalDefinition {
    /// Core portal metadata
    pub portal: PortalMetadata,

    /// How to establish a session and locate the search form
    pub session: SessionSpec,

    /// CAPTCHA challenge shown with the form
    #[serde(default)]
    pub challenge: ChallengeSpec,

    /// How to build the search submission
    pub search: SearchSpec,

    /// How to find result rows in the response
    pub results: ResultSelectors,

    /// Phrases that classify a response
    #[serde(default)]
    pub markers: Markers,

    /// Raw column to canonical key mapping
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl PortalDefinition {
    /// Get the target ID.
    #[must_use]
    pub fn id(&self) -> &TargetId {
        &self.portal.id
    }

    /// Get the portal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.portal.name
    }

    /// Get the record category this portal returns.
    #[must_use]
    pub fn category(&self) -> RecordCategory {
        self.portal.category
    }

    /// Form field the search value goes into for `mode`, if supported.
    #[must_use]
    pub fn search_field(&self, mode: SearchMode) -> Option<&str> {
        self.search.modes.get(&mode).map(String::as_str)
    }

    /// Search modes this portal supports.
    #[must_use]
    pub fn supported_modes(&self) -> Vec<SearchMode> {
        self.search.modes.keys().copied().collect()
    }

    /// Validate the portal definition for completeness and correctness.
    pub fn validate(&self) -> Result<()> {
        let id = &self.portal.id;

        if self.portal.name.is_empty() {
            return Err(invalid(id, "portal name cannot be empty"));
        }

        if self.portal.url.is_empty() {
            return Err(invalid(id, "portal URL cannot be empty"));
        }

        self.session.validate(id)?;
        self.challenge.validate(id)?;
        self.search.validate(id)?;
        self.results.validate(id)?;

        if self.fields.is_empty() {
            return Err(invalid(id, "at least one field mapping is required"));
        }

        for mapping in &self.fields {
            if mapping.source.trim().is_empty() {
                return Err(invalid(id, "field mapping source cannot be empty"));
            }
            if !self.portal.category.is_canonical_key(&mapping.target) {
                return Err(invalid(
                    id,
                    &format!(
                        "field target '{}' is not a canonical key for {}",
                        mapping.target,
                        self.portal.category.display_name()
                    ),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(id: &TargetId, reason: &str) -> PortalError {
    PortalError::ValidationError {
        target_id: id.to_string(),
        reason: reason.to_string(),
    }
}

/// Core portal metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalMetadata {
    /// Unique target identifier (e.g., "sat-lima-papeletas")
    pub id: TargetId,

    /// Human-readable portal name
    pub name: String,

    /// Portal website URL
    pub url: String,

    /// Portal domain
    pub domain: String,

    /// Record category
    pub category: RecordCategory,

    /// Date when this definition was last verified against the live site
    pub last_verified: NaiveDate,
}

/// Session establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Page fetched to obtain cookies and anti-forgery fields
    pub entry_url: String,

    /// Selector of the form holding the search fields
    pub form_selector: String,

    /// Selector of the frame to follow when the form is served inside one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_selector: Option<String>,

    /// Hidden fields to echo back; empty means every hidden input in the form
    #[serde(default)]
    pub anti_forgery_fields: Vec<String>,
}

impl SessionSpec {
    fn validate(&self, id: &TargetId) -> Result<()> {
        if self.entry_url.is_empty() {
            return Err(invalid(id, "session.entry_url cannot be empty"));
        }
        check_selector(id, "session.form_selector", &self.form_selector)?;
        if let Some(frame) = &self.frame_selector {
            check_selector(id, "session.frame_selector", frame)?;
        }
        Ok(())
    }
}

/// CAPTCHA challenge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChallengeSpec {
    /// No challenge
    #[default]
    None,

    /// Static image code typed into a form field
    Image {
        /// Selector of the `<img>` holding the code
        image_selector: String,
        /// Form field the answer is written to
        input_field: String,
        /// Image only shown conditionally; absence is not an error
        #[serde(default)]
        optional: bool,
        /// Code is digits only
        #[serde(default)]
        numeric_only: bool,
        /// Minimum code length hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u8>,
        /// Maximum code length hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u8>,
        /// Code is case sensitive
        #[serde(default)]
        case_sensitive: bool,
    },

    /// Challenge-response widget solved remotely by site key
    Widget {
        /// Widget family
        widget: WidgetKind,
        /// Fixed site key; read from the page when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        site_key: Option<String>,
        /// Selector of the element carrying `data-sitekey`
        #[serde(default = "default_site_key_selector")]
        site_key_selector: String,
        /// Form field the token is injected into; widget default when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_field: Option<String>,
        /// Widget only shown conditionally; absence is not an error
        #[serde(default)]
        optional: bool,
    },
}

fn default_site_key_selector() -> String {
    "[data-sitekey]".to_string()
}

impl ChallengeSpec {
    /// Whether the portal may omit the challenge.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        match self {
            Self::None => true,
            Self::Image { optional, .. } | Self::Widget { optional, .. } => *optional,
        }
    }

    fn validate(&self, id: &TargetId) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Image {
                image_selector,
                input_field,
                min_length,
                max_length,
                ..
            } => {
                check_selector(id, "challenge.image_selector", image_selector)?;
                if input_field.is_empty() {
                    return Err(invalid(id, "challenge.input_field cannot be empty"));
                }
                if let (Some(min), Some(max)) = (min_length, max_length) {
                    if min > max {
                        return Err(invalid(
                            id,
                            &format!("challenge.min_length {min} exceeds max_length {max}"),
                        ));
                    }
                }
                Ok(())
            }
            Self::Widget {
                site_key,
                site_key_selector,
                ..
            } => {
                if site_key.as_deref().is_some_and(str::is_empty) {
                    return Err(invalid(id, "challenge.site_key cannot be empty"));
                }
                check_selector(id, "challenge.site_key_selector", site_key_selector)
            }
        }
    }
}

/// Submit button echoed with the form (WebForms postbacks need it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitField {
    /// Button name
    pub name: String,
    /// Button value
    #[serde(default)]
    pub value: String,
}

/// How results are exposed after submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResultView {
    /// The submission response is the result document
    #[default]
    Direct,

    /// Results open in a secondary view that must be fetched after submitting
    Secondary {
        /// Selector of a link/frame in the submission response pointing to the view
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_selector: Option<String>,
        /// Fixed view URL, used when no link is present
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

/// Form method used for the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchHttpMethod {
    /// GET with query string
    Get,
    /// POST url-encoded
    #[default]
    Post,
}

/// Search submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpec {
    /// Form field receiving the search value, per supported mode
    pub modes: BTreeMap<SearchMode, String>,

    /// Form action override; the form's own action is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Form method
    #[serde(default)]
    pub method: SearchHttpMethod,

    /// Extra fields always sent
    #[serde(default)]
    pub fixed_fields: BTreeMap<String, String>,

    /// Fields sent only for a given mode (e.g. a search-type radio button)
    #[serde(default)]
    pub mode_fields: BTreeMap<SearchMode, BTreeMap<String, String>>,

    /// Submit button name/value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_field: Option<SubmitField>,

    /// Where results appear
    #[serde(default)]
    pub result_view: ResultView,
}

impl SearchSpec {
    fn validate(&self, id: &TargetId) -> Result<()> {
        if self.modes.is_empty() {
            return Err(invalid(id, "search.modes must name at least one mode"));
        }
        if self.modes.values().any(String::is_empty) {
            return Err(invalid(id, "search.modes field names cannot be empty"));
        }
        if let ResultView::Secondary { link_selector, url } = &self.result_view {
            match (link_selector, url) {
                (None, None) => {
                    return Err(invalid(
                        id,
                        "secondary result view needs link_selector or url",
                    ))
                }
                (Some(selector), _) => {
                    check_selector(id, "search.result_view.link_selector", selector)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Selectors and patterns locating result rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSelectors {
    /// Result tables, tried in order
    #[serde(default)]
    pub table_selectors: Vec<String>,

    /// Row selector within a table
    #[serde(default = "default_row_selector")]
    pub row_selector: String,

    /// Minimum populated cells for a row to count as data
    #[serde(default = "default_min_cells")]
    pub min_cells: usize,

    /// Regexes that mark a cell as a column header label
    #[serde(default)]
    pub header_patterns: Vec<String>,

    /// JSON pointer to the record array when the portal answers with JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
}

fn default_row_selector() -> String {
    "tr".to_string()
}

fn default_min_cells() -> usize {
    2
}

impl ResultSelectors {
    /// Compile header patterns.
    pub fn compiled_header_patterns(&self) -> Result<Vec<Regex>> {
        self.header_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| PortalError::ValidationError {
                    target_id: String::new(),
                    reason: format!("invalid header pattern '{p}': {e}"),
                })
            })
            .collect()
    }

    fn validate(&self, id: &TargetId) -> Result<()> {
        if self.table_selectors.is_empty() && self.json_pointer.is_none() {
            return Err(invalid(
                id,
                "results need table_selectors or json_pointer",
            ));
        }
        for selector in &self.table_selectors {
            check_selector(id, "results.table_selectors", selector)?;
        }
        check_selector(id, "results.row_selector", &self.row_selector)?;
        if self.min_cells == 0 {
            return Err(invalid(id, "results.min_cells must be at least 1"));
        }
        if let Some(pointer) = &self.json_pointer {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(invalid(id, "results.json_pointer must start with '/'"));
            }
        }
        for pattern in &self.header_patterns {
            if let Err(e) = Regex::new(pattern) {
                return Err(invalid(
                    id,
                    &format!("invalid header pattern '{pattern}': {e}"),
                ));
            }
        }
        Ok(())
    }
}

/// Phrases that classify a portal response. Matching is case-insensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Markers {
    /// "Zero results" / "not found" phrases
    #[serde(default)]
    pub no_data: Vec<String>,

    /// CAPTCHA rejection phrases
    #[serde(default)]
    pub invalid_captcha: Vec<String>,

    /// Portal-specific anti-bot / block phrases, in addition to the built-in set
    #[serde(default)]
    pub blocked: Vec<String>,
}

/// How a mapped value is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Whitespace-collapsed text
    #[default]
    Text,
    /// Date, coerced to `YYYY-MM-DD`
    Date,
    /// Monetary amount, coerced to a plain decimal with two places
    Amount,
}

/// One raw column to canonical key mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Raw column header (matched loosely) or zero-based column index
    pub source: String,
    /// Canonical key
    pub target: String,
    /// Coercion
    #[serde(default)]
    pub kind: ValueKind,
}

fn check_selector(id: &TargetId, field: &str, selector: &str) -> Result<()> {
    if selector.trim().is_empty() {
        return Err(invalid(id, &format!("{field} cannot be empty")));
    }
    scraper::Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| invalid(id, &format!("{field} '{selector}' is not a valid selector: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_definition(id: &str) -> PortalDefinition {
        let mut modes = BTreeMap::new();
        modes.insert(SearchMode::Plate, "txtPlaca".to_string());

        PortalDefinition {
            portal: PortalMetadata {
                id: TargetId::new(id).expect("valid target ID"),
                name: format!("Test {id}"),
                url: "https://portal.example".to_string(),
                domain: "portal.example".to_string(),
                category: RecordCategory::Infraction,
                last_verified: NaiveDate::from_ymd_opt(2026, 9, 1).expect("valid date"),
            },
            session: SessionSpec {
                entry_url: "https://portal.example/Busqueda.aspx".to_string(),
                form_selector: "form#aspnetForm".to_string(),
                frame_selector: None,
                anti_forgery_fields: vec![],
            },
            challenge: ChallengeSpec::Image {
                image_selector: "img#imgCaptcha".to_string(),
                input_field: "txtCaptcha".to_string(),
                optional: false,
                numeric_only: false,
                min_length: Some(4),
                max_length: Some(6),
                case_sensitive: false,
            },
            search: SearchSpec {
                modes,
                action: None,
                method: SearchHttpMethod::Post,
                fixed_fields: BTreeMap::new(),
                mode_fields: BTreeMap::new(),
                submit_field: Some(SubmitField {
                    name: "btnBuscar".to_string(),
                    value: "Buscar".to_string(),
                }),
                result_view: ResultView::Direct,
            },
            results: ResultSelectors {
                table_selectors: vec!["table#grdResultados".to_string()],
                row_selector: "tr".to_string(),
                min_cells: 2,
                header_patterns: vec![],
                json_pointer: None,
            },
            markers: Markers {
                no_data: vec!["Se encontraron 0 coincidencias".to_string()],
                invalid_captcha: vec!["código de seguridad incorrecto".to_string()],
                blocked: vec![],
            },
            fields: vec![
                FieldMapping {
                    source: "Papeleta".to_string(),
                    target: "number".to_string(),
                    kind: ValueKind::Text,
                },
                FieldMapping {
                    source: "Fecha".to_string(),
                    target: "date".to_string(),
                    kind: ValueKind::Date,
                },
                FieldMapping {
                    source: "Monto".to_string(),
                    target: "amount".to_string(),
                    kind: ValueKind::Amount,
                },
            ],
        }
    }

    #[test]
    fn test_valid_definition() {
        let definition = sample_definition("test-portal");
        assert!(definition.validate().is_ok());
        assert_eq!(definition.search_field(SearchMode::Plate), Some("txtPlaca"));
        assert_eq!(definition.search_field(SearchMode::Name), None);
        assert_eq!(definition.supported_modes(), vec![SearchMode::Plate]);
    }

    #[test]
    fn test_rejects_non_canonical_target() {
        let mut definition = sample_definition("test-portal");
        definition.fields[0].target = "insurer".to_string();
        let err = definition.validate().unwrap_err();
        assert!(err.to_string().contains("insurer"));
    }

    #[test]
    fn test_rejects_bad_selector() {
        let mut definition = sample_definition("test-portal");
        definition.results.table_selectors = vec!["table[[".to_string()];
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_modes() {
        let mut definition = sample_definition("test-portal");
        definition.search.modes.clear();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_secondary_view_needs_location() {
        let mut definition = sample_definition("test-portal");
        definition.search.result_view = ResultView::Secondary {
            link_selector: None,
            url: None,
        };
        assert!(definition.validate().is_err());

        definition.search.result_view = ResultView::Secondary {
            link_selector: Some("a#lnkDetalle".to_string()),
            url: None,
        };
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_image_length_hints_ordered() {
        let mut definition = sample_definition("test-portal");
        definition.challenge = ChallengeSpec::Image {
            image_selector: "img".to_string(),
            input_field: "txtCaptcha".to_string(),
            optional: false,
            numeric_only: true,
            min_length: Some(6),
            max_length: Some(4),
            case_sensitive: false,
        };
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_invalid_header_pattern() {
        let mut definition = sample_definition("test-portal");
        definition.results.header_patterns = vec!["(?i)^placa(".to_string()];
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_widget_defaults_from_toml() {
        let spec: ChallengeSpec = toml::from_str(
            r#"
kind = "widget"
widget = "recaptcha-v2"
"#,
        )
        .expect("parse widget spec");

        match spec {
            ChallengeSpec::Widget {
                widget,
                site_key,
                site_key_selector,
                response_field,
                optional,
            } => {
                assert_eq!(widget, WidgetKind::RecaptchaV2);
                assert!(site_key.is_none());
                assert_eq!(site_key_selector, "[data-sitekey]");
                assert!(response_field.is_none());
                assert!(!optional);
                assert_eq!(widget.default_response_field(), "g-recaptcha-response");
            }
            other => panic!("expected widget spec, got {other:?}"),
        }
    }
}
