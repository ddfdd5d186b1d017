//! Portal listing.

use crate::state::AppState;
use clap::ValueEnum;
use registra_core::{RecordCategory, SearchMode};
use registra_portal::{ChallengeSpec, PortalDefinition};
use serde::Serialize;

/// Record category as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    Infraction,
    InsuranceCertificate,
}

impl From<CategoryArg> for RecordCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Infraction => Self::Infraction,
            CategoryArg::InsuranceCertificate => Self::InsuranceCertificate,
        }
    }
}

/// Stable label used in command output.
pub fn category_label(category: RecordCategory) -> &'static str {
    match category {
        RecordCategory::Infraction => "infraction",
        RecordCategory::InsuranceCertificate => "insurance-certificate",
    }
}

/// Summary information about a portal.
#[derive(Debug, Clone, Serialize)]
pub struct PortalSummary {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub url: String,
    pub category: &'static str,
    pub modes: Vec<SearchMode>,
    pub challenge: String,
    pub last_verified: String,
}

impl From<&PortalDefinition> for PortalSummary {
    fn from(def: &PortalDefinition) -> Self {
        let challenge = match &def.challenge {
            ChallengeSpec::None => "none".to_string(),
            ChallengeSpec::Image { .. } => "image".to_string(),
            ChallengeSpec::Widget { widget, .. } => format!("widget:{widget}"),
        };
        PortalSummary {
            id: def.id().to_string(),
            name: def.name().to_string(),
            domain: def.portal.domain.clone(),
            url: def.portal.url.clone(),
            category: category_label(def.category()),
            modes: def.supported_modes(),
            challenge,
            last_verified: def.portal.last_verified.to_string(),
        }
    }
}

/// List portal definitions, optionally restricted to one category.
pub fn list_portals(state: &AppState, category: Option<RecordCategory>) -> Vec<PortalSummary> {
    let definitions = match category {
        Some(category) => state.registry.get_by_category(category),
        None => state.registry.get_all(),
    };
    let mut summaries: Vec<PortalSummary> = definitions.iter().map(PortalSummary::from).collect();
    summaries.sort_by(|a, b| a.id.cmp(&b.id));
    summaries
}
