//! Record shapes shared across all target portals.
//!
//! A [`RawRecord`] is whatever a portal's markup yields for one result row,
//! keyed by column header (or column index when the table has no header).
//! A [`CanonicalRecord`] carries the known key set for its category plus an
//! `extra` bag holding unmapped raw fields for traceability.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical field keys.
pub mod keys {
    /// Ticket / infraction number
    pub const NUMBER: &str = "number";
    /// Infraction date (`YYYY-MM-DD`)
    pub const DATE: &str = "date";
    /// Infraction description
    pub const DESCRIPTION: &str = "description";
    /// Amount owed, decimal with two places
    pub const AMOUNT: &str = "amount";
    /// Record status as reported by the portal
    pub const STATUS: &str = "status";
    /// Insurance company
    pub const INSURER: &str = "insurer";
    /// Insurance policy number
    pub const POLICY_NUMBER: &str = "policy_number";
    /// Start of validity window (`YYYY-MM-DD`)
    pub const VALID_FROM: &str = "valid_from";
    /// End of validity window (`YYYY-MM-DD`)
    pub const VALID_UNTIL: &str = "valid_until";
}

/// Category of record a portal returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordCategory {
    /// Vehicle infractions and traffic tickets
    Infraction,
    /// Mandatory insurance certificates
    InsuranceCertificate,
}

impl RecordCategory {
    /// Canonical keys for this category, in output order.
    #[must_use]
    pub fn canonical_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Infraction => &[
                keys::NUMBER,
                keys::DATE,
                keys::DESCRIPTION,
                keys::AMOUNT,
                keys::STATUS,
            ],
            Self::InsuranceCertificate => &[
                keys::INSURER,
                keys::POLICY_NUMBER,
                keys::VALID_FROM,
                keys::VALID_UNTIL,
                keys::STATUS,
            ],
        }
    }

    /// Whether `key` belongs to this category's canonical key set.
    #[must_use]
    pub fn is_canonical_key(&self, key: &str) -> bool {
        self.canonical_keys().contains(&key)
    }

    /// Get a human-readable display name.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Infraction => "Infraction",
            Self::InsuranceCertificate => "Insurance Certificate",
        }
    }
}

/// One result row as extracted from a portal response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Field values keyed by column header or index
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// True when every field is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }

    /// Number of non-blank fields.
    #[must_use]
    pub fn filled_len(&self) -> usize {
        self.fields.values().filter(|v| !v.trim().is_empty()).count()
    }
}

/// Normalized output record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Record category
    pub category: RecordCategory,
    /// Canonical fields
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    /// Raw fields that did not map to a canonical key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl CanonicalRecord {
    /// Create an empty record of the given category.
    #[must_use]
    pub fn new(category: RecordCategory) -> Self {
        Self {
            category,
            fields: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Look up a canonical field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Flatten back into a raw record (canonical fields and extras together).
    ///
    /// Feeding the result through the normalizer again yields this record.
    #[must_use]
    pub fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new();
        for (key, value) in self.extra.iter().chain(self.fields.iter()) {
            raw.fields.insert(key.clone(), value.clone());
        }
        raw
    }
}
