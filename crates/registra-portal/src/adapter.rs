//! Site adapter interface.
//!
//! An adapter is pure configuration plus a field-mapping function. The engine
//! asks it how a raw column label maps onto the canonical key set and whether a
//! scraped row is really a repeated header; it never drives control flow.

use crate::definition::{FieldMapping, PortalDefinition, ValueKind};
use registra_core::{RawRecord, RecordCategory};

/// A canonical key and the coercion applied to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTarget<'a> {
    /// Canonical key
    pub key: &'a str,
    /// Coercion
    pub kind: ValueKind,
}

/// Declarative per-target configuration consumed by the query engine.
pub trait SiteAdapter: Send + Sync {
    /// Full definition backing this adapter.
    fn definition(&self) -> &PortalDefinition;

    /// Record category produced.
    fn category(&self) -> RecordCategory {
        self.definition().category()
    }

    /// Field mapping table.
    fn field_map(&self) -> &[FieldMapping] {
        &self.definition().fields
    }

    /// Map a raw column key to its canonical key.
    ///
    /// Mapping sources match either the exact key (column indexes) or the
    /// label ignoring case, accents and punctuation. Keys that are already
    /// canonical map to themselves, so mapping an already normalized record
    /// is a no-op.
    fn map_field(&self, raw_key: &str) -> Option<FieldTarget<'_>> {
        let wanted = normalize_label(raw_key);
        if let Some(mapping) = self
            .field_map()
            .iter()
            .find(|m| m.source == raw_key || normalize_label(&m.source) == wanted)
        {
            return Some(FieldTarget {
                key: &mapping.target,
                kind: mapping.kind,
            });
        }

        let key = self
            .category()
            .canonical_keys()
            .iter()
            .copied()
            .find(|k| *k == raw_key)?;
        let kind = self
            .field_map()
            .iter()
            .find(|m| m.target == key)
            .map_or(ValueKind::Text, |m| m.kind);
        Some(FieldTarget { key, kind })
    }

    /// Whether a scraped row merely repeats the column headers.
    ///
    /// True when every populated cell is a known label: a mapping source, a
    /// canonical key, or the cell's own column name.
    fn is_header_echo(&self, record: &RawRecord) -> bool {
        let mut populated = record
            .fields
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .peekable();
        if populated.peek().is_none() {
            return false;
        }

        populated.all(|(column, value)| {
            let label = normalize_label(value);
            label == normalize_label(column)
                || self
                    .field_map()
                    .iter()
                    .any(|m| normalize_label(&m.source) == label)
                || self.category().is_canonical_key(value.trim())
        })
    }
}

impl SiteAdapter for PortalDefinition {
    fn definition(&self) -> &PortalDefinition {
        self
    }
}

/// Normalize a column label for loose matching.
///
/// Lower-cases, folds common Latin accents, and collapses any run of
/// non-alphanumeric characters to a single space.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_space = false;

    for c in label.chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c);
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }

    out
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}
