//! Result normalizer.
//!
//! Maps raw rows onto the canonical key set through the site adapter and
//! coerces dates to `YYYY-MM-DD` and amounts to a plain two-decimal number.
//! Normalizing an already canonical record (via [`CanonicalRecord::to_raw`])
//! returns it unchanged.

use crate::extract::collapse_whitespace;
use chrono::{Datelike, NaiveDate};
use registra_core::{CanonicalRecord, RawRecord};
use registra_portal::{SiteAdapter, ValueKind};
use tracing::debug;

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];
const SHORT_DATE_FORMATS: &[&str] = &["%d/%m/%y", "%d-%m-%y"];
const CURRENCY_TOKENS: &[&str] = &["US$", "S/.", "S/", "PEN", "USD", "$"];

/// Normalize extracted rows. Header echoes and rows with no mapped field are
/// dropped.
pub fn normalize(rows: &[RawRecord], adapter: &dyn SiteAdapter) -> Vec<CanonicalRecord> {
    let category = adapter.category();
    let mut records = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        if adapter.is_header_echo(row) {
            debug!(row = index, "dropping repeated header row");
            continue;
        }

        let mut record = CanonicalRecord::new(category);
        // Canonical keys first so a value already normalized wins over a
        // raw column that maps onto the same key.
        let (canonical, raw): (Vec<_>, Vec<_>) = row
            .fields
            .iter()
            .partition(|(key, _)| category.is_canonical_key(key));

        for (key, value) in canonical.into_iter().chain(raw) {
            let value = collapse_whitespace(value);
            if value.is_empty() {
                continue;
            }
            match adapter.map_field(key) {
                Some(target) if !record.fields.contains_key(target.key) => {
                    record
                        .fields
                        .insert(target.key.to_string(), coerce(&value, target.kind));
                }
                _ => {
                    record.extra.insert(key.clone(), value);
                }
            }
        }

        if record.fields.is_empty() {
            debug!(row = index, "dropping row with no mapped field");
            continue;
        }
        records.push(record);
    }

    records
}

fn coerce(value: &str, kind: ValueKind) -> String {
    match kind {
        ValueKind::Text => value.to_string(),
        ValueKind::Date => normalize_date(value).unwrap_or_else(|| value.to_string()),
        ValueKind::Amount => normalize_amount(value).unwrap_or_else(|| value.to_string()),
    }
}

/// `YYYY-MM-DD`, ignoring any trailing time.
fn normalize_date(value: &str) -> Option<String> {
    let head = value
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()
        .unwrap_or(value);

    let parse = |formats: &[&str]| {
        formats
            .iter()
            .filter_map(|f| NaiveDate::parse_from_str(head, f).ok())
            .find(|d| d.year() >= 1900)
    };

    parse(DATE_FORMATS)
        .or_else(|| parse(SHORT_DATE_FORMATS))
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Two-decimal amount with `.` as decimal separator and no grouping.
fn normalize_amount(value: &str) -> Option<String> {
    let mut stripped = value.to_uppercase();
    for token in CURRENCY_TOKENS {
        stripped = stripped.replace(token, "");
    }
    let cleaned: String = stripped
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let plain = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (decimal, grouping) = if dot > comma { ('.', ',') } else { (',', '.') };
            cleaned.replace(grouping, "").replace(decimal, ".")
        }
        (Some(_), None) => single_separator(&cleaned, '.'),
        (None, Some(_)) => single_separator(&cleaned, ','),
        (None, None) => cleaned,
    };

    round_to_cents(&plain)
}

/// Round a plain decimal (`-?digits[.digits]`) to two places, half away
/// from zero, on the digit string itself.
fn round_to_cents(plain: &str) -> Option<String> {
    let (negative, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, plain),
    };
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    if !integer.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut digits: Vec<u8> = integer
        .bytes()
        .chain(fraction.bytes().chain(std::iter::repeat(b'0')).take(2))
        .map(|b| b - b'0')
        .collect();
    if fraction.as_bytes().get(2).is_some_and(|d| *d >= b'5') {
        let mut i = digits.len();
        loop {
            if i == 0 {
                digits.insert(0, 1);
                break;
            }
            i -= 1;
            if digits[i] == 9 {
                digits[i] = 0;
            } else {
                digits[i] += 1;
                break;
            }
        }
    }

    let to_text = |ds: &[u8]| ds.iter().map(|d| char::from(b'0' + d)).collect::<String>();
    let (whole, cents) = digits.split_at(digits.len() - 2);
    let whole = to_text(whole);
    let whole = match whole.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let cents = to_text(cents);
    let sign = if negative && (whole != "0" || cents != "00") {
        "-"
    } else {
        ""
    };
    Some(format!("{sign}{whole}.{cents}"))
}

/// Resolve a lone separator kind: repeated or followed by exactly three
/// digits it groups thousands, otherwise it marks decimals.
fn single_separator(text: &str, separator: char) -> String {
    let parts: Vec<&str> = text.split(separator).collect();
    let integer = parts[0].trim_start_matches('-');
    let grouping = parts.len() > 2
        || (parts.len() == 2
            && parts[1].len() == 3
            && !integer.is_empty()
            && !integer.starts_with('0'));

    if grouping {
        text.replace(separator, "")
    } else {
        text.replace(separator, ".")
    }
}
