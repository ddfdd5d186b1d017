//! Row extraction strategies.
//!
//! Strategies are pure functions over a [`Document`] and the portal's result
//! selectors. They are tried in order and the first one yielding at least one
//! row wins. Whether any strategy found a results container is reported
//! separately, so the classifier can tell "no rows" from "layout changed".

use registra_browser::Document;
use registra_core::RawRecord;
use registra_portal::{normalize_label, PortalDefinition};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

/// Rows found in a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// A results table or payload was present, with or without rows
    pub container_found: bool,
    /// Rows from the first strategy that produced any
    pub rows: Vec<RawRecord>,
}

type Strategy = fn(&Document, &PortalDefinition) -> Extraction;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("json_pointer", from_json),
    ("configured_tables", from_configured_tables),
    ("labelled_table", from_labelled_table),
];

/// Run the strategies in order.
pub fn extract(document: &Document, definition: &PortalDefinition) -> Extraction {
    let mut container_found = false;

    for (name, strategy) in STRATEGIES {
        let found = strategy(document, definition);
        container_found |= found.container_found;
        if !found.rows.is_empty() {
            debug!(strategy = name, rows = found.rows.len(), "extracted rows");
            return Extraction {
                container_found: true,
                rows: found.rows,
            };
        }
    }

    Extraction {
        container_found,
        rows: Vec::new(),
    }
}

fn from_json(document: &Document, definition: &PortalDefinition) -> Extraction {
    let Some(pointer) = definition.results.json_pointer.as_deref() else {
        return Extraction::default();
    };
    if !document.is_json() {
        return Extraction::default();
    }
    let Ok(payload) = serde_json::from_str::<Value>(&document.body) else {
        return Extraction::default();
    };
    let Some(container) = payload.pointer(pointer) else {
        return Extraction::default();
    };

    let rows = match container {
        Value::Array(items) => items.iter().filter_map(json_row).collect(),
        Value::Object(_) => json_row(container).into_iter().collect(),
        _ => Vec::new(),
    };
    Extraction {
        container_found: true,
        rows,
    }
}

fn json_row(item: &Value) -> Option<RawRecord> {
    let object = item.as_object()?;
    let mut record = RawRecord::new();
    for (key, value) in object {
        let text = match value {
            Value::String(s) => collapse_whitespace(s),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => continue,
        };
        record.fields.insert(key.clone(), text);
    }
    (record.filled_len() > 0).then_some(record)
}

fn from_configured_tables(document: &Document, definition: &PortalDefinition) -> Extraction {
    let results = &definition.results;
    if results.table_selectors.is_empty() || document.is_json() {
        return Extraction::default();
    }
    let Ok(row_selector) = Selector::parse(&results.row_selector) else {
        return Extraction::default();
    };
    let patterns = match results.compiled_header_patterns() {
        Ok(patterns) => patterns,
        Err(e) => {
            warn!(error = %e, "ignoring header patterns");
            Vec::new()
        }
    };

    let html = Html::parse_document(&document.body);
    let mut extraction = Extraction::default();

    for raw in &results.table_selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for table in html.select(&selector) {
            extraction.container_found = true;
            let rows = table_rows(table, &row_selector, results.min_cells, &patterns);
            if !rows.is_empty() {
                extraction.rows = rows;
                return extraction;
            }
        }
    }
    extraction
}

/// Any table whose header row names at least two mapped columns.
fn from_labelled_table(document: &Document, definition: &PortalDefinition) -> Extraction {
    if definition.fields.is_empty() || document.is_json() {
        return Extraction::default();
    }
    let sources: Vec<String> = definition
        .fields
        .iter()
        .map(|f| normalize_label(&f.source))
        .collect();
    let (Ok(tables), Ok(rows)) = (Selector::parse("table"), Selector::parse("tr")) else {
        return Extraction::default();
    };

    let html = Html::parse_document(&document.body);
    for table in html.select(&tables) {
        let Some(header) = table.select(&rows).find(|row| is_heading_row(*row, &[])) else {
            continue;
        };
        let matched = cells(header)
            .iter()
            .filter(|cell| sources.contains(&normalize_label(&cell_text(**cell))))
            .count();
        if matched >= 2 {
            return Extraction {
                container_found: true,
                rows: table_rows(table, &rows, definition.results.min_cells, &[]),
            };
        }
    }
    Extraction::default()
}

fn table_rows(
    table: ElementRef<'_>,
    row_selector: &Selector,
    min_cells: usize,
    patterns: &[Regex],
) -> Vec<RawRecord> {
    let mut labels: Vec<String> = Vec::new();
    let mut records = Vec::new();

    for row in table.select(row_selector) {
        let row_cells = cells(row);
        if row_cells.is_empty() {
            continue;
        }
        if is_heading_row(row, patterns) {
            if labels.is_empty() {
                labels = row_cells.iter().map(|c| cell_text(*c)).collect();
            }
            continue;
        }

        let mut record = RawRecord::new();
        for (index, cell) in row_cells.iter().enumerate() {
            let key = labels
                .get(index)
                .filter(|label| !label.is_empty())
                .cloned()
                .unwrap_or_else(|| index.to_string());
            record.fields.entry(key).or_insert_with(|| cell_text(*cell));
        }
        if record.filled_len() >= min_cells {
            records.push(record);
        }
    }
    records
}

/// Direct `td`/`th` children of a row.
fn cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

fn is_heading_row(row: ElementRef<'_>, patterns: &[Regex]) -> bool {
    let row_cells = cells(row);
    if row_cells.is_empty() {
        return false;
    }
    row_cells.iter().all(|c| c.value().name() == "th")
        || row_cells.iter().any(|c| {
            let text = cell_text(*c);
            patterns.iter().any(|p| p.is_match(&text))
        })
}

fn cell_text(cell: ElementRef<'_>) -> String {
    collapse_whitespace(&cell.text().collect::<String>())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{portal_definition, results_page};

    #[test]
    fn test_configured_table_with_headers() {
        let document = results_page(&[
            ("P-001", "15/03/2024", "S/ 150.00", "PENDIENTE"),
            ("P-002", "02/04/2024", "S/ 86.00", "PAGADO"),
        ]);
        let extraction = extract(&document, &portal_definition());

        assert!(extraction.container_found);
        assert_eq!(extraction.rows.len(), 2);
        assert_eq!(extraction.rows[0].get("Papeleta"), Some("P-001"));
        assert_eq!(extraction.rows[1].get("Monto"), Some("S/ 86.00"));
    }

    #[test]
    fn test_empty_table_reports_container() {
        let document = results_page(&[]);
        let extraction = extract(&document, &portal_definition());
        assert!(extraction.container_found);
        assert!(extraction.rows.is_empty());
    }

    #[test]
    fn test_no_container() {
        let document = Document::html("https://portal.example", "<p>Cargando...</p>");
        assert_eq!(extract(&document, &portal_definition()), Extraction::default());
    }

    #[test]
    fn test_sparse_rows_dropped() {
        let document = Document::html(
            "https://portal.example",
            r#"<table id="grdResultados">
                <tr><td>P-001</td><td>15/03/2024</td></tr>
                <tr><td colspan="2">Total: 1</td></tr>
            </table>"#,
        );
        let extraction = extract(&document, &portal_definition());
        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].get("0"), Some("P-001"));
    }

    #[test]
    fn test_header_pattern_row_skipped() {
        let mut definition = portal_definition();
        definition.results.header_patterns = vec!["(?i)^papeleta$".to_string()];
        let document = Document::html(
            "https://portal.example",
            r#"<table id="grdResultados">
                <tr class="hdr"><td>Papeleta</td><td>Fecha</td></tr>
                <tr><td>P-001</td><td>15/03/2024</td></tr>
            </table>"#,
        );
        let extraction = extract(&document, &definition);
        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].get("Fecha"), Some("15/03/2024"));
    }

    #[test]
    fn test_labelled_table_fallback() {
        let document = Document::html(
            "https://portal.example",
            r#"<div class="nuevo"><table>
                <tr><th>Papeleta</th><th>Fecha</th><th>Monto</th></tr>
                <tr><td>P-9</td><td>01/01/2024</td><td>S/ 10.00</td></tr>
            </table></div>"#,
        );
        let extraction = extract(&document, &portal_definition());
        assert!(extraction.container_found);
        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].get("Papeleta"), Some("P-9"));
    }

    #[test]
    fn test_json_pointer() {
        let mut definition = portal_definition();
        definition.results.json_pointer = Some("/data/items".to_string());
        let document = Document {
            url: "https://portal.example/api".to_string(),
            status: 200,
            content_type: Some("application/json".to_string()),
            body: r#"{"data":{"items":[
                {"Papeleta":"P-1","Monto":150.5,"meta":{"x":1}},
                {"Papeleta":"  "}
            ]}}"#
                .to_string(),
        };

        let extraction = extract(&document, &definition);
        assert!(extraction.container_found);
        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].get("Monto"), Some("150.5"));
        assert_eq!(extraction.rows[0].get("meta"), None);
    }

    #[test]
    fn test_json_empty_array_is_container() {
        let mut definition = portal_definition();
        definition.results.json_pointer = Some("/data".to_string());
        let document = Document::html("https://portal.example/api", r#"{"data":[]}"#);

        let extraction = extract(&document, &definition);
        assert!(extraction.container_found);
        assert!(extraction.rows.is_empty());
    }
}
