//! Batch queries from a JSON file.

use crate::error::CommandError;
use crate::state::AppState;
use clap::Args;
use registra_core::{QueryRequest, SearchMode, TargetId};
use registra_engine::QueryResult;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Arguments of `registra batch`.
#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// JSON array of `{"target": ..., "mode": ..., "value": ...}` objects
    #[arg(long)]
    pub input: PathBuf,

    /// Requests in flight at once
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    target: String,
    #[serde(default = "default_mode")]
    mode: SearchMode,
    value: String,
}

fn default_mode() -> SearchMode {
    SearchMode::Plate
}

/// Parse batch input. The whole batch is rejected if any entry is invalid.
pub fn parse_batch(input: &str) -> Result<Vec<QueryRequest>, CommandError> {
    let entries: Vec<BatchEntry> = serde_json::from_str(input)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            TargetId::new(entry.target)
                .and_then(|target| QueryRequest::new(target, entry.mode, &entry.value))
                .map_err(|e| {
                    CommandError::with_details(
                        "INVALID_INPUT",
                        e.to_string(),
                        serde_json::json!({ "index": index }),
                    )
                })
        })
        .collect()
}

/// Run every request in the input file; results keep input order.
pub async fn run_batch(state: &AppState, args: &BatchArgs) -> Result<Vec<QueryResult>, CommandError> {
    let input = std::fs::read_to_string(&args.input)?;
    let requests = parse_batch(&input)?;
    info!(requests = requests.len(), concurrency = args.concurrency, "Starting batch");

    let engine = state.engine().await?;
    Ok(engine.query_many(requests, args.concurrency).await)
}
