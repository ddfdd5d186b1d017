//! Single query command.

use crate::error::CommandError;
use crate::state::AppState;
use clap::Args;
use registra_core::SearchMode;
use registra_engine::QueryResult;
use tracing::info;

/// Arguments of `registra query`.
#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Target portal id (see `registra portals`)
    #[arg(long)]
    pub target: String,

    /// Search mode: plate, document, name or ticket-number
    #[arg(long, default_value = "plate")]
    pub mode: SearchMode,

    /// Search value
    #[arg(long)]
    pub value: String,

    /// Override the attempt bound for this run (1-5)
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// Run one query to a terminal result.
///
/// Portal-side failures are part of the returned result; only setup problems
/// (configuration, solver credentials, transport launch) are errors.
pub async fn run_query(state: &mut AppState, args: &QueryArgs) -> Result<QueryResult, CommandError> {
    if let Some(max_attempts) = args.max_attempts {
        state.config.engine.max_attempts = max_attempts;
        state.config.validate()?;
    }

    let engine = state.engine().await?;
    let result = engine.query_target(&args.target, args.mode, &args.value).await;
    info!(
        target_id = %result.target_id,
        status = ?result.status,
        attempts = result.attempts_used,
        "Query command finished"
    );
    Ok(result)
}
