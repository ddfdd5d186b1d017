//! Setup check: portal definitions and solver credentials.

use crate::commands::portals::category_label;
use crate::error::CommandError;
use crate::state::AppState;
use registra_core::TransportKind;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Solver status reported by `registra check`.
#[derive(Debug, Serialize)]
pub struct SolverStatus {
    pub provider: String,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

/// Result of `registra check`.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    /// True when at least one portal is loaded and the solver answered
    pub ok: bool,
    pub portals: usize,
    pub by_category: BTreeMap<&'static str, usize>,
    pub transport: TransportKind,
    pub solver: SolverStatus,
}

/// Check loaded definitions and query the solver account balance.
pub async fn run_check(state: &AppState) -> CheckReport {
    let by_category = state
        .registry
        .count_by_category()
        .into_iter()
        .map(|(category, count)| (category_label(category), count))
        .collect();

    let provider = state.config.solver.provider.clone();
    let solver = match state.solver() {
        Ok(solver) => match solver.balance().await {
            Ok(balance) => {
                info!(balance, "Solver account reachable");
                SolverStatus {
                    provider,
                    configured: true,
                    balance: Some(balance),
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Solver balance check failed");
                SolverStatus {
                    provider,
                    configured: true,
                    balance: None,
                    error: Some(e.into()),
                }
            }
        },
        Err(e) => SolverStatus {
            provider,
            configured: false,
            balance: None,
            error: Some(e),
        },
    };

    let portals = state.registry.count();
    CheckReport {
        ok: portals > 0 && solver.balance.is_some(),
        portals,
        by_category,
        transport: state.config.transport.kind,
        solver,
    }
}
