//! Registra Engine - CAPTCHA-gated portal queries.
//!
//! Drives one logical query against a legacy government portal: open a
//! session, retrieve the captcha bound to it, have it solved, submit the
//! search, classify the response and normalize any records found. Every
//! retry starts over with a fresh session and a fresh challenge.
//!
//! # Example
//!
//! ```rust,ignore
//! use registra_engine::QueryEngine;
//! use registra_core::SearchMode;
//!
//! let engine = QueryEngine::new(registry, transport, solver, config.engine);
//! let result = engine.query_target("sat-lima", SearchMode::Plate, "ABC123").await;
//! println!("{}", result.message);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod challenge;
pub mod classify;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod session;
pub mod submit;

#[cfg(test)]
mod testing;

pub use challenge::{ChallengeRetriever, ChallengeToken};
pub use classify::{classify, Outcome, OutcomeLabel};
pub use coordinator::{
    transition, AttemptRecord, QueryEngine, QueryEvent, QueryResult, QueryState, QueryStatus,
    RetryBudget,
};
pub use error::{ErrorKind, QueryError, Result, RetryPolicy};
pub use extract::{extract, Extraction};
pub use normalize::normalize;
pub use session::{Session, SessionStore};
pub use submit::{build_form, QuerySubmitter, SolvedChallenge};
