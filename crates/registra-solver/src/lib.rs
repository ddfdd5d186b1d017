//! Registra Solver - captcha solving through an external service.
//!
//! A challenge artifact (image bytes, or a widget site key plus page URL) is
//! submitted to a remote service which hands back a job id; the job is then
//! polled on a fixed interval until the service answers, reports a terminal
//! failure code, or the per-kind deadline passes.
//!
//! # Example
//!
//! ```rust,no_run
//! use registra_core::SolverConfig;
//! use registra_solver::{
//!     CaptchaSolver, ChallengeArtifact, PollingSolver, SolveConstraints, TwoCaptchaService,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SolverConfig {
//!     api_key: Some("your-api-key".to_string()),
//!     ..SolverConfig::default()
//! };
//! let service = Arc::new(TwoCaptchaService::from_config(&config)?);
//! let solver = PollingSolver::new(service, &config);
//!
//! let artifact = ChallengeArtifact::Image {
//!     bytes: std::fs::read("captcha.png")?,
//!     mime: "image/png".to_string(),
//! };
//! let solution = solver.solve(&artifact, &SolveConstraints::default()).await?;
//! println!("{} in {}ms", solution.answer, solution.solve_latency_ms);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod challenge;
pub mod error;
pub mod polling;
pub mod service;
pub mod two_captcha;

pub use challenge::{CaptchaSolution, ChallengeArtifact, JobId, PollStatus, SolveConstraints};
pub use error::{classify_failure_code, Result, SolverError};
pub use polling::{CaptchaSolver, PollSchedule, PollingSolver};
pub use service::SolverService;
pub use two_captcha::TwoCaptchaService;
