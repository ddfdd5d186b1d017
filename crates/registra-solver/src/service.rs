//! Solving service trait.

use crate::challenge::{ChallengeArtifact, JobId, PollStatus, SolveConstraints};
use crate::error::Result;
use async_trait::async_trait;

/// A remote captcha solving service with a submit/poll protocol.
///
/// Implementations should be thread-safe (Send + Sync) so one service can back
/// many concurrent queries.
#[async_trait]
pub trait SolverService: Send + Sync {
    /// Submit a challenge and get back a job id.
    ///
    /// # Errors
    /// Returns error if the service refuses the job or the network fails.
    async fn submit(
        &self,
        artifact: &ChallengeArtifact,
        constraints: &SolveConstraints,
    ) -> Result<JobId>;

    /// Check on a submitted job.
    ///
    /// # Errors
    /// Returns error on transport or parse failures. Service failure codes are
    /// reported as [`PollStatus::Failed`].
    async fn poll(&self, job: &JobId) -> Result<PollStatus>;

    /// Tell the service a returned answer was rejected by the portal.
    async fn report_incorrect(&self, job: &JobId) -> Result<()>;

    /// Remaining account balance.
    async fn balance(&self) -> Result<f64>;

    /// Get the unique identifier for this service.
    fn service_id(&self) -> &str;
}
