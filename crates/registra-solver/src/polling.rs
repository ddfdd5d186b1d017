//! Submit-then-poll solving loop.

use crate::challenge::{CaptchaSolution, ChallengeArtifact, PollStatus, SolveConstraints};
use crate::error::{classify_failure_code, Result, SolverError};
use crate::service::SolverService;
use async_trait::async_trait;
use registra_core::SolverConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Solves a challenge end to end.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Solve `artifact`, waiting no longer than the deadline for its kind.
    ///
    /// # Errors
    /// [`SolverError::Unsolvable`] when a fresh challenge may succeed,
    /// [`SolverError::Service`] for account or service failures and
    /// [`SolverError::Timeout`] when the deadline passes.
    async fn solve(
        &self,
        artifact: &ChallengeArtifact,
        constraints: &SolveConstraints,
    ) -> Result<CaptchaSolution>;

    /// Report an answer the portal rejected.
    async fn report_incorrect(&self, solution: &CaptchaSolution) -> Result<()>;
}

/// Timing for one challenge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Wait before the first poll
    pub initial_delay: Duration,
    /// Wait between polls
    pub interval: Duration,
    /// Ceiling measured from submission
    pub deadline: Duration,
}

/// [`CaptchaSolver`] over a [`SolverService`] with fixed-interval polling.
pub struct PollingSolver {
    service: Arc<dyn SolverService>,
    image: PollSchedule,
    widget: PollSchedule,
    report_incorrect: bool,
}

impl PollingSolver {
    /// Build a solver with schedules taken from configuration.
    #[must_use]
    pub fn new(service: Arc<dyn SolverService>, config: &SolverConfig) -> Self {
        let interval = config.poll_interval();
        Self {
            service,
            image: PollSchedule {
                initial_delay: Duration::from_secs(config.image_initial_delay_secs),
                interval,
                deadline: Duration::from_secs(config.image_timeout_secs),
            },
            widget: PollSchedule {
                initial_delay: Duration::from_secs(config.widget_initial_delay_secs),
                interval,
                deadline: Duration::from_secs(config.widget_timeout_secs),
            },
            report_incorrect: config.report_incorrect,
        }
    }

    /// Schedule applied to `artifact`.
    #[must_use]
    pub fn schedule_for(&self, artifact: &ChallengeArtifact) -> PollSchedule {
        if artifact.is_image() {
            self.image
        } else {
            self.widget
        }
    }

    /// Account balance on the underlying service.
    pub async fn balance(&self) -> Result<f64> {
        self.service.balance().await
    }
}

#[async_trait]
impl CaptchaSolver for PollingSolver {
    async fn solve(
        &self,
        artifact: &ChallengeArtifact,
        constraints: &SolveConstraints,
    ) -> Result<CaptchaSolution> {
        let schedule = self.schedule_for(artifact);
        let started = Instant::now();
        let deadline = started + schedule.deadline;

        let job_id = self.service.submit(artifact, constraints).await?;
        let mut wait = schedule.initial_delay;
        let mut polls = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(job_id = %job_id, polls, "captcha solve deadline passed");
                return Err(SolverError::Timeout {
                    seconds: schedule.deadline.as_secs(),
                });
            }
            tokio::time::sleep(wait.min(deadline - now)).await;
            polls += 1;

            let status = match self.service.poll(&job_id).await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    warn!(job_id = %job_id, polls, error = %e, "captcha poll failed, polling again");
                    wait = schedule.interval;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match status {
                PollStatus::Pending => {
                    debug!(job_id = %job_id, polls, "captcha not ready");
                    wait = schedule.interval;
                }
                PollStatus::Ready(answer) => {
                    let answer = answer.trim().to_string();
                    if answer.is_empty() {
                        return Err(SolverError::Unsolvable {
                            code: "EMPTY_ANSWER".to_string(),
                        });
                    }
                    let solve_latency_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    info!(
                        job_id = %job_id,
                        polls,
                        elapsed_ms = solve_latency_ms,
                        kind = %artifact.kind_label(),
                        "captcha solved"
                    );
                    return Ok(CaptchaSolution {
                        answer,
                        solve_latency_ms,
                        job_id,
                    });
                }
                PollStatus::Failed(code) => {
                    warn!(job_id = %job_id, code = %code, "captcha job failed");
                    return Err(classify_failure_code(&code));
                }
            }
        }
    }

    async fn report_incorrect(&self, solution: &CaptchaSolution) -> Result<()> {
        if !self.report_incorrect {
            return Ok(());
        }
        self.service.report_incorrect(&solution.job_id).await?;
        debug!(job_id = %solution.job_id, "reported incorrect captcha answer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::JobId;
    use registra_core::WidgetKind;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedService {
        polls: Mutex<VecDeque<Result<PollStatus>>>,
        poll_count: AtomicUsize,
        reports: Mutex<Vec<JobId>>,
        reject_submit: Option<&'static str>,
    }

    impl ScriptedService {
        fn with_polls(polls: Vec<PollStatus>) -> Self {
            Self::with_replies(polls.into_iter().map(Ok).collect())
        }

        fn with_replies(replies: Vec<Result<PollStatus>>) -> Self {
            Self {
                polls: Mutex::new(replies.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SolverService for ScriptedService {
        async fn submit(
            &self,
            _artifact: &ChallengeArtifact,
            _constraints: &SolveConstraints,
        ) -> Result<JobId> {
            match self.reject_submit {
                Some(code) => Err(classify_failure_code(code)),
                None => Ok(JobId::new("job-1")),
            }
        }

        async fn poll(&self, _job: &JobId) -> Result<PollStatus> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PollStatus::Pending))
        }

        async fn report_incorrect(&self, job: &JobId) -> Result<()> {
            self.reports.lock().unwrap().push(job.clone());
            Ok(())
        }

        async fn balance(&self) -> Result<f64> {
            Ok(4.2)
        }

        fn service_id(&self) -> &str {
            "scripted"
        }
    }

    fn image() -> ChallengeArtifact {
        ChallengeArtifact::Image {
            bytes: vec![1, 2, 3],
            mime: "image/png".to_string(),
        }
    }

    fn solver(service: Arc<ScriptedService>) -> PollingSolver {
        PollingSolver::new(service, &SolverConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_solves_after_not_ready_polls() {
        let mut script = vec![PollStatus::Pending; 10];
        script.push(PollStatus::Ready("4821".to_string()));
        let service = Arc::new(ScriptedService::with_polls(script));
        let solver = solver(Arc::clone(&service));

        let solution = solver
            .solve(&image(), &SolveConstraints::default())
            .await
            .expect("solve");

        assert_eq!(solution.answer, "4821");
        assert_eq!(solution.job_id, JobId::new("job-1"));
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 11);
        // 5s initial delay plus ten 2s intervals
        assert_eq!(solution.solve_latency_ms, 25_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolvable_code() {
        let service = Arc::new(ScriptedService::with_polls(vec![
            PollStatus::Pending,
            PollStatus::Failed("ERROR_CAPTCHA_UNSOLVABLE".to_string()),
        ]));
        let err = solver(service)
            .solve(&image(), &SolveConstraints::default())
            .await
            .unwrap_err();
        assert!(err.is_unsolvable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_keeps_job() {
        let service = Arc::new(ScriptedService::with_replies(vec![
            Err(SolverError::ParseError("connection reset".to_string())),
            Ok(PollStatus::Ready("4821".to_string())),
        ]));
        let solution = solver(Arc::clone(&service))
            .solve(&image(), &SolveConstraints::default())
            .await
            .expect("solve after a failed poll");

        assert_eq!(solution.answer, "4821");
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 2);
        // 5s initial delay plus one 2s interval
        assert_eq!(solution.solve_latency_ms, 7_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_end_at_deadline() {
        let replies = (0..20)
            .map(|_| {
                Err(SolverError::ApiError {
                    status: 502,
                    message: "Bad Gateway".to_string(),
                })
            })
            .collect();
        let service = Arc::new(ScriptedService::with_replies(replies));
        let err = solver(Arc::clone(&service))
            .solve(&image(), &SolveConstraints::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SolverError::Timeout { seconds: 30 }));
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_verdict_on_poll_ends_solve() {
        let service = Arc::new(ScriptedService::with_replies(vec![Err(
            classify_failure_code("ERROR_WRONG_USER_KEY"),
        )]));
        let err = solver(Arc::clone(&service))
            .solve(&image(), &SolveConstraints::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SolverError::Service { .. }));
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_error_on_submit() {
        let service = Arc::new(ScriptedService {
            reject_submit: Some("ERROR_ZERO_BALANCE"),
            ..ScriptedService::default()
        });
        let err = solver(Arc::clone(&service))
            .solve(&image(), &SolveConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::Service { .. }));
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_deadline() {
        let service = Arc::new(ScriptedService::default());
        let started = Instant::now();
        let err = solver(Arc::clone(&service))
            .solve(&image(), &SolveConstraints::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SolverError::Timeout { seconds: 30 }));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        // 5, 7, ..., 29 and a final poll at the deadline
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn test_widget_uses_longer_schedule() {
        let mut script = vec![PollStatus::Pending; 60];
        script.push(PollStatus::Ready("03AGdBq2-token".to_string()));
        let service = Arc::new(ScriptedService::with_polls(script));
        let artifact = ChallengeArtifact::Widget {
            kind: WidgetKind::RecaptchaV2,
            site_key: "6Lc".to_string(),
            page_url: "https://portal.example".to_string(),
        };

        let solution = solver(service)
            .solve(&artifact, &SolveConstraints::default())
            .await
            .expect("solve widget");
        assert_eq!(solution.answer, "03AGdBq2-token");
        assert_eq!(solution.solve_latency_ms, 135_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_answer_is_unsolvable() {
        let service = Arc::new(ScriptedService::with_polls(vec![PollStatus::Ready(
            "  ".to_string(),
        )]));
        let err = solver(service)
            .solve(&image(), &SolveConstraints::default())
            .await
            .unwrap_err();
        assert!(err.is_unsolvable());
    }

    #[tokio::test]
    async fn test_report_incorrect_respects_config() {
        let service = Arc::new(ScriptedService::default());
        let solution = CaptchaSolution {
            answer: "abcd".to_string(),
            solve_latency_ms: 1,
            job_id: JobId::new("job-9"),
        };

        solver(Arc::clone(&service))
            .report_incorrect(&solution)
            .await
            .expect("report");
        assert_eq!(service.reports.lock().unwrap().len(), 1);

        let config = SolverConfig {
            report_incorrect: false,
            ..SolverConfig::default()
        };
        PollingSolver::new(Arc::clone(&service) as Arc<dyn SolverService>, &config)
            .report_incorrect(&solution)
            .await
            .expect("report disabled");
        assert_eq!(service.reports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_passthrough() {
        let solver = solver(Arc::new(ScriptedService::default()));
        assert!((solver.balance().await.expect("balance") - 4.2).abs() < f64::EPSILON);
    }
}
