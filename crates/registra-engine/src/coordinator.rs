//! Retry coordinator and the caller-facing query API.
//!
//! One query runs as a sequence of attempts. Each attempt opens a fresh
//! session, retrieves and solves that session's challenge, submits, and
//! classifies the response. The state machine in [`transition`] decides what
//! happens after each attempt; it is pure so the retry rules can be tested
//! without a transport.

use crate::challenge::ChallengeRetriever;
use crate::classify::{classify, Outcome, OutcomeLabel};
use crate::error::{ErrorKind, QueryError, Result, RetryPolicy};
use crate::normalize::normalize;
use crate::session::{Session, SessionStore};
use crate::submit::{QuerySubmitter, SolvedChallenge};
use futures::stream::{self, StreamExt};
use registra_browser::PortalTransport;
use registra_core::{CanonicalRecord, EngineConfig, QueryRequest, SearchMode, TargetId};
use registra_portal::{PortalDefinition, PortalRegistry};
use registra_solver::CaptchaSolver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Retry coordinator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Not started
    Pending,
    /// Running an attempt
    Attempting {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Backing off before the next attempt
    Retrying {
        /// Attempt that follows the backoff
        next_attempt: u32,
        /// Backoff length
        delay: Duration,
    },
    /// Records found
    Success,
    /// The portal has nothing on record
    Empty,
    /// The portal refused service; never retried
    Blocked,
    /// The attempt bound was reached while errors were still retryable
    Exhausted,
    /// A fatal error, or a limited retry allowance used up
    Failed,
}

impl QueryState {
    /// Whether no further event changes this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Empty | Self::Blocked | Self::Exhausted | Self::Failed
        )
    }
}

/// Input to [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEvent {
    /// The query begins
    Start,
    /// An attempt produced records
    Succeeded,
    /// An attempt ended with the portal's no-data answer
    FoundNothing,
    /// An attempt failed
    Failed {
        /// Category of the failure
        kind: ErrorKind,
        /// What the failure allows
        policy: RetryPolicy,
    },
    /// The backoff delay is over
    BackoffElapsed,
}

/// Attempt bound plus per-kind allowances for limited retries.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    limited: HashMap<ErrorKind, u32>,
}

impl RetryBudget {
    /// Budget of `max_attempts` attempts, at least one.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            limited: HashMap::new(),
        }
    }

    /// Count a failure of `kind`; true while it stays within `allowed` retries.
    fn allow(&mut self, kind: ErrorKind, allowed: u32) -> bool {
        let used = self.limited.entry(kind).or_insert(0);
        *used += 1;
        *used <= allowed
    }
}

/// Advance the coordinator. Events that do not apply to `state` leave it
/// unchanged.
pub fn transition(
    state: QueryState,
    event: QueryEvent,
    budget: &mut RetryBudget,
    config: &EngineConfig,
) -> QueryState {
    match (state, event) {
        (QueryState::Pending, QueryEvent::Start) => QueryState::Attempting { attempt: 1 },
        (QueryState::Attempting { .. }, QueryEvent::Succeeded) => QueryState::Success,
        (QueryState::Attempting { .. }, QueryEvent::FoundNothing) => QueryState::Empty,
        (QueryState::Attempting { .. }, QueryEvent::Failed { kind: ErrorKind::Blocked, .. }) => {
            QueryState::Blocked
        }
        (QueryState::Attempting { attempt }, QueryEvent::Failed { kind, policy }) => {
            let retry = match policy {
                RetryPolicy::Fatal => false,
                RetryPolicy::Retry => true,
                RetryPolicy::RetryLimited(allowed) => budget.allow(kind, allowed),
            };
            if !retry {
                QueryState::Failed
            } else if attempt >= budget.max_attempts {
                QueryState::Exhausted
            } else {
                QueryState::Retrying {
                    next_attempt: attempt + 1,
                    delay: config.retry_delay(attempt),
                }
            }
        }
        (QueryState::Retrying { next_attempt, .. }, QueryEvent::BackoffElapsed) => {
            QueryState::Attempting {
                attempt: next_attempt,
            }
        }
        (state, _) => state,
    }
}

/// Terminal status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// One or more records
    Success,
    /// The portal reported no records
    Empty,
    /// The query could not be completed
    Failed,
}

/// Trace of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Session used; absent when none could be opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Challenge read in this attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<Uuid>,
    /// Time the solver took
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solve_latency_ms: Option<u64>,
    /// Classification of the portal response, if one was read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeLabel>,
    /// Category of the error of a failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error text of a failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time of the attempt
    pub elapsed_ms: u64,
}

impl AttemptRecord {
    fn new(attempt: u32) -> Self {
        Self {
            attempt,
            session_id: None,
            challenge_id: None,
            solve_latency_ms: None,
            outcome: None,
            error_kind: None,
            error: None,
            elapsed_ms: 0,
        }
    }
}

/// Final answer for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Terminal status
    pub status: QueryStatus,
    /// Portal queried, as given by the caller
    pub target_id: String,
    /// Search mode; absent only when the request could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchMode>,
    /// Normalized records; empty unless `status` is success
    pub records: Vec<CanonicalRecord>,
    /// Human-readable summary; always says whether records were found or the
    /// query could not be completed
    pub message: String,
    /// Attempts started, never more than the configured bound
    pub attempts_used: u32,
    /// One entry per started attempt
    pub attempts: Vec<AttemptRecord>,
    /// Category of the final error of a failed query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl QueryResult {
    fn failed(target_id: &str, mode: Option<SearchMode>, err: &QueryError) -> Self {
        Self {
            status: QueryStatus::Failed,
            target_id: target_id.to_string(),
            mode,
            records: Vec::new(),
            message: format!("could not complete the query: {err}"),
            attempts_used: 0,
            attempts: Vec::new(),
            error_kind: Some(err.kind()),
        }
    }

    /// True for success and empty results.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status != QueryStatus::Failed
    }
}

enum AttemptOutput {
    Records(Vec<CanonicalRecord>),
    Empty(String),
}

enum Finish {
    Records(Vec<CanonicalRecord>),
    Empty(String),
    Failed(QueryState, QueryError),
}

#[derive(Default)]
struct Progress {
    started: u32,
    attempts: Vec<AttemptRecord>,
}

/// Runs queries against registered portals.
pub struct QueryEngine {
    registry: Arc<PortalRegistry>,
    sessions: SessionStore,
    challenges: ChallengeRetriever,
    submitter: QuerySubmitter,
    solver: Arc<dyn CaptchaSolver>,
    config: EngineConfig,
}

impl QueryEngine {
    /// Engine over the portals in `registry`, opening pages on `transport`.
    #[must_use]
    pub fn new(
        registry: Arc<PortalRegistry>,
        transport: Arc<dyn PortalTransport>,
        solver: Arc<dyn CaptchaSolver>,
        config: EngineConfig,
    ) -> Self {
        let step_timeout = config.session_timeout();
        Self {
            registry,
            sessions: SessionStore::new(transport, config.session_timeout()),
            challenges: ChallengeRetriever::new(
                config.challenge_wait(),
                config.challenge_poll_interval(),
                step_timeout,
            ),
            submitter: QuerySubmitter::new(step_timeout),
            solver,
            config,
        }
    }

    /// Portals this engine can query.
    #[must_use]
    pub fn registry(&self) -> &PortalRegistry {
        &self.registry
    }

    /// Retry and timeout settings in use.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Query `target_id` for `value`.
    ///
    /// Never fails: every problem, including an unknown target or an empty
    /// value, is reported as a [`QueryStatus::Failed`] result.
    pub async fn query_target(&self, target_id: &str, mode: SearchMode, value: &str) -> QueryResult {
        let request = TargetId::new(target_id)
            .and_then(|id| QueryRequest::new(id, mode, value))
            .map_err(QueryError::from);
        match request {
            Ok(request) => self.query(&request).await,
            Err(err) => {
                warn!(target_id, mode = %mode, error = %err, "rejected query request");
                QueryResult::failed(target_id, Some(mode), &err)
            }
        }
    }

    /// Run one query to a terminal result.
    pub async fn query(&self, request: &QueryRequest) -> QueryResult {
        let target_id = request.target_id().as_str();
        let mode = request.mode();
        info!(target_id, mode = %mode, value = %request.masked_value(), "query started");

        let definition = match self.registry.get(request.target_id()) {
            Ok(definition) => definition,
            Err(e) => {
                let err = QueryError::UnknownTarget(e.to_string());
                error!(target_id, error = %err, "query failed");
                return QueryResult::failed(target_id, Some(mode), &err);
            }
        };
        if definition.search_field(mode).is_none() {
            let err = QueryError::UnsupportedMode {
                target_id: target_id.to_string(),
                mode,
            };
            error!(target_id, error = %err, "query failed");
            return QueryResult::failed(target_id, Some(mode), &err);
        }

        let started = Instant::now();
        let deadline = started + self.config.request_timeout();
        let mut progress = Progress::default();
        let finish = self.run(&definition, request, deadline, &mut progress).await;

        let Progress {
            started: attempts_used,
            attempts,
        } = progress;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, records, message, error_kind) = match finish {
            Finish::Records(records) => {
                let message = format!("{} record(s) found", records.len());
                (QueryStatus::Success, records, message, None)
            }
            Finish::Empty(message) => (QueryStatus::Empty, Vec::new(), message, None),
            Finish::Failed(state, err) => {
                let message = match state {
                    QueryState::Exhausted => format!(
                        "could not complete the query after {attempts_used} attempts: {err}"
                    ),
                    _ => format!("could not complete the query: {err}"),
                };
                (QueryStatus::Failed, Vec::new(), message, Some(err.kind()))
            }
        };

        match status {
            QueryStatus::Failed => error!(
                target_id,
                attempts = attempts_used,
                elapsed_ms,
                reason = %message,
                "query failed"
            ),
            _ => info!(
                target_id,
                status = ?status,
                records = records.len(),
                attempts = attempts_used,
                elapsed_ms,
                "query finished"
            ),
        }

        QueryResult {
            status,
            target_id: target_id.to_string(),
            mode: Some(mode),
            records,
            message,
            attempts_used,
            attempts,
            error_kind,
        }
    }

    /// Run independent queries with at most `concurrency` in flight. Results
    /// come back in request order.
    pub async fn query_many(&self, requests: Vec<QueryRequest>, concurrency: usize) -> Vec<QueryResult> {
        stream::iter(requests)
            .map(|request| async move { self.query(&request).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    fn deadline_exceeded(&self) -> QueryError {
        QueryError::DeadlineExceeded {
            seconds: self.config.request_timeout().as_secs(),
        }
    }

    async fn run(
        &self,
        definition: &PortalDefinition,
        request: &QueryRequest,
        deadline: Instant,
        progress: &mut Progress,
    ) -> Finish {
        let mut budget = RetryBudget::new(self.config.max_attempts);
        let mut state = transition(QueryState::Pending, QueryEvent::Start, &mut budget, &self.config);
        let mut last_error = None;

        loop {
            match state {
                QueryState::Attempting { attempt } => {
                    progress.started = attempt;
                    let (record, result) = self.attempt(definition, request, attempt, deadline).await;
                    progress.attempts.push(record);

                    let event = match &result {
                        Ok(AttemptOutput::Records(_)) => QueryEvent::Succeeded,
                        Ok(AttemptOutput::Empty(_)) => QueryEvent::FoundNothing,
                        Err(err) => QueryEvent::Failed {
                            kind: err.kind(),
                            policy: err.retry_policy(&self.config),
                        },
                    };
                    state = transition(state, event, &mut budget, &self.config);

                    match result {
                        Ok(AttemptOutput::Records(records)) => return Finish::Records(records),
                        Ok(AttemptOutput::Empty(message)) => return Finish::Empty(message),
                        Err(err) => {
                            if !state.is_terminal() {
                                warn!(
                                    target_id = %definition.id(),
                                    attempt,
                                    kind = ?err.kind(),
                                    error = %err,
                                    "attempt failed, retrying"
                                );
                            }
                            last_error = Some(err);
                        }
                    }
                }
                QueryState::Retrying { delay, next_attempt } => {
                    if Instant::now() + delay >= deadline {
                        warn!(
                            target_id = %definition.id(),
                            next_attempt,
                            "request deadline reached before the next attempt"
                        );
                        return Finish::Failed(QueryState::Failed, self.deadline_exceeded());
                    }
                    debug!(next_attempt, delay = ?delay, "backing off");
                    tokio::time::sleep(delay).await;
                    state = transition(state, QueryEvent::BackoffElapsed, &mut budget, &self.config);
                }
                QueryState::Blocked | QueryState::Exhausted | QueryState::Failed => {
                    let err = last_error.unwrap_or_else(|| {
                        QueryError::Internal("terminal state without an error".to_string())
                    });
                    return Finish::Failed(state, err);
                }
                QueryState::Pending | QueryState::Success | QueryState::Empty => {
                    return Finish::Failed(
                        QueryState::Failed,
                        QueryError::Internal(format!("coordinator stalled in {state:?}")),
                    );
                }
            }
        }
    }

    /// One attempt with a fresh session, closed on every path that returns.
    /// Neither the attempt timeout nor the request `deadline` is overrun; an
    /// attempt cut short by the deadline is recorded as such.
    async fn attempt(
        &self,
        definition: &PortalDefinition,
        request: &QueryRequest,
        attempt: u32,
        deadline: Instant,
    ) -> (AttemptRecord, Result<AttemptOutput>) {
        let started = Instant::now();
        let mut record = AttemptRecord::new(attempt);
        debug!(target_id = %definition.id(), attempt, "attempt started");

        let opened = tokio::time::timeout_at(deadline, self.sessions.open(definition))
            .await
            .unwrap_or_else(|_| Err(self.deadline_exceeded()));

        let result = match opened {
            Ok(mut session) => {
                record.session_id = Some(session.id);
                let limit = self.config.attempt_timeout();
                let attempt_deadline = (Instant::now() + limit).min(deadline);
                let result = tokio::time::timeout_at(
                    attempt_deadline,
                    self.drive(&mut session, definition, request, &mut record),
                )
                .await
                .unwrap_or_else(|_| {
                    if attempt_deadline == deadline {
                        Err(self.deadline_exceeded())
                    } else {
                        Err(QueryError::Transient(format!(
                            "attempt exceeded {}s",
                            limit.as_secs()
                        )))
                    }
                });
                session.close().await;
                result
            }
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            record.error_kind = Some(err.kind());
            record.error = Some(err.to_string());
        }
        record.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        (record, result)
    }

    async fn drive(
        &self,
        session: &mut Session,
        definition: &PortalDefinition,
        request: &QueryRequest,
        record: &mut AttemptRecord,
    ) -> Result<AttemptOutput> {
        let token = self
            .challenges
            .get_challenge(session, &definition.challenge)
            .await?;

        let solution = match &token {
            Some(token) => {
                record.challenge_id = Some(token.challenge_id);
                let solution = self.solver.solve(&token.artifact, &token.constraints).await?;
                record.solve_latency_ms = Some(solution.solve_latency_ms);
                Some(solution)
            }
            None => None,
        };
        let solved = token
            .as_ref()
            .zip(solution.as_ref())
            .map(|(token, solution)| SolvedChallenge { token, solution });

        let mut document = self
            .submitter
            .submit(session, definition, request, solved)
            .await?;
        let mut outcome = classify(&document, definition);

        if session.page().renders_scripts() {
            let deadline = Instant::now() + self.config.result_wait();
            while matches!(outcome, Outcome::TransientError { .. }) && Instant::now() < deadline {
                tokio::time::sleep(self.config.challenge_poll_interval()).await;
                document = session
                    .page()
                    .snapshot(self.config.session_timeout())
                    .await
                    .map_err(|e| QueryError::Transient(format!("reading results: {e}")))?;
                outcome = classify(&document, definition);
            }
        }

        record.outcome = Some(outcome.label());
        debug!(session_id = %session.id, outcome = %outcome.label(), "response classified");

        match outcome {
            Outcome::Success(rows) => {
                let records = normalize(&rows, definition);
                if records.is_empty() {
                    Err(QueryError::SiteChanged(format!(
                        "{} row(s) extracted but none mapped to a known field",
                        rows.len()
                    )))
                } else {
                    Ok(AttemptOutput::Records(records))
                }
            }
            Outcome::Empty { message } => Ok(AttemptOutput::Empty(message)),
            Outcome::InvalidCaptcha { message } => {
                if let Some(solution) = &solution {
                    if let Err(e) = self.solver.report_incorrect(solution).await {
                        warn!(job_id = %solution.job_id, error = %e, "could not report rejected answer");
                    }
                }
                Err(QueryError::InvalidCaptcha(message))
            }
            Outcome::Blocked { reason } => Err(QueryError::Blocked(reason)),
            Outcome::TransientError {
                reason,
                suspect_site_change: true,
            } => Err(QueryError::SiteChanged(reason)),
            Outcome::TransientError { reason, .. } => Err(QueryError::Transient(reason)),
        }
    }
}
