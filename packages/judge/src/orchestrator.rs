//! Judging Orchestrator - claims a submission, drives the dispatcher and
//! collector, aggregates, then persists and notifies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::judge_result::SubmissionJudged;
use common::retry::BackoffPolicy;
use common::{JudgeLimits, Submission, SubmissionStatus, TestCaseRun, Verdict};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::aggregate;
use crate::collector::ResultCollector;
use crate::config::JudgeAppConfig;
use crate::dispatcher::{DispatchPlan, Dispatcher, RunOutcome};
use crate::error::{JudgeError, Result};
use crate::notify::JudgeNotifier;
use crate::state::SubmissionStateMachine;
use crate::store::{SubmissionBundle, SubmissionStore};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound on judging one submission.
    pub deadline: Duration,
    /// Maximum stored bytes of each output snippet.
    pub snippet_limit: usize,
    /// Retry policy for the durable write.
    pub write_retry: BackoffPolicy,
    /// Age after which an unfinished submission is failed by [`Orchestrator::recover_stuck`].
    pub stuck_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &JudgeAppConfig) -> Self {
        Self {
            deadline: Duration::from_secs(config.judging.deadline_secs),
            snippet_limit: config.judging.snippet_limit,
            write_retry: config.persistence.retry_policy(),
            stuck_timeout: Duration::from_secs(config.judging.stuck_timeout_secs),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&JudgeAppConfig::default())
    }
}

/// A judged submission whose durable write has not succeeded yet.
#[derive(Debug, Clone)]
struct JudgedSubmission {
    submission: Submission,
    runs: Vec<TestCaseRun>,
}

const STUCK_REASON: &str = "judging did not finish in time";

enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

impl Interrupt {
    fn reason(&self) -> &'static str {
        match self {
            Interrupt::Cancelled => "judging cancelled",
            Interrupt::DeadlineExceeded => "judging deadline exceeded",
        }
    }
}

/// Removes the cancellation handle once judging of a submission ends.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<i32, CancellationToken>,
    submission_id: i32,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.submission_id);
    }
}

pub struct Orchestrator {
    store: Arc<dyn SubmissionStore>,
    notifier: Arc<dyn JudgeNotifier>,
    dispatcher: Dispatcher,
    states: SubmissionStateMachine,
    settings: OrchestratorSettings,
    in_flight: DashMap<i32, CancellationToken>,
    pending_writes: DashMap<i32, JudgedSubmission>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        notifier: Arc<dyn JudgeNotifier>,
        dispatcher: Dispatcher,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            states: SubmissionStateMachine::new(store.clone()),
            store,
            notifier,
            dispatcher,
            settings,
            in_flight: DashMap::new(),
            pending_writes: DashMap::new(),
        }
    }

    /// Judge one submission end to end and return its final status.
    ///
    /// If a previous call judged the submission but could not persist it,
    /// only the write is retried.
    #[instrument(skip(self))]
    pub async fn judge_submission(&self, submission_id: i32) -> Result<SubmissionStatus> {
        let cached = self
            .pending_writes
            .get(&submission_id)
            .map(|entry| entry.clone());
        if let Some(judged) = cached {
            info!("Submission already judged, retrying durable write");
            return self.persist(&judged).await;
        }

        let SubmissionBundle {
            mut submission,
            limits,
            test_cases,
        } = self
            .store
            .load_submission_with_test_cases(submission_id)
            .await?;

        validate(&submission, &limits, &test_cases)?;
        self.states.claim(&mut submission).await?;

        let cancel = CancellationToken::new();
        self.in_flight.insert(submission_id, cancel.clone());
        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            submission_id,
        };

        info!(
            language = %submission.language,
            test_cases = test_cases.len(),
            "Judging submission"
        );
        let collector = self.run(&submission, limits, test_cases, &cancel).await;
        drop(guard);

        let summary = aggregate(collector.runs())?;
        SubmissionStateMachine::finalize(&mut submission, summary.verdict)?;
        submission.stdout = summary.stdout;
        submission.stderr = summary.stderr;
        submission.compile_output = summary.compile_output;
        submission.time_used = summary.time_used;
        submission.memory_used = summary.memory_used;

        info!(
            verdict = %summary.verdict,
            considered = summary.considered,
            time_used = ?submission.time_used,
            memory_used = ?submission.memory_used,
            "Submission judged"
        );

        let judged = JudgedSubmission {
            submission,
            runs: collector.into_runs(),
        };
        self.pending_writes.insert(submission_id, judged.clone());
        self.persist(&judged).await
    }

    /// Dispatch and collect until every relevant run is terminal.
    async fn run(
        &self,
        submission: &Submission,
        limits: JudgeLimits,
        test_cases: Vec<TestCaseRun>,
        cancel: &CancellationToken,
    ) -> ResultCollector {
        let mut collector = ResultCollector::new(test_cases, limits, self.settings.snippet_limit);
        let total = collector.len();
        let plan = DispatchPlan {
            submission_id: submission.id,
            language: submission.language.clone(),
            source_code: submission.source_code.clone(),
            limits,
            inputs: collector.runs().iter().map(|run| run.input.clone()).collect(),
        };

        let (mut session, mut rx) = self.dispatcher.start(plan, cancel.clone());
        let deadline = Instant::now() + self.settings.deadline;

        // The first case runs alone so a compile error stops everything else.
        session.dispatch([0]);
        let mut outcome = drain(&mut collector, &mut rx, cancel, deadline, |c| {
            c.verdict(0).is_some()
        })
        .await;

        if outcome.is_ok() {
            if collector.verdict(0) == Some(Verdict::CompileError) {
                debug!(
                    submission_id = submission.id,
                    skipped = total - 1,
                    "Compile error on first test case, skipping the rest"
                );
            } else {
                session.dispatch(1..total);
                session.close();
                outcome = drain(
                    &mut collector,
                    &mut rx,
                    cancel,
                    deadline,
                    ResultCollector::all_terminal,
                )
                .await;
            }
        }
        session.close();

        match outcome {
            Ok(()) => {
                let issued: Vec<usize> = (0..total).filter(|i| session.is_issued(*i)).collect();
                let lost = collector.resolve_unfinished(issued, "no result received");
                if lost > 0 {
                    warn!(
                        submission_id = submission.id,
                        lost, "Dispatch ended before all results arrived"
                    );
                }
            }
            Err(interrupt) => {
                cancel.cancel();
                let resolved = collector.resolve_unfinished(0..total, interrupt.reason());
                warn!(
                    submission_id = submission.id,
                    resolved,
                    reason = interrupt.reason(),
                    "Judging interrupted, unfinished test cases resolved as internal error"
                );
            }
        }

        collector.seal();
        collector
    }

    async fn persist(&self, judged: &JudgedSubmission) -> Result<SubmissionStatus> {
        let submission_id = judged.submission.id;
        let policy = self.settings.write_retry;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .save_judging_result(&judged.submission, &judged.runs)
                .await
            {
                Ok(()) => break,
                Err(e) if policy.should_retry(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        submission_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to persist judging result, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        submission_id,
                        attempts = attempt,
                        error = %e,
                        "Failed to persist judging result, keeping it cached"
                    );
                    return Err(JudgeError::Persistence {
                        submission_id,
                        source: e,
                    });
                }
            }
        }

        // Whoever removes the cache entry owns the notification.
        if self.pending_writes.remove(&submission_id).is_some() {
            self.notify(&judged.submission).await;
        }

        Ok(judged.submission.status)
    }

    async fn notify(&self, submission: &Submission) {
        let event = SubmissionJudged {
            time_used: submission.time_used,
            memory_used: submission.memory_used,
            ..SubmissionJudged::new(submission.id, submission.status)
        };
        if let Err(e) = self.notifier.submission_judged(&event).await {
            error!(submission_id = submission.id, error = %e, "Failed to send judged notification");
        }
    }

    /// Cancel in-flight judging of a submission. Returns false if it is not
    /// being judged here.
    pub fn cancel(&self, submission_id: i32) -> bool {
        match self.in_flight.get(&submission_id) {
            Some(token) => {
                info!(submission_id, "Cancelling judging");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Retry durable writes of every cached result. Returns how many succeeded.
    pub async fn flush_pending(&self) -> usize {
        let cached: Vec<JudgedSubmission> = self
            .pending_writes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut flushed = 0;
        for judged in cached {
            if self.persist(&judged).await.is_ok() {
                flushed += 1;
            }
        }
        if flushed > 0 {
            info!(flushed, "Flushed cached judging results");
        }
        flushed
    }

    /// Fail submissions left PENDING or RUNNING for longer than the stuck
    /// timeout as INTERNAL_ERROR, and notify for each. Cached results are
    /// flushed first; submissions judged or cached here are skipped.
    pub async fn recover_stuck(&self) -> Result<usize> {
        self.flush_pending().await;

        let Some(older_than) = chrono::Duration::from_std(self.settings.stuck_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
        else {
            return Ok(0);
        };

        let stuck = self.store.find_stuck(older_than).await?;
        let mut failed = 0;
        for submission_id in stuck {
            if self.is_judging(submission_id) || self.pending_writes.contains_key(&submission_id) {
                continue;
            }
            match self
                .store
                .fail_stuck(submission_id, older_than, STUCK_REASON)
                .await
            {
                Ok(Some(submission)) => {
                    warn!(submission_id, "Stuck submission finalized as internal error");
                    self.notify(&submission).await;
                    failed += 1;
                }
                Ok(None) => debug!(submission_id, "Submission moved on before recovery"),
                Err(e) => error!(submission_id, error = %e, "Failed to recover stuck submission"),
            }
        }
        Ok(failed)
    }

    pub fn is_judging(&self, submission_id: i32) -> bool {
        self.in_flight.contains_key(&submission_id)
    }

    /// Number of judged results waiting for a durable write.
    pub fn pending_writes(&self) -> usize {
        self.pending_writes.len()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Feed outcomes into the collector until `done` holds or the channel closes.
async fn drain(
    collector: &mut ResultCollector,
    rx: &mut mpsc::Receiver<RunOutcome>,
    cancel: &CancellationToken,
    deadline: Instant,
    done: impl Fn(&ResultCollector) -> bool,
) -> std::result::Result<(), Interrupt> {
    while !done(collector) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(Interrupt::DeadlineExceeded),
            outcome = rx.recv() => match outcome {
                Some(outcome) => {
                    collector.record(outcome);
                }
                None => break,
            },
        }
    }
    Ok(())
}

/// Reject malformed submissions before they are claimed.
fn validate(
    submission: &Submission,
    limits: &JudgeLimits,
    test_cases: &[TestCaseRun],
) -> Result<()> {
    let mut ordinals = HashSet::new();
    let reason = if submission.language.trim().is_empty() {
        Some("language is empty")
    } else if submission.source_code.trim().is_empty() {
        Some("source code is empty")
    } else if test_cases.is_empty() {
        Some("no test cases")
    } else if limits.time_limit_ms == 0 || limits.memory_limit_kb == 0 {
        Some("resource limits must be positive")
    } else if !test_cases.iter().all(|run| ordinals.insert(run.ordinal)) {
        Some("duplicate test case ordinal")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(JudgeError::Validation {
            submission_id: submission.id,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
