//! Test Case Dispatcher - fans out one submission's test cases to the
//! Execution Service under a per-submission cap and the global limiter.
//!
//! Cases are issued in the order requested; completions arrive on a bounded
//! channel in whatever order they finish. A transient failure is retried for
//! that case alone, and exhaustion is reported as an error outcome rather
//! than aborting siblings.

use std::sync::Arc;
use std::time::Duration;

use common::JudgeLimits;
use common::retry::BackoffPolicy;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::execution::{ExecutionError, ExecutionService, RunRequest, RunResult, run_to_completion};
use crate::limiter::DispatchLimiter;

/// Completed (or abandoned) execution of one test case.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Position of the case in dispatch order.
    pub index: usize,
    pub result: Result<RunResult, ExecutionError>,
    pub attempts: u32,
}

/// What to run for one submission.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub submission_id: i32,
    pub language: String,
    pub source_code: String,
    pub limits: JudgeLimits,
    /// Stdin per case, in dispatch order.
    pub inputs: Vec<String>,
}

impl DispatchPlan {
    fn request(&self, index: usize) -> Option<RunRequest> {
        self.inputs.get(index).map(|stdin| RunRequest {
            language: self.language.clone(),
            source_code: self.source_code.clone(),
            stdin: stdin.clone(),
            time_limit_ms: self.limits.time_limit_ms,
            memory_limit_kb: self.limits.memory_limit_kb,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub per_submission_limit: usize,
    pub retry: BackoffPolicy,
    /// Added to the time limit to bound one Execution Service call.
    pub safety_margin: Duration,
}

#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<dyn ExecutionService>,
    limiter: DispatchLimiter,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        service: Arc<dyn ExecutionService>,
        limiter: DispatchLimiter,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            service,
            limiter,
            settings,
        }
    }

    pub fn limiter(&self) -> &DispatchLimiter {
        &self.limiter
    }

    /// Open a dispatch session for one submission attempt.
    ///
    /// The receiver yields one [`RunOutcome`] per dispatched case and closes
    /// once the session is closed and every dispatched case has reported.
    pub fn start(
        &self,
        plan: DispatchPlan,
        cancel: CancellationToken,
    ) -> (DispatchSession, mpsc::Receiver<RunOutcome>) {
        let per_submission = self.settings.per_submission_limit.max(1);
        let (tx, rx) = mpsc::channel(per_submission);
        let issued = vec![false; plan.inputs.len()];

        let session = DispatchSession {
            ctx: Arc::new(CaseContext {
                service: self.service.clone(),
                limiter: self.limiter.clone(),
                retry: self.settings.retry,
                timeout: Duration::from_millis(plan.limits.time_limit_ms)
                    + self.settings.safety_margin,
                plan,
            }),
            local: Arc::new(Semaphore::new(per_submission)),
            issued,
            tx: Some(tx),
            cancel,
        };
        (session, rx)
    }
}

struct CaseContext {
    service: Arc<dyn ExecutionService>,
    limiter: DispatchLimiter,
    retry: BackoffPolicy,
    timeout: Duration,
    plan: DispatchPlan,
}

/// Per-submission dispatch state. Each case is issued at most once.
pub struct DispatchSession {
    ctx: Arc<CaseContext>,
    local: Arc<Semaphore>,
    issued: Vec<bool>,
    tx: Option<mpsc::Sender<RunOutcome>>,
    cancel: CancellationToken,
}

impl DispatchSession {
    /// Issue the given cases in order. Returns how many were newly issued;
    /// cases already issued or out of range are skipped.
    pub fn dispatch(&mut self, indices: impl IntoIterator<Item = usize>) -> usize {
        let Some(tx) = self.tx.clone() else {
            return 0;
        };
        let submission_id = self.ctx.plan.submission_id;

        let mut batch = Vec::new();
        for index in indices {
            match self.issued.get_mut(index) {
                Some(issued) if !*issued => {
                    *issued = true;
                    batch.push(index);
                }
                Some(_) => warn!(submission_id, test_case = index, "Test case already dispatched"),
                None => warn!(submission_id, test_case = index, "No such test case"),
            }
        }
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        let ctx = self.ctx.clone();
        let local = self.local.clone();
        let cancel = self.cancel.clone();

        // Permits are taken in order so cases start in dispatch order.
        tokio::spawn(async move {
            for index in batch {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    permit = local.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                debug!(submission_id, test_case = index, "Dispatching test case");
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let (result, attempts) = run_case(&ctx, index, &cancel).await;
                    drop(permit);
                    let outcome = RunOutcome {
                        index,
                        result,
                        attempts,
                    };
                    if tx.send(outcome).await.is_err() {
                        debug!(
                            submission_id,
                            test_case = index,
                            "Collector gone, discarding late result"
                        );
                    }
                });
            }
        });

        count
    }

    /// Stop accepting new cases; the receiver closes once in-flight cases report.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_issued(&self, index: usize) -> bool {
        self.issued.get(index).copied().unwrap_or(false)
    }
}

/// Run one case with bounded retries. The global slot is held per attempt,
/// not across backoff sleeps.
async fn run_case(
    ctx: &CaseContext,
    index: usize,
    cancel: &CancellationToken,
) -> (Result<RunResult, ExecutionError>, u32) {
    let submission_id = ctx.plan.submission_id;
    let Some(request) = ctx.plan.request(index) else {
        return (
            Err(ExecutionError::InvalidResponse(format!(
                "test case {index} has no input"
            ))),
            0,
        );
    };

    let mut attempt = 0;
    loop {
        attempt += 1;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (Err(ExecutionError::Cancelled), attempt - 1),
            permit = ctx.limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => return (Err(ExecutionError::Unavailable(e.to_string())), attempt - 1),
            },
        };

        let result =
            run_to_completion(ctx.service.as_ref(), &request, ctx.timeout, cancel).await;
        permit.release();

        match result {
            Ok(run) => return (Ok(run), attempt),
            Err(e) if !e.is_retryable() => return (Err(e), attempt),
            Err(e) if ctx.retry.should_retry(attempt) => {
                let delay = ctx.retry.delay(attempt);
                warn!(
                    submission_id,
                    test_case = index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Execution service call failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return (Err(ExecutionError::Cancelled), attempt),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!(
                    submission_id,
                    test_case = index,
                    attempts = attempt,
                    error = %e,
                    "Execution service retries exhausted"
                );
                return (Err(e), attempt);
            }
        }
    }
}
