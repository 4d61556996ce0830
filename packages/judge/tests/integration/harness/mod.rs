use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::judge_result::SubmissionJudged;
use common::retry::BackoffPolicy;
use common::{JudgeLimits, Submission, TestCaseRun};
use judge::dispatcher::{DispatchSettings, Dispatcher};
use judge::notify::ChannelNotifier;
use judge::store::{ClaimOutcome, MemoryStore, StoreError, SubmissionBundle, SubmissionStore};
use judge::{
    DispatchLimiter, ExecutionError, ExecutionService, Orchestrator, OrchestratorSettings,
    RunHandle, RunRequest, RunResult,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const TIME_LIMIT_MS: u64 = 1000;
pub const MEMORY_LIMIT_KB: u64 = 65536;

/// What the scripted service does with one run.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Finish after `after` with the given stdout and resource usage.
    Output {
        stdout: String,
        time_ms: u64,
        memory_kb: u64,
        after: Duration,
    },
    CompileError,
    /// Refuse the run as if the backend were down.
    Unavailable,
    /// Never finish.
    Hang,
    /// Echo stdin after `after`, even if the run was cancelled meanwhile.
    IgnoresCancel { after: Duration },
}

impl Behavior {
    pub fn echo(stdout: &str) -> Self {
        Self::Output {
            stdout: stdout.to_string(),
            time_ms: 10,
            memory_kb: 1024,
            after: Duration::from_millis(20),
        }
    }

    pub fn slow(time_ms: u64) -> Self {
        Self::Output {
            stdout: String::new(),
            time_ms,
            memory_kb: 1024,
            after: Duration::from_millis(20),
        }
    }
}

type Script = Box<dyn Fn(&str) -> Behavior + Send + Sync>;

struct PendingRun {
    stdin: String,
    ready_at: Instant,
    result: RunResult,
    ignores_cancel: bool,
}

/// Execution Service double driven by a per-stdin script.
pub struct ScriptedService {
    script: Script,
    runs: Mutex<HashMap<String, PendingRun>>,
    next_handle: AtomicUsize,
    calls: AtomicUsize,
    started: Mutex<Vec<String>>,
    delivered: Mutex<Vec<String>>,
    cancelled: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedService {
    pub fn new(script: impl Fn(&str) -> Behavior + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            runs: Mutex::new(HashMap::new()),
            next_handle: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Echo every stdin back after a short delay.
    pub fn echo() -> Arc<Self> {
        Self::new(Behavior::echo)
    }

    /// Every `run` call, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stdin of every accepted run, in submission order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Stdin of every run whose result was handed back.
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn finish(&self, handle: &RunHandle) -> Option<PendingRun> {
        let run = self.runs.lock().unwrap().remove(&handle.0);
        if run.is_some() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        run
    }
}

#[async_trait]
impl ExecutionService for ScriptedService {
    async fn run(&self, request: &RunRequest) -> Result<RunHandle, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut ignores_cancel = false;
        let (after, result) = match (self.script)(&request.stdin) {
            Behavior::Unavailable => {
                return Err(ExecutionError::Unavailable("connection refused".into()));
            }
            Behavior::Output {
                stdout,
                time_ms,
                memory_kb,
                after,
            } => (
                after,
                RunResult {
                    stdout,
                    exit_code: Some(0),
                    time_ms,
                    memory_kb,
                    ..Default::default()
                },
            ),
            Behavior::CompileError => (
                Duration::from_millis(5),
                RunResult {
                    compile_failed: true,
                    compile_output: Some("main.py:1: SyntaxError".into()),
                    ..Default::default()
                },
            ),
            Behavior::Hang => (Duration::from_secs(3600), RunResult::default()),
            Behavior::IgnoresCancel { after } => {
                ignores_cancel = true;
                (
                    after,
                    RunResult {
                        stdout: format!("{}\n", request.stdin),
                        exit_code: Some(0),
                        time_ms: 10,
                        memory_kb: 1024,
                        ..Default::default()
                    },
                )
            }
        };

        let handle = RunHandle(format!(
            "run-{}",
            self.next_handle.fetch_add(1, Ordering::SeqCst)
        ));
        self.started.lock().unwrap().push(request.stdin.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.runs.lock().unwrap().insert(
            handle.0.clone(),
            PendingRun {
                stdin: request.stdin.clone(),
                ready_at: Instant::now() + after,
                result,
                ignores_cancel,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<Option<RunResult>, ExecutionError> {
        let ready = match self.runs.lock().unwrap().get(&handle.0) {
            Some(run) => Instant::now() >= run.ready_at,
            None => return Err(ExecutionError::InvalidResponse("unknown run".into())),
        };
        if !ready {
            return Ok(None);
        }
        Ok(self.finish(handle).map(|run| {
            self.delivered.lock().unwrap().push(run.stdin);
            run.result
        }))
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), ExecutionError> {
        if self.finish(handle).is_some() {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(5)
    }

    async fn await_result(
        &self,
        handle: &RunHandle,
        cancel: &CancellationToken,
    ) -> Result<RunResult, ExecutionError> {
        let ignores_cancel = self
            .runs
            .lock()
            .unwrap()
            .get(&handle.0)
            .is_some_and(|run| run.ignores_cancel);
        loop {
            if let Some(result) = self.poll(handle).await? {
                return Ok(result);
            }
            tokio::select! {
                _ = cancel.cancelled(), if !ignores_cancel => {
                    self.cancel(handle).await?;
                    return Err(ExecutionError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval()) => {}
            }
        }
    }
}

/// Store whose first `save_failures` writes fail.
pub struct FlakyStore {
    inner: MemoryStore,
    save_failures: AtomicUsize,
    saves: AtomicUsize,
    lose_claim_ack: AtomicBool,
}

impl FlakyStore {
    pub fn new(save_failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            save_failures: AtomicUsize::new(save_failures),
            saves: AtomicUsize::new(0),
            lose_claim_ack: AtomicBool::new(false),
        }
    }

    pub fn fail_next_saves(&self, n: usize) {
        self.save_failures.store(n, Ordering::SeqCst);
    }

    /// Apply the next claim but report a connection failure to the caller.
    pub fn lose_next_claim_ack(&self) {
        self.lose_claim_ack.store(true, Ordering::SeqCst);
    }

    /// Save attempts, failed ones included.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn insert(&self, bundle: SubmissionBundle) {
        self.inner.insert(bundle);
    }

    pub fn get(&self, submission_id: i32) -> Option<SubmissionBundle> {
        self.inner.get(submission_id)
    }
}

#[async_trait]
impl SubmissionStore for FlakyStore {
    async fn load_submission_with_test_cases(
        &self,
        submission_id: i32,
    ) -> Result<SubmissionBundle, StoreError> {
        self.inner.load_submission_with_test_cases(submission_id).await
    }

    async fn try_claim(&self, submission_id: i32) -> Result<ClaimOutcome, StoreError> {
        let outcome = self.inner.try_claim(submission_id).await?;
        if self.lose_claim_ack.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(outcome)
    }

    async fn save_judging_result(
        &self,
        submission: &Submission,
        runs: &[TestCaseRun],
    ) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .save_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("database is restarting".into()));
        }
        self.inner.save_judging_result(submission, runs).await
    }

    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<i32>, StoreError> {
        self.inner.find_stuck(older_than).await
    }

    async fn fail_stuck(
        &self,
        submission_id: i32,
        older_than: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<Submission>, StoreError> {
        self.inner.fail_stuck(submission_id, older_than, reason).await
    }
}

pub struct TestJudgeBuilder {
    service: Arc<ScriptedService>,
    per_submission_limit: usize,
    global_limit: usize,
    save_failures: usize,
    write_attempts: u32,
    deadline: Duration,
    stuck_timeout: Duration,
}

impl TestJudgeBuilder {
    pub fn per_submission_limit(mut self, limit: usize) -> Self {
        self.per_submission_limit = limit;
        self
    }

    pub fn global_limit(mut self, limit: usize) -> Self {
        self.global_limit = limit;
        self
    }

    pub fn save_failures(mut self, failures: usize, write_attempts: u32) -> Self {
        self.save_failures = failures;
        self.write_attempts = write_attempts;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }

    pub fn build(self) -> TestJudge {
        let store = Arc::new(FlakyStore::new(self.save_failures));
        let (notifier, notifications) = ChannelNotifier::new();
        let dispatcher = Dispatcher::new(
            self.service.clone(),
            DispatchLimiter::new(self.global_limit),
            DispatchSettings {
                per_submission_limit: self.per_submission_limit,
                retry: BackoffPolicy::new(3, 1, 5),
                safety_margin: Duration::from_secs(10),
            },
        );
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(notifier),
            dispatcher,
            OrchestratorSettings {
                deadline: self.deadline,
                snippet_limit: 256,
                write_retry: BackoffPolicy::new(self.write_attempts, 1, 5),
                stuck_timeout: self.stuck_timeout,
            },
        ));

        TestJudge {
            service: self.service,
            store,
            orchestrator,
            notifications,
        }
    }
}

pub struct TestJudge {
    pub service: Arc<ScriptedService>,
    pub store: Arc<FlakyStore>,
    pub orchestrator: Arc<Orchestrator>,
    notifications: mpsc::UnboundedReceiver<SubmissionJudged>,
}

impl TestJudge {
    pub fn builder(service: Arc<ScriptedService>) -> TestJudgeBuilder {
        TestJudgeBuilder {
            service,
            per_submission_limit: 4,
            global_limit: 32,
            save_failures: 0,
            write_attempts: 3,
            deadline: Duration::from_secs(10),
            stuck_timeout: Duration::from_secs(60),
        }
    }

    pub fn new(service: Arc<ScriptedService>) -> Self {
        Self::builder(service).build()
    }

    /// Create a pending submission whose test cases are `(stdin, expected)`.
    pub fn seed(&self, submission_id: i32, cases: &[(&str, &str)]) {
        let test_cases = cases
            .iter()
            .enumerate()
            .map(|(ordinal, (input, expected))| {
                TestCaseRun::pending(
                    submission_id * 100 + ordinal as i32,
                    submission_id,
                    ordinal as i32,
                    *input,
                    *expected,
                )
            })
            .collect();

        self.store.insert(SubmissionBundle {
            submission: Submission::pending(submission_id, 1, 1, "python", "print(input())"),
            limits: JudgeLimits {
                time_limit_ms: TIME_LIMIT_MS,
                memory_limit_kb: MEMORY_LIMIT_KB,
                compare: Default::default(),
            },
            test_cases,
        });
    }

    pub fn stored(&self, submission_id: i32) -> SubmissionBundle {
        self.store.get(submission_id).unwrap()
    }

    /// Notifications received so far.
    pub fn notifications(&mut self) -> Vec<SubmissionJudged> {
        let mut events = Vec::new();
        while let Ok(event) = self.notifications.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
