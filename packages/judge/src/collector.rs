//! Result Collector - turns arriving run outcomes into terminal test case
//! runs.
//!
//! Each run is written exactly once. Duplicate or late outcomes are logged
//! and dropped; they are never surfaced as errors.

use chrono::Utc;
use common::{JudgeLimits, OutputCompare, TestCaseRun, Verdict};
use tracing::{debug, warn};

use crate::dispatcher::RunOutcome;
use crate::execution::RunResult;

/// Classify a completed run. Rules apply in order, first match wins.
pub fn classify(result: &RunResult, expected_output: &str, limits: &JudgeLimits) -> Verdict {
    if result.compile_failed {
        return Verdict::CompileError;
    }
    if result.exit_signal.is_some() || result.exit_code.is_some_and(|code| code != 0) {
        return Verdict::RuntimeError;
    }
    if result.time_ms > limits.time_limit_ms {
        return Verdict::TimeLimitExceeded;
    }
    if result.memory_kb > limits.memory_limit_kb {
        return Verdict::MemoryLimitExceeded;
    }
    if outputs_match(limits.compare, &result.stdout, expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

pub fn outputs_match(mode: OutputCompare, actual: &str, expected: &str) -> bool {
    match mode {
        OutputCompare::Exact => actual == expected,
        OutputCompare::TrimTrailing => trimmed_lines(actual) == trimmed_lines(expected),
        OutputCompare::IgnoreWhitespace => actual.split_whitespace().eq(expected.split_whitespace()),
    }
}

fn trimmed_lines(s: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = s.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Cap a snippet at `limit` bytes without splitting a character.
pub fn truncate_snippet(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn non_empty(s: &str, limit: usize) -> Option<String> {
    (!s.is_empty()).then(|| truncate_snippet(s, limit))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The run became terminal with this verdict.
    Applied(Verdict),
    /// The run was already terminal; nothing changed.
    Duplicate,
    /// The collector is sealed or the index is unknown; nothing changed.
    Discarded,
}

/// Holds one submission's runs, in dispatch order, while judging.
#[derive(Debug)]
pub struct ResultCollector {
    runs: Vec<TestCaseRun>,
    limits: JudgeLimits,
    snippet_limit: usize,
    sealed: bool,
}

impl ResultCollector {
    pub fn new(mut runs: Vec<TestCaseRun>, limits: JudgeLimits, snippet_limit: usize) -> Self {
        runs.sort_by_key(|run| run.ordinal);
        Self {
            runs,
            limits,
            snippet_limit,
            sealed: false,
        }
    }

    pub fn record(&mut self, outcome: RunOutcome) -> RecordOutcome {
        let index = outcome.index;
        if self.sealed {
            debug!(test_case = index, "Result arrived after finalization, discarding");
            return RecordOutcome::Discarded;
        }
        let Some(run) = self.runs.get_mut(index) else {
            warn!(test_case = index, "Result for unknown test case, discarding");
            return RecordOutcome::Discarded;
        };
        if run.is_terminal() {
            warn!(
                submission_id = run.submission_id,
                test_case = index,
                "Duplicate result for terminal test case, ignoring"
            );
            return RecordOutcome::Duplicate;
        }

        let limit = self.snippet_limit;
        let verdict = match outcome.result {
            Ok(result) => {
                let verdict = classify(&result, &run.expected_output, &self.limits);
                run.stdout = Some(truncate_snippet(&result.stdout, limit));
                run.stderr = non_empty(&result.stderr, limit);
                run.compile_output = result
                    .compile_output
                    .as_deref()
                    .and_then(|out| non_empty(out, limit));
                run.time_used = Some(result.time_ms as i64);
                run.memory_used = Some(result.memory_kb as i64);
                verdict
            }
            Err(e) => {
                run.stderr = Some(truncate_snippet(&e.to_string(), limit));
                Verdict::InternalError
            }
        };

        run.verdict = Some(verdict);
        run.passed = verdict.is_accepted();
        run.updated_at = Utc::now();
        debug!(
            submission_id = run.submission_id,
            test_case = index,
            verdict = %verdict,
            attempts = outcome.attempts,
            "Test case resolved"
        );
        RecordOutcome::Applied(verdict)
    }

    /// Resolve every still-pending run among `indices` as INTERNAL_ERROR.
    pub fn resolve_unfinished(
        &mut self,
        indices: impl IntoIterator<Item = usize>,
        reason: &str,
    ) -> usize {
        if self.sealed {
            return 0;
        }
        let now = Utc::now();
        let mut resolved = 0;
        for index in indices {
            if let Some(run) = self.runs.get_mut(index).filter(|run| !run.is_terminal()) {
                run.verdict = Some(Verdict::InternalError);
                run.passed = false;
                run.stderr = Some(reason.to_string());
                run.updated_at = now;
                resolved += 1;
            }
        }
        resolved
    }

    /// Refuse all further updates.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn verdict(&self, index: usize) -> Option<Verdict> {
        self.runs.get(index).and_then(|run| run.verdict)
    }

    pub fn all_terminal(&self) -> bool {
        self.runs.iter().all(TestCaseRun::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn runs(&self) -> &[TestCaseRun] {
        &self.runs
    }

    pub fn into_runs(self) -> Vec<TestCaseRun> {
        self.runs
    }
}
