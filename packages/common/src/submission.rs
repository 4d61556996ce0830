use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SubmissionStatus, Verdict};

/// How program output is compared against the expected output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCompare {
    /// Byte-for-byte equality.
    Exact,
    /// Trailing whitespace is trimmed per line and trailing empty lines are ignored.
    #[default]
    TrimTrailing,
    /// Outputs are compared as whitespace-separated token sequences.
    IgnoreWhitespace,
}

/// Per-problem resource limits applied to every test case run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeLimits {
    /// Time limit in milliseconds.
    pub time_limit_ms: u64,
    /// Memory limit in kilobytes.
    pub memory_limit_kb: u64,
    #[serde(default)]
    pub compare: OutputCompare,
}

/// One user's attempt at solving a problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i32,
    pub user_id: i32,
    pub problem_id: i32,
    pub language: String,
    pub source_code: String,
    pub status: SubmissionStatus,
    /// Representative stdout snippet (first failing run, or the last run).
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    /// Maximum time across runs, in milliseconds.
    pub time_used: Option<i64>,
    /// Maximum memory across runs, in kilobytes.
    pub memory_used: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Execution record of one test case against one submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRun {
    pub id: i32,
    pub submission_id: i32,
    /// Zero-based dispatch order.
    pub ordinal: i32,
    /// Data fed to the program on stdin.
    pub input: String,
    pub expected_output: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub passed: bool,
    /// `None` while the run is pending.
    pub verdict: Option<Verdict>,
    pub time_used: Option<i64>,
    pub memory_used: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestCaseRun {
    /// Create a pending run as the intake path does.
    pub fn pending(
        id: i32,
        submission_id: i32,
        ordinal: i32,
        input: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            submission_id,
            ordinal,
            input: input.into(),
            expected_output: expected_output.into(),
            stdout: None,
            stderr: None,
            compile_output: None,
            passed: false,
            verdict: None,
            time_used: None,
            memory_used: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.verdict.is_some()
    }
}

impl Submission {
    /// Create a pending submission as the intake path does.
    pub fn pending(
        id: i32,
        user_id: i32,
        problem_id: i32,
        language: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            problem_id,
            language: language.into(),
            source_code: source_code.into(),
            status: SubmissionStatus::Pending,
            stdout: None,
            stderr: None,
            compile_output: None,
            time_used: None,
            memory_used: None,
            created_at: now,
            updated_at: now,
        }
    }
}
