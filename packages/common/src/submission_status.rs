#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Terminal outcome of a single test case run.
///
/// Verdicts are totally ordered by [`Verdict::severity`]; the verdict of a
/// whole submission is the most severe verdict among its runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Output matched the expected output within limits.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ACCEPTED"))]
    Accepted,
    /// Output did not match the expected output.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "WRONG_ANSWER"))]
    WrongAnswer,
    /// Peak memory exceeded the problem limit.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "MEMORY_LIMIT_EXCEEDED"))]
    MemoryLimitExceeded,
    /// Elapsed time exceeded the problem limit.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "TIME_LIMIT_EXCEEDED"))]
    TimeLimitExceeded,
    /// Program crashed, was signalled, or exited non-zero.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "RUNTIME_ERROR"))]
    RuntimeError,
    /// The judge could not obtain a result for this run.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "INTERNAL_ERROR"))]
    InternalError,
    /// Source failed to compile.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "COMPILE_ERROR"))]
    CompileError,
}

impl Verdict {
    /// Precedence rank, higher wins during aggregation.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::WrongAnswer => 1,
            Self::MemoryLimitExceeded => 2,
            Self::TimeLimitExceeded => 3,
            Self::RuntimeError => 4,
            Self::InternalError => 5,
            Self::CompileError => 6,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// All verdicts, lowest precedence first.
    pub const ALL: &'static [Verdict] = &[
        Self::Accepted,
        Self::WrongAnswer,
        Self::MemoryLimitExceeded,
        Self::TimeLimitExceeded,
        Self::RuntimeError,
        Self::InternalError,
        Self::CompileError,
    ];

    pub fn as_str(&self) -> &'static str {
        SubmissionStatus::from(*self).as_str()
    }
}

impl PartialOrd for Verdict {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Verdict {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a submission during the judging lifecycle.
///
/// `Pending` and `Running` are the only non-final states. Every other value
/// mirrors a [`Verdict`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    /// Waiting to be claimed by a judge.
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PENDING"))]
    Pending,
    /// Claimed; test cases are being executed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "RUNNING"))]
    Running,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ACCEPTED"))]
    Accepted,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "WRONG_ANSWER"))]
    WrongAnswer,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "COMPILE_ERROR"))]
    CompileError,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "RUNTIME_ERROR"))]
    RuntimeError,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "TIME_LIMIT_EXCEEDED"))]
    TimeLimitExceeded,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "MEMORY_LIMIT_EXCEEDED"))]
    MemoryLimitExceeded,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "INTERNAL_ERROR"))]
    InternalError,
}

impl SubmissionStatus {
    /// Returns true if this is a final verdict (judging is complete).
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// The verdict carried by a final status.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Pending | Self::Running => None,
            Self::Accepted => Some(Verdict::Accepted),
            Self::WrongAnswer => Some(Verdict::WrongAnswer),
            Self::CompileError => Some(Verdict::CompileError),
            Self::RuntimeError => Some(Verdict::RuntimeError),
            Self::TimeLimitExceeded => Some(Verdict::TimeLimitExceeded),
            Self::MemoryLimitExceeded => Some(Verdict::MemoryLimitExceeded),
            Self::InternalError => Some(Verdict::InternalError),
        }
    }

    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Pending,
        Self::Running,
        Self::Accepted,
        Self::WrongAnswer,
        Self::CompileError,
        Self::RuntimeError,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Accepted => "ACCEPTED",
            Self::WrongAnswer => "WRONG_ANSWER",
            Self::CompileError => "COMPILE_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            Self::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl From<Verdict> for SubmissionStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => Self::Accepted,
            Verdict::WrongAnswer => Self::WrongAnswer,
            Verdict::CompileError => Self::CompileError,
            Verdict::RuntimeError => Self::RuntimeError,
            Verdict::TimeLimitExceeded => Self::TimeLimitExceeded,
            Verdict::MemoryLimitExceeded => Self::MemoryLimitExceeded,
            Verdict::InternalError => Self::InternalError,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status '{invalid}'")]
pub struct ParseStatusError {
    invalid: String,
}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}
