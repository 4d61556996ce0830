use common::SubmissionStatus;
use thiserror::Error;

use crate::aggregator::AggregateError;
use crate::store::StoreError;

/// Rejected submission lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Submission {submission_id} already judged as {status}")]
    AlreadyJudged {
        submission_id: i32,
        status: SubmissionStatus,
    },

    #[error("Submission {submission_id} is already being judged")]
    AlreadyClaimed { submission_id: i32 },

    #[error("Submission {submission_id} cannot move from {from} to {to}")]
    Invalid {
        submission_id: i32,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
}

/// Errors surfaced by [`crate::Orchestrator::judge_submission`].
///
/// Failures of individual test cases never appear here; they resolve as
/// INTERNAL_ERROR runs instead.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Malformed submission, rejected before it is claimed.
    #[error("Invalid submission {submission_id}: {reason}")]
    Validation { submission_id: i32, reason: String },

    #[error("Submission {0} not found")]
    NotFound(i32),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Judging finished but the durable write did not; the result stays cached.
    #[error("Failed to persist judging result for submission {submission_id}: {source}")]
    Persistence {
        submission_id: i32,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Failed to aggregate verdict: {0}")]
    Aggregate(#[from] AggregateError),
}

impl From<StoreError> for JudgeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => JudgeError::NotFound(id),
            other => JudgeError::Store(other),
        }
    }
}

impl JudgeError {
    /// True for duplicate deliveries of work that is running or done.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::Transition(
                TransitionError::AlreadyJudged { .. } | TransitionError::AlreadyClaimed { .. }
            )
        )
    }

    /// True when asking again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Store(_))
    }
}

/// Startup failures of the judge binary.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Execution client error: {0}")]
    Execution(#[from] crate::execution::ExecutionError),
}

pub type Result<T> = std::result::Result<T, JudgeError>;
