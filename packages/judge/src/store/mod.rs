//! Persistence Port - the judge's only view of the relational schema.

pub mod entity;
pub mod memory;
pub mod sea;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{JudgeLimits, Submission, SubmissionStatus, TestCaseRun};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sea::SeaOrmStore;

/// A submission with everything needed to judge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionBundle {
    pub submission: Submission,
    pub limits: JudgeLimits,
    pub test_cases: Vec<TestCaseRun>,
}

/// Result of the atomic PENDING -> RUNNING claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Someone else moved the submission first; carries its current status.
    Rejected(SubmissionStatus),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Submission {0} not found")]
    NotFound(i32),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored data is inconsistent: {0}")]
    Corrupt(String),
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(e: sea_orm::DbErr) -> Self {
        match e {
            sea_orm::DbErr::ConnectionAcquire(_) | sea_orm::DbErr::Conn(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn load_submission_with_test_cases(
        &self,
        submission_id: i32,
    ) -> Result<SubmissionBundle, StoreError>;

    /// Compare-and-swap the submission from PENDING to RUNNING.
    async fn try_claim(&self, submission_id: i32) -> Result<ClaimOutcome, StoreError>;

    /// Write the final submission and its runs in one atomic step.
    ///
    /// Writing a submission that is already final is a successful no-op, so
    /// retried writes are idempotent.
    async fn save_judging_result(
        &self,
        submission: &Submission,
        runs: &[TestCaseRun],
    ) -> Result<(), StoreError>;

    /// Ids of PENDING or RUNNING submissions last touched before `older_than`.
    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<i32>, StoreError>;

    /// Finalize a stuck submission as INTERNAL_ERROR, together with its
    /// unresolved runs. Returns `None` if it moved on or was touched since
    /// `older_than`.
    async fn fail_stuck(
        &self,
        submission_id: i32,
        older_than: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<Submission>, StoreError>;
}

/// True for a submission left in a non-final state since before `older_than`.
pub(crate) fn is_stuck(submission: &Submission, older_than: DateTime<Utc>) -> bool {
    !submission.status.is_final() && submission.updated_at < older_than
}
