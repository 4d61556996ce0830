//! Submission State Machine.
//!
//! PENDING -> RUNNING -> one final status. The claim into RUNNING is an
//! atomic compare-and-swap in the store, so duplicate enqueues of the same
//! submission never judge it twice.

use std::sync::Arc;

use chrono::Utc;
use common::{Submission, SubmissionStatus, Verdict};
use tracing::{debug, info};

use crate::error::{JudgeError, TransitionError};
use crate::store::{ClaimOutcome, SubmissionStore};

/// Check a lifecycle move without performing it.
pub fn check_transition(
    submission_id: i32,
    from: SubmissionStatus,
    to: SubmissionStatus,
) -> Result<(), TransitionError> {
    use SubmissionStatus::*;

    match (from, to) {
        (Pending, Running) => Ok(()),
        (Running, to) if to.is_final() => Ok(()),
        (from, _) if from.is_final() => Err(TransitionError::AlreadyJudged {
            submission_id,
            status: from,
        }),
        (Running, Running) => Err(TransitionError::AlreadyClaimed { submission_id }),
        (from, to) => Err(TransitionError::Invalid {
            submission_id,
            from,
            to,
        }),
    }
}

#[derive(Clone)]
pub struct SubmissionStateMachine {
    store: Arc<dyn SubmissionStore>,
}

impl SubmissionStateMachine {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    /// Claim the submission for judging. On success `submission` is RUNNING
    /// and this caller owns it until it is finalized.
    pub async fn claim(&self, submission: &mut Submission) -> Result<(), JudgeError> {
        check_transition(submission.id, submission.status, SubmissionStatus::Running)?;

        match self.store.try_claim(submission.id).await? {
            ClaimOutcome::Claimed => {
                submission.status = SubmissionStatus::Running;
                submission.updated_at = Utc::now();
                info!(submission_id = submission.id, "Submission claimed");
                Ok(())
            }
            ClaimOutcome::Rejected(current) => {
                debug!(
                    submission_id = submission.id,
                    status = %current,
                    "Claim lost to another worker"
                );
                submission.status = current;
                check_transition(submission.id, current, SubmissionStatus::Running)?;
                // The row went back to PENDING between load and claim.
                Err(TransitionError::AlreadyClaimed {
                    submission_id: submission.id,
                }
                .into())
            }
        }
    }

    /// Move a RUNNING submission to its final status, in memory only.
    pub fn finalize(submission: &mut Submission, verdict: Verdict) -> Result<(), TransitionError> {
        let to = SubmissionStatus::from(verdict);
        check_transition(submission.id, submission.status, to)?;
        submission.status = to;
        submission.updated_at = Utc::now();
        Ok(())
    }
}
