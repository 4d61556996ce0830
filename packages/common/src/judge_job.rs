use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to judge a submission, published after the submission and its
/// test case runs are durably created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeRequest {
    /// Request identifier (UUID). Distinct per enqueue, not per submission.
    pub request_id: String,
    /// ID of the submission to judge.
    pub submission_id: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl JudgeRequest {
    pub fn new(submission_id: i32) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            submission_id,
            enqueued_at: Utc::now(),
        }
    }
}
