use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SubmissionStatus;

/// Finalize notification, emitted once per submission after its verdict
/// has been durably written.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SubmissionJudged {
    pub submission_id: i32,
    /// Final status; always a final verdict.
    pub status: SubmissionStatus,
    /// Maximum time used across all test cases (milliseconds).
    pub time_used: Option<i64>,
    /// Maximum memory used across all test cases (kilobytes).
    pub memory_used: Option<i64>,
    pub judged_at: DateTime<Utc>,
}

impl SubmissionJudged {
    pub fn new(submission_id: i32, status: SubmissionStatus) -> Self {
        Self {
            submission_id,
            status,
            time_used: None,
            memory_used: None,
            judged_at: Utc::now(),
        }
    }
}
