pub mod config;
pub mod judge_job;
pub mod judge_result;
pub mod retry;
pub mod submission;
pub mod submission_status;

pub use submission::{JudgeLimits, OutputCompare, Submission, TestCaseRun};
pub use submission_status::{SubmissionStatus, Verdict};
