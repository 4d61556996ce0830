use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Submission, SubmissionStatus, TestCaseRun, Verdict};

use super::{ClaimOutcome, StoreError, SubmissionBundle, SubmissionStore, is_stuck};

/// In-process store, used for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bundles: Mutex<HashMap<i32, SubmissionBundle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intake: create a submission together with its pending runs.
    pub fn insert(&self, bundle: SubmissionBundle) {
        self.lock().insert(bundle.submission.id, bundle);
    }

    pub fn get(&self, submission_id: i32) -> Option<SubmissionBundle> {
        self.lock().get(&submission_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, SubmissionBundle>> {
        // A poisoned map is still structurally valid.
        self.bundles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn load_submission_with_test_cases(
        &self,
        submission_id: i32,
    ) -> Result<SubmissionBundle, StoreError> {
        self.get(submission_id)
            .ok_or(StoreError::NotFound(submission_id))
    }

    async fn try_claim(&self, submission_id: i32) -> Result<ClaimOutcome, StoreError> {
        let mut bundles = self.lock();
        let bundle = bundles
            .get_mut(&submission_id)
            .ok_or(StoreError::NotFound(submission_id))?;

        if bundle.submission.status != SubmissionStatus::Pending {
            return Ok(ClaimOutcome::Rejected(bundle.submission.status));
        }
        bundle.submission.status = SubmissionStatus::Running;
        bundle.submission.updated_at = Utc::now();
        Ok(ClaimOutcome::Claimed)
    }

    async fn save_judging_result(
        &self,
        submission: &Submission,
        runs: &[TestCaseRun],
    ) -> Result<(), StoreError> {
        let mut bundles = self.lock();
        let bundle = bundles
            .get_mut(&submission.id)
            .ok_or(StoreError::NotFound(submission.id))?;

        if bundle.submission.status.is_final() {
            return Ok(());
        }
        if !submission.status.is_final() {
            return Err(StoreError::Corrupt(format!(
                "refusing to save non-final status {} for submission {}",
                submission.status, submission.id
            )));
        }

        if let Some(foreign) = runs
            .iter()
            .find(|run| !bundle.test_cases.iter().any(|stored| stored.id == run.id))
        {
            return Err(StoreError::Corrupt(format!(
                "test case run {} does not belong to submission {}",
                foreign.id, submission.id
            )));
        }

        for run in runs {
            if let Some(stored) = bundle
                .test_cases
                .iter_mut()
                .find(|stored| stored.id == run.id && !stored.is_terminal())
            {
                *stored = run.clone();
            }
        }
        bundle.submission = submission.clone();
        Ok(())
    }

    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<i32>, StoreError> {
        let mut ids: Vec<i32> = self
            .lock()
            .values()
            .filter(|bundle| is_stuck(&bundle.submission, older_than))
            .map(|bundle| bundle.submission.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fail_stuck(
        &self,
        submission_id: i32,
        older_than: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<Submission>, StoreError> {
        let mut bundles = self.lock();
        let Some(bundle) = bundles.get_mut(&submission_id) else {
            return Ok(None);
        };
        if !is_stuck(&bundle.submission, older_than) {
            return Ok(None);
        }

        let now = Utc::now();
        for run in bundle.test_cases.iter_mut().filter(|run| !run.is_terminal()) {
            run.verdict = Some(Verdict::InternalError);
            run.passed = false;
            run.stderr = Some(reason.to_string());
            run.updated_at = now;
        }
        let submission = &mut bundle.submission;
        submission.status = SubmissionStatus::InternalError;
        submission.stderr = Some(reason.to_string());
        submission.updated_at = now;
        Ok(Some(submission.clone()))
    }
}
