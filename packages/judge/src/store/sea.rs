use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{JudgeLimits, Submission, SubmissionStatus, TestCaseRun, Verdict};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use tracing::{debug, info, instrument};

use super::entity::{problem, submission, test_case_run};
use super::{ClaimOutcome, StoreError, SubmissionBundle, SubmissionStore, is_stuck};

const UNFINISHED: [SubmissionStatus; 2] = [SubmissionStatus::Pending, SubmissionStatus::Running];

/// Relational store backed by SeaORM.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn limit(value: i32, what: &str, problem_id: i32) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| {
        StoreError::Corrupt(format!("problem {problem_id} has negative {what} {value}"))
    })
}

#[async_trait]
impl SubmissionStore for SeaOrmStore {
    #[instrument(skip(self))]
    async fn load_submission_with_test_cases(
        &self,
        submission_id: i32,
    ) -> Result<SubmissionBundle, StoreError> {
        let submission = submission::Entity::find_by_id(submission_id)
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound(submission_id))?;

        let problem = problem::Entity::find_by_id(submission.problem_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "submission {submission_id} references missing problem {}",
                    submission.problem_id
                ))
            })?;

        let compare = problem.compare().ok_or_else(|| {
            StoreError::Corrupt(format!(
                "problem {} has unknown compare mode {:?}",
                problem.id, problem.compare_mode
            ))
        })?;
        let limits = JudgeLimits {
            time_limit_ms: limit(problem.time_limit, "time limit", problem.id)?,
            memory_limit_kb: limit(problem.memory_limit, "memory limit", problem.id)?,
            compare,
        };

        let test_cases = test_case_run::Entity::find()
            .filter(test_case_run::Column::SubmissionId.eq(submission_id))
            .order_by_asc(test_case_run::Column::Ordinal)
            .all(&self.db)
            .await?
            .into_iter()
            .map(TestCaseRun::from)
            .collect();

        Ok(SubmissionBundle {
            submission: submission.into(),
            limits,
            test_cases,
        })
    }

    #[instrument(skip(self))]
    async fn try_claim(&self, submission_id: i32) -> Result<ClaimOutcome, StoreError> {
        let result = submission::Entity::update_many()
            .col_expr(
                submission::Column::Status,
                Expr::value(SubmissionStatus::Running.as_str()),
            )
            .col_expr(submission::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(submission::Column::Id.eq(submission_id))
            .filter(submission::Column::Status.eq(SubmissionStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(ClaimOutcome::Claimed);
        }

        let current = submission::Entity::find_by_id(submission_id)
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound(submission_id))?;
        Ok(ClaimOutcome::Rejected(current.status))
    }

    #[instrument(skip(self, submission, runs), fields(submission_id = submission.id))]
    async fn save_judging_result(
        &self,
        submission: &Submission,
        runs: &[TestCaseRun],
    ) -> Result<(), StoreError> {
        if !submission.status.is_final() {
            return Err(StoreError::Corrupt(format!(
                "refusing to save non-final status {} for submission {}",
                submission.status, submission.id
            )));
        }

        let txn = self.db.begin().await?;

        let current = submission::Entity::find_by_id(submission.id)
            .lock(LockType::Update)
            .one(&txn)
            .await?;
        let Some(current) = current else {
            txn.rollback().await?;
            return Err(StoreError::NotFound(submission.id));
        };
        if current.status.is_final() {
            debug!(status = %current.status, "Result already stored, skipping write");
            txn.rollback().await?;
            return Ok(());
        }

        // Runs left pending by a compile error short-circuit stay untouched.
        for run in runs.iter().filter(|run| run.is_terminal()) {
            let update = test_case_run::ActiveModel {
                stdout: Set(run.stdout.clone()),
                stderr: Set(run.stderr.clone()),
                compile_output: Set(run.compile_output.clone()),
                passed: Set(run.passed),
                verdict: Set(run.verdict),
                time_used: Set(run.time_used),
                memory_used: Set(run.memory_used),
                updated_at: Set(run.updated_at),
                ..Default::default()
            };
            test_case_run::Entity::update_many()
                .set(update)
                .filter(test_case_run::Column::Id.eq(run.id))
                .filter(test_case_run::Column::SubmissionId.eq(submission.id))
                .filter(test_case_run::Column::Verdict.is_null())
                .exec(&txn)
                .await?;
        }

        let update = submission::ActiveModel {
            status: Set(submission.status),
            stdout: Set(submission.stdout.clone()),
            stderr: Set(submission.stderr.clone()),
            compile_output: Set(submission.compile_output.clone()),
            time_used: Set(submission.time_used),
            memory_used: Set(submission.memory_used),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        submission::Entity::update_many()
            .set(update)
            .filter(submission::Column::Id.eq(submission.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<i32>, StoreError> {
        let stuck = submission::Entity::find()
            .filter(submission::Column::Status.is_in(UNFINISHED.map(|s| s.as_str())))
            .filter(submission::Column::UpdatedAt.lt(older_than))
            .order_by_asc(submission::Column::Id)
            .all(&self.db)
            .await?;
        Ok(stuck.into_iter().map(|row| row.id).collect())
    }

    #[instrument(skip(self))]
    async fn fail_stuck(
        &self,
        submission_id: i32,
        older_than: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<Submission>, StoreError> {
        let txn = self.db.begin().await?;

        let current = submission::Entity::find_by_id(submission_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?;
        let Some(current) = current else {
            txn.rollback().await?;
            return Ok(None);
        };
        let mut failed = Submission::from(current);
        if !is_stuck(&failed, older_than) {
            txn.rollback().await?;
            return Ok(None);
        }

        let now = Utc::now();
        let runs = test_case_run::Entity::update_many()
            .set(test_case_run::ActiveModel {
                stderr: Set(Some(reason.to_string())),
                passed: Set(false),
                verdict: Set(Some(Verdict::InternalError)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(test_case_run::Column::SubmissionId.eq(submission_id))
            .filter(test_case_run::Column::Verdict.is_null())
            .exec(&txn)
            .await?;

        submission::Entity::update_many()
            .set(submission::ActiveModel {
                status: Set(SubmissionStatus::InternalError),
                stderr: Set(Some(reason.to_string())),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(submission::Column::Id.eq(submission_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(
            from = %failed.status,
            unresolved_runs = runs.rows_affected,
            "Stuck submission failed as internal error"
        );
        failed.status = SubmissionStatus::InternalError;
        failed.stderr = Some(reason.to_string());
        failed.updated_at = now;
        Ok(Some(failed))
    }
}
