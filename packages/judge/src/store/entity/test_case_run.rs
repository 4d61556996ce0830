use common::Verdict;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "test_case_run")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "submission_ordinal")]
    pub submission_id: i32,
    #[sea_orm(unique_key = "submission_ordinal")]
    pub ordinal: i32,

    #[sea_orm(column_type = "Text")]
    pub input: String,
    #[sea_orm(column_type = "Text")]
    pub expected_output: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub stdout: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub stderr: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub compile_output: Option<String>,

    pub passed: bool,
    /// NULL while the run is pending.
    pub verdict: Option<Verdict>,
    pub time_used: Option<i64>,   // in milliseconds
    pub memory_used: Option<i64>, // in kilobytes

    #[sea_orm(belongs_to, from = "submission_id", to = "id")]
    pub submission: HasOne<super::submission::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for common::TestCaseRun {
    fn from(m: Model) -> Self {
        Self {
            id: m.id,
            submission_id: m.submission_id,
            ordinal: m.ordinal,
            input: m.input,
            expected_output: m.expected_output,
            stdout: m.stdout,
            stderr: m.stderr,
            compile_output: m.compile_output,
            passed: m.passed,
            verdict: m.verdict,
            time_used: m.time_used,
            memory_used: m.memory_used,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
