use common::SubmissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i32,
    pub language: String,
    #[sea_orm(column_type = "Text")]
    pub source_code: String,
    pub status: SubmissionStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub stdout: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub stderr: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub compile_output: Option<String>,
    pub time_used: Option<i64>,   // in milliseconds
    pub memory_used: Option<i64>, // in kilobytes

    pub problem_id: i32,
    #[sea_orm(belongs_to, from = "problem_id", to = "id")]
    pub problem: HasOne<super::problem::Entity>,

    #[sea_orm(has_many)]
    pub test_case_runs: HasMany<super::test_case_run::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for common::Submission {
    fn from(m: Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            problem_id: m.problem_id,
            language: m.language,
            source_code: m.source_code,
            status: m.status,
            stdout: m.stdout,
            stderr: m.stderr,
            compile_output: m.compile_output,
            time_used: m.time_used,
            memory_used: m.memory_used,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
