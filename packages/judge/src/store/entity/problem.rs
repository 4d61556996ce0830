use common::OutputCompare;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "problem")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub title: String,
    pub time_limit: i32,   // in milliseconds
    pub memory_limit: i32, // in kilobytes
    /// One of: exact, trim_trailing, ignore_whitespace. NULL means trim_trailing.
    pub compare_mode: Option<String>,

    #[sea_orm(has_many)]
    pub submissions: HasMany<super::submission::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn compare(&self) -> Option<OutputCompare> {
        match self.compare_mode.as_deref() {
            None | Some("trim_trailing") => Some(OutputCompare::TrimTrailing),
            Some("exact") => Some(OutputCompare::Exact),
            Some("ignore_whitespace") => Some(OutputCompare::IgnoreWhitespace),
            Some(_) => None,
        }
    }
}
