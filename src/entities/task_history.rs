use sea_orm::entity::prelude::*;

/// One submitted task. Rows persist until deleted by an operator;
/// `parameters` keeps the serialized job inputs so interrupted tasks can be
/// diagnosed after a restart.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "task_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    pub unique_key: String,
    /// pending | running | paused | completed | failed | cancelled
    pub status: String,
    pub progress: i32,
    pub message: String,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub scheduler_task_id: Option<String>,
    pub task_type: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub parameters: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
