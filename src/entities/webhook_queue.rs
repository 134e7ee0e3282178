use sea_orm::entity::prelude::*;

/// Delayed webhook jobs waiting for the scheduler drain.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub task_title: String,
    pub unique_key: String,
    #[sea_orm(column_type = "Text")]
    pub payload_json: String,
    pub webhook_source: String,
    pub run_at: String,
    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
