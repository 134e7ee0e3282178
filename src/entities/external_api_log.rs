use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "external_api_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub access_time: String,
    pub ip_address: String,
    pub endpoint: String,
    pub status_code: i32,
    pub message: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
