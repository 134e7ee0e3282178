use sea_orm::entity::prelude::*;

/// Operator-tunable per-provider settings. `display_order` drives the
/// primary ranking key in search results.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "scraper_setting")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider_name: String,
    pub display_order: i32,
    pub is_enabled: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
