use sea_orm::entity::prelude::*;

/// Persisted request counters so limits survive restarts. Key is a provider
/// name or one of the reserved buckets (`__global__`, `__fallback_match__`,
/// `__fallback_search__`).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "rate_limit_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub bucket_key: String,
    pub request_count: i32,
    pub last_reset_time: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
