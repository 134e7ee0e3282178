use sea_orm::entity::prelude::*;

/// One provider episode. Rows are created only when comments are about to
/// be written; an episode is "present" when `danmaku_file_path` is set and
/// `comment_count > 0`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "episode")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub source_id: i32,
    pub episode_index: i32,
    pub title: String,
    pub url: Option<String>,
    pub provider_episode_id: String,
    pub danmaku_file_path: Option<String>,
    pub comment_count: i32,
    pub fetched_at: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::anime_source::Entity",
        from = "Column::SourceId",
        to = "super::anime_source::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    AnimeSource,
}

impl Related<super::anime_source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AnimeSource.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
