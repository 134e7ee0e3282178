use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "anime")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    /// "tv_series" or "movie".
    pub media_type: String,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub local_image_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::anime_source::Entity")]
    AnimeSource,
    #[sea_orm(has_one = "super::anime_metadata::Entity")]
    AnimeMetadata,
    #[sea_orm(has_one = "super::anime_alias::Entity")]
    AnimeAlias,
}

impl Related<super::anime_source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AnimeSource.def()
    }
}

impl Related<super::anime_metadata::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AnimeMetadata.def()
    }
}

impl Related<super::anime_alias::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AnimeAlias.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
