use crate::entities::{anime, anime_alias, anime_metadata, prelude::*};
use crate::models::media::{MediaType, MetadataIds};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter, Set,
};
use tracing::info;

pub struct AnimeRepository {
    conn: DatabaseConnection,
}

impl AnimeRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: i32) -> anyhow::Result<Option<anime::Model>> {
        Ok(Anime::find_by_id(id).one(&self.conn).await?)
    }

    /// Lookup by the identity triple. A `None` year matches any stored year;
    /// a concrete year also matches rows that never recorded one.
    pub async fn find_by_title_season_year(
        &self,
        title: &str,
        season: i32,
        year: Option<i32>,
    ) -> anyhow::Result<Option<anime::Model>> {
        let mut query = Anime::find()
            .filter(anime::Column::Title.eq(title))
            .filter(anime::Column::Season.eq(season));

        if let Some(y) = year {
            query = query.filter(anime::Column::Year.eq(y).or(anime::Column::Year.is_null()));
        }

        Ok(query.one(&self.conn).await?)
    }

    pub async fn find_by_metadata_id(
        &self,
        id_kind: &str,
        id_value: &str,
        season: i32,
    ) -> anyhow::Result<Option<anime::Model>> {
        let column = match id_kind {
            "tmdb" => anime_metadata::Column::TmdbId,
            "imdb" => anime_metadata::Column::ImdbId,
            "tvdb" => anime_metadata::Column::TvdbId,
            "douban" => anime_metadata::Column::DoubanId,
            "bangumi" => anime_metadata::Column::BangumiId,
            _ => return Ok(None),
        };

        let rows = AnimeMetadata::find()
            .filter(column.eq(id_value))
            .find_also_related(Anime)
            .all(&self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(_, a)| a)
            .find(|a| a.season == season))
    }

    /// Get or create an anime row. Callers only reach this after source
    /// validation has proven at least one episode of comments, so creating
    /// here never leaves an empty work behind.
    pub async fn get_or_create(
        &self,
        title: &str,
        media_type: MediaType,
        season: i32,
        year: Option<i32>,
        image_url: Option<&str>,
        local_image_path: Option<&str>,
    ) -> anyhow::Result<i32> {
        if let Some(existing) = self.find_by_title_season_year(title, season, year).await? {
            return Ok(existing.id);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let model = anime::ActiveModel {
            id: NotSet,
            title: Set(title.to_string()),
            media_type: Set(media_type.as_str().to_string()),
            season: Set(season),
            year: Set(year),
            image_url: Set(image_url.map(ToString::to_string)),
            local_image_path: Set(local_image_path.map(ToString::to_string)),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        };

        let inserted = model.insert(&self.conn).await?;
        info!(
            "Created anime {} ('{}', season {})",
            inserted.id, title, season
        );
        Ok(inserted.id)
    }

    /// Insert a row under a preassigned id (match-fallback path). No-op if
    /// the id already exists.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_with_id(
        &self,
        id: i32,
        title: &str,
        media_type: MediaType,
        season: i32,
        year: Option<i32>,
        image_url: Option<&str>,
        local_image_path: Option<&str>,
    ) -> anyhow::Result<()> {
        if Anime::find_by_id(id).one(&self.conn).await?.is_some() {
            return Ok(());
        }

        let now = chrono::Utc::now().to_rfc3339();
        let model = anime::ActiveModel {
            id: Set(id),
            title: Set(title.to_string()),
            media_type: Set(media_type.as_str().to_string()),
            season: Set(season),
            year: Set(year),
            image_url: Set(image_url.map(ToString::to_string)),
            local_image_path: Set(local_image_path.map(ToString::to_string)),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        };
        model.insert(&self.conn).await?;
        info!("Created anime with preassigned id {}", id);
        Ok(())
    }

    /// Fill metadata ids, keeping any value an operator or earlier import
    /// already stored.
    pub async fn update_metadata_if_empty(
        &self,
        anime_id: i32,
        ids: &MetadataIds,
    ) -> anyhow::Result<()> {
        let existing = AnimeMetadata::find_by_id(anime_id).one(&self.conn).await?;

        match existing {
            None => {
                if ids.is_empty() {
                    return Ok(());
                }
                let model = anime_metadata::ActiveModel {
                    anime_id: Set(anime_id),
                    tmdb_id: Set(ids.tmdb_id.clone()),
                    imdb_id: Set(ids.imdb_id.clone()),
                    tvdb_id: Set(ids.tvdb_id.clone()),
                    douban_id: Set(ids.douban_id.clone()),
                    bangumi_id: Set(ids.bangumi_id.clone()),
                };
                model.insert(&self.conn).await?;
            }
            Some(row) => {
                let mut model: anime_metadata::ActiveModel = row.clone().into();
                if row.tmdb_id.is_none() && ids.tmdb_id.is_some() {
                    model.tmdb_id = Set(ids.tmdb_id.clone());
                }
                if row.imdb_id.is_none() && ids.imdb_id.is_some() {
                    model.imdb_id = Set(ids.imdb_id.clone());
                }
                if row.tvdb_id.is_none() && ids.tvdb_id.is_some() {
                    model.tvdb_id = Set(ids.tvdb_id.clone());
                }
                if row.douban_id.is_none() && ids.douban_id.is_some() {
                    model.douban_id = Set(ids.douban_id.clone());
                }
                if row.bangumi_id.is_none() && ids.bangumi_id.is_some() {
                    model.bangumi_id = Set(ids.bangumi_id.clone());
                }
                model.update(&self.conn).await?;
            }
        }
        Ok(())
    }

    pub async fn get_metadata(
        &self,
        anime_id: i32,
    ) -> anyhow::Result<Option<anime_metadata::Model>> {
        Ok(AnimeMetadata::find_by_id(anime_id).one(&self.conn).await?)
    }

    pub async fn get_aliases(&self, anime_id: i32) -> anyhow::Result<Vec<String>> {
        let row = AnimeAlias::find_by_id(anime_id).one(&self.conn).await?;
        let Some(row) = row else {
            return Ok(Vec::new());
        };

        Ok([
            row.name_en,
            row.name_jp,
            row.name_romaji,
            row.alias_cn_1,
            row.alias_cn_2,
            row.alias_cn_3,
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect())
    }

    pub async fn upsert_aliases(
        &self,
        anime_id: i32,
        name_en: Option<&str>,
        name_jp: Option<&str>,
        name_romaji: Option<&str>,
        aliases_cn: &[String],
    ) -> anyhow::Result<()> {
        let mut cn = aliases_cn.iter().take(3);
        let model = anime_alias::ActiveModel {
            anime_id: Set(anime_id),
            name_en: Set(name_en.map(ToString::to_string)),
            name_jp: Set(name_jp.map(ToString::to_string)),
            name_romaji: Set(name_romaji.map(ToString::to_string)),
            alias_cn_1: Set(cn.next().cloned()),
            alias_cn_2: Set(cn.next().cloned()),
            alias_cn_3: Set(cn.next().cloned()),
        };

        AnimeAlias::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(anime_alias::Column::AnimeId)
                    .update_columns([
                        anime_alias::Column::NameEn,
                        anime_alias::Column::NameJp,
                        anime_alias::Column::NameRomaji,
                        anime_alias::Column::AliasCn1,
                        anime_alias::Column::AliasCn2,
                        anime_alias::Column::AliasCn3,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }
}
