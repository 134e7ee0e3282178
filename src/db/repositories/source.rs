use crate::entities::{anime_source, prelude::*, scraper_setting};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter, Set,
    TransactionTrait,
};
use std::collections::HashMap;
use tracing::{info, warn};

/// Consecutive incremental-refresh failures before the flag is dropped.
const INCREMENTAL_REFRESH_DISABLE_AT: i32 = 10;

pub struct SourceRepository {
    conn: DatabaseConnection,
}

impl SourceRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: i32) -> anyhow::Result<Option<anime_source::Model>> {
        Ok(AnimeSource::find_by_id(id).one(&self.conn).await?)
    }

    /// Link `(provider, media_id)` to an anime, returning the source id.
    /// Re-linking an existing pair is idempotent.
    pub async fn link(
        &self,
        anime_id: i32,
        provider_name: &str,
        media_id: &str,
    ) -> anyhow::Result<i32> {
        let existing = AnimeSource::find()
            .filter(anime_source::Column::AnimeId.eq(anime_id))
            .filter(anime_source::Column::ProviderName.eq(provider_name))
            .filter(anime_source::Column::MediaId.eq(media_id))
            .one(&self.conn)
            .await?;

        if let Some(row) = existing {
            return Ok(row.id);
        }

        let model = anime_source::ActiveModel {
            id: NotSet,
            anime_id: Set(anime_id),
            provider_name: Set(provider_name.to_string()),
            media_id: Set(media_id.to_string()),
            is_favorited: Set(false),
            incremental_refresh_enabled: Set(false),
            incremental_refresh_failures: Set(0),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
        };
        let inserted = model.insert(&self.conn).await?;
        info!(
            "Linked source {} ({}:{}) to anime {}",
            inserted.id, provider_name, media_id, anime_id
        );
        Ok(inserted.id)
    }

    pub async fn find_by_provider_media(
        &self,
        provider_name: &str,
        media_id: &str,
    ) -> anyhow::Result<Option<anime_source::Model>> {
        Ok(AnimeSource::find()
            .filter(anime_source::Column::ProviderName.eq(provider_name))
            .filter(anime_source::Column::MediaId.eq(media_id))
            .one(&self.conn)
            .await?)
    }

    pub async fn list_for_anime(&self, anime_id: i32) -> anyhow::Result<Vec<anime_source::Model>> {
        Ok(AnimeSource::find()
            .filter(anime_source::Column::AnimeId.eq(anime_id))
            .all(&self.conn)
            .await?)
    }

    pub async fn find_favorited(
        &self,
        anime_id: i32,
    ) -> anyhow::Result<Option<anime_source::Model>> {
        Ok(AnimeSource::find()
            .filter(anime_source::Column::AnimeId.eq(anime_id))
            .filter(anime_source::Column::IsFavorited.eq(true))
            .one(&self.conn)
            .await?)
    }

    /// Toggle the favorited flag. Favoriting clears the flag on every other
    /// source of the same anime inside one transaction, keeping the at-most-
    /// one invariant.
    pub async fn set_favorited(&self, source_id: i32, favorited: bool) -> anyhow::Result<()> {
        let txn = self.conn.begin().await?;

        let Some(source) = AnimeSource::find_by_id(source_id).one(&txn).await? else {
            anyhow::bail!("source {source_id} not found");
        };

        if favorited {
            AnimeSource::update_many()
                .col_expr(
                    anime_source::Column::IsFavorited,
                    sea_orm::sea_query::Expr::value(false),
                )
                .filter(anime_source::Column::AnimeId.eq(source.anime_id))
                .exec(&txn)
                .await?;
        }

        AnimeSource::update_many()
            .col_expr(
                anime_source::Column::IsFavorited,
                sea_orm::sea_query::Expr::value(favorited),
            )
            .filter(anime_source::Column::Id.eq(source_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    /// Record an all-failed incremental refresh run. Disables the flag at
    /// the failure ceiling and reports whether it did.
    pub async fn record_refresh_failure(&self, source_id: i32) -> anyhow::Result<bool> {
        let Some(source) = AnimeSource::find_by_id(source_id).one(&self.conn).await? else {
            return Ok(false);
        };

        let failures = source.incremental_refresh_failures + 1;
        let disable = failures >= INCREMENTAL_REFRESH_DISABLE_AT;

        let mut model: anime_source::ActiveModel = source.into();
        model.incremental_refresh_failures = Set(failures);
        if disable {
            model.incremental_refresh_enabled = Set(false);
        }
        model.update(&self.conn).await?;

        if disable {
            warn!(
                "Source {} reached {} consecutive refresh failures, incremental refresh disabled",
                source_id, failures
            );
        }
        Ok(disable)
    }

    pub async fn reset_refresh_failures(&self, source_id: i32) -> anyhow::Result<()> {
        AnimeSource::update_many()
            .col_expr(
                anime_source::Column::IncrementalRefreshFailures,
                sea_orm::sea_query::Expr::value(0),
            )
            .filter(anime_source::Column::Id.eq(source_id))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn list_incremental_refresh_enabled(
        &self,
    ) -> anyhow::Result<Vec<anime_source::Model>> {
        Ok(AnimeSource::find()
            .filter(anime_source::Column::IncrementalRefreshEnabled.eq(true))
            .all(&self.conn)
            .await?)
    }

    // Scraper settings live here too: they are provider-level rows the
    // source ranking depends on.

    pub async fn scraper_display_orders(&self) -> anyhow::Result<HashMap<String, i32>> {
        let rows = ScraperSetting::find().all(&self.conn).await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.provider_name, r.display_order))
            .collect())
    }

    pub async fn ensure_scraper_setting(
        &self,
        provider_name: &str,
        display_order: i32,
    ) -> anyhow::Result<()> {
        let model = scraper_setting::ActiveModel {
            provider_name: Set(provider_name.to_string()),
            display_order: Set(display_order),
            is_enabled: Set(true),
        };
        ScraperSetting::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(scraper_setting::Column::ProviderName)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn enabled_scrapers(&self) -> anyhow::Result<Vec<String>> {
        let rows = ScraperSetting::find()
            .filter(scraper_setting::Column::IsEnabled.eq(true))
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(|r| r.provider_name).collect())
    }
}
