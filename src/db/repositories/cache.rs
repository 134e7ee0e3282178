use crate::entities::{cache, prelude::*};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

pub struct CacheRepository {
    conn: DatabaseConnection,
}

impl CacheRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = chrono::Utc::now().to_rfc3339();
        let entry = Cache::find()
            .filter(cache::Column::CacheKey.eq(key))
            .filter(cache::Column::ExpiresAt.gt(&now))
            .one(&self.conn)
            .await?;
        Ok(entry.map(|e| e.cache_value))
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
        provider: Option<&str>,
    ) -> anyhow::Result<()> {
        let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds)).to_rfc3339();

        let model = cache::ActiveModel {
            cache_key: Set(key.to_string()),
            cache_value: Set(value.to_string()),
            provider: Set(provider.map(ToString::to_string)),
            expires_at: Set(expires_at),
        };

        Cache::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(cache::Column::CacheKey)
                    .update_columns([
                        cache::Column::CacheValue,
                        cache::Column::Provider,
                        cache::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = Cache::delete_many()
            .filter(cache::Column::ExpiresAt.lt(&now))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
