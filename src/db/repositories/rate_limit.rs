use crate::entities::{prelude::*, rate_limit_state};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait,
};

pub struct RateLimitRepository {
    conn: DatabaseConnection,
}

impl RateLimitRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get_or_create(&self, key: &str) -> anyhow::Result<rate_limit_state::Model> {
        if let Some(row) = RateLimitState::find_by_id(key).one(&self.conn).await? {
            return Ok(row);
        }

        let model = rate_limit_state::ActiveModel {
            bucket_key: Set(key.to_string()),
            request_count: Set(0),
            last_reset_time: Set(chrono::Utc::now().to_rfc3339()),
        };
        Ok(model.insert(&self.conn).await?)
    }

    /// Bump a pair of buckets atomically. Only called after a provider fetch
    /// actually returned a body.
    pub async fn increment_pair(&self, first: &str, second: &str) -> anyhow::Result<()> {
        let txn = self.conn.begin().await?;
        for key in [first, second] {
            let row = match RateLimitState::find_by_id(key).one(&txn).await? {
                Some(row) => row,
                None => {
                    let model = rate_limit_state::ActiveModel {
                        bucket_key: Set(key.to_string()),
                        request_count: Set(0),
                        last_reset_time: Set(chrono::Utc::now().to_rfc3339()),
                    };
                    model.insert(&txn).await?
                }
            };
            let count = row.request_count + 1;
            let mut model: rate_limit_state::ActiveModel = row.into();
            model.request_count = Set(count);
            model.update(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Zero every counter and stamp a fresh window start, in one short
    /// transaction.
    pub async fn reset_all(&self) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let txn = self.conn.begin().await?;
        RateLimitState::update_many()
            .col_expr(
                rate_limit_state::Column::RequestCount,
                sea_orm::sea_query::Expr::value(0),
            )
            .col_expr(
                rate_limit_state::Column::LastResetTime,
                sea_orm::sea_query::Expr::value(now),
            )
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    pub async fn all_states(&self) -> anyhow::Result<Vec<rate_limit_state::Model>> {
        Ok(RateLimitState::find().all(&self.conn).await?)
    }
}
