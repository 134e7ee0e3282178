use crate::entities::{prelude::*, webhook_queue};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};

pub struct WebhookQueueRepository {
    conn: DatabaseConnection,
}

impl WebhookQueueRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn enqueue(
        &self,
        task_title: &str,
        unique_key: &str,
        payload_json: &str,
        webhook_source: &str,
        delay: chrono::Duration,
    ) -> anyhow::Result<i64> {
        let now = chrono::Utc::now();
        let model = webhook_queue::ActiveModel {
            id: NotSet,
            task_title: Set(task_title.to_string()),
            unique_key: Set(unique_key.to_string()),
            payload_json: Set(payload_json.to_string()),
            webhook_source: Set(webhook_source.to_string()),
            run_at: Set((now + delay).to_rfc3339()),
            created_at: Set(now.to_rfc3339()),
        };
        let inserted = model.insert(&self.conn).await?;
        Ok(inserted.id)
    }

    /// Rows whose `run_at` has passed, oldest first.
    pub async fn due(&self) -> anyhow::Result<Vec<webhook_queue::Model>> {
        let now = chrono::Utc::now().to_rfc3339();
        Ok(WebhookQueue::find()
            .filter(webhook_queue::Column::RunAt.lte(&now))
            .order_by_asc(webhook_queue::Column::RunAt)
            .all(&self.conn)
            .await?)
    }

    pub async fn delete(&self, id: i64) -> anyhow::Result<()> {
        WebhookQueue::delete_by_id(id).exec(&self.conn).await?;
        Ok(())
    }
}
