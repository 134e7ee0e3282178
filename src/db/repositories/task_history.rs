use crate::entities::{prelude::*, task_history};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::warn;

const ACTIVE_STATUSES: [&str; 3] = ["pending", "running", "paused"];

pub struct TaskHistoryRepository {
    conn: DatabaseConnection,
}

impl TaskHistoryRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_pending(
        &self,
        id: &str,
        title: &str,
        unique_key: &str,
        task_type: &str,
        scheduler_task_id: Option<&str>,
        parameters: Option<&str>,
    ) -> anyhow::Result<()> {
        let model = task_history::ActiveModel {
            id: Set(id.to_string()),
            title: Set(title.to_string()),
            unique_key: Set(unique_key.to_string()),
            status: Set("pending".to_string()),
            progress: Set(0),
            message: Set(String::new()),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            finished_at: Set(None),
            scheduler_task_id: Set(scheduler_task_id.map(ToString::to_string)),
            task_type: Set(task_type.to_string()),
            parameters: Set(parameters.map(ToString::to_string)),
        };
        model.insert(&self.conn).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<task_history::Model>> {
        Ok(TaskHistory::find_by_id(id).one(&self.conn).await?)
    }

    pub async fn update_progress(
        &self,
        id: &str,
        status: &str,
        progress: i32,
        message: &str,
    ) -> anyhow::Result<()> {
        let Some(row) = TaskHistory::find_by_id(id).one(&self.conn).await? else {
            warn!("Progress write for unknown task {}", id);
            return Ok(());
        };

        let terminal = matches!(status, "completed" | "failed" | "cancelled");
        let mut model: task_history::ActiveModel = row.into();
        model.status = Set(status.to_string());
        model.progress = Set(progress.clamp(0, 100));
        model.message = Set(message.to_string());
        if terminal {
            model.finished_at = Set(Some(chrono::Utc::now().to_rfc3339()));
        }
        model.update(&self.conn).await?;
        Ok(())
    }

    /// An active (pending/running/paused) task holding `unique_key`, if any.
    pub async fn find_active_by_unique_key(
        &self,
        unique_key: &str,
    ) -> anyhow::Result<Option<task_history::Model>> {
        Ok(TaskHistory::find()
            .filter(task_history::Column::UniqueKey.eq(unique_key))
            .filter(task_history::Column::Status.is_in(ACTIVE_STATUSES))
            .one(&self.conn)
            .await?)
    }

    /// Most recent terminal task with `unique_key` created after `since`.
    pub async fn find_recent_terminal_by_unique_key(
        &self,
        unique_key: &str,
        since: &str,
    ) -> anyhow::Result<Option<task_history::Model>> {
        Ok(TaskHistory::find()
            .filter(task_history::Column::UniqueKey.eq(unique_key))
            .filter(task_history::Column::Status.is_in(["completed", "failed", "cancelled"]))
            .filter(task_history::Column::CreatedAt.gt(since))
            .order_by_desc(task_history::Column::CreatedAt)
            .one(&self.conn)
            .await?)
    }

    /// Force-fail rows a previous process left as running/paused so the
    /// queue is consistent after restart.
    pub async fn fail_orphaned(&self) -> anyhow::Result<u64> {
        let result = TaskHistory::update_many()
            .col_expr(
                task_history::Column::Status,
                sea_orm::sea_query::Expr::value("failed"),
            )
            .col_expr(
                task_history::Column::Message,
                sea_orm::sea_query::Expr::value("任务因服务重启而中断"),
            )
            .filter(task_history::Column::Status.is_in(["running", "paused"]))
            .exec(&self.conn)
            .await?;

        if result.rows_affected > 0 {
            warn!(
                "Force-failed {} task(s) orphaned by a previous run",
                result.rows_affected
            );
        }
        Ok(result.rows_affected)
    }

    pub async fn search(
        &self,
        status_filter: Option<&str>,
        limit: u64,
    ) -> anyhow::Result<Vec<task_history::Model>> {
        let mut query = TaskHistory::find().order_by_desc(task_history::Column::CreatedAt);
        if let Some(status) = status_filter {
            query = query.filter(task_history::Column::Status.eq(status));
        }
        Ok(query.limit(limit).all(&self.conn).await?)
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let result = TaskHistory::delete_by_id(id).exec(&self.conn).await?;
        Ok(result.rows_affected > 0)
    }

    /// Latest execution task spawned on behalf of a scheduler job.
    pub async fn find_by_scheduler_task(
        &self,
        scheduler_task_id: &str,
    ) -> anyhow::Result<Option<task_history::Model>> {
        Ok(TaskHistory::find()
            .filter(task_history::Column::SchedulerTaskId.eq(scheduler_task_id))
            .order_by_desc(task_history::Column::CreatedAt)
            .one(&self.conn)
            .await?)
    }
}
