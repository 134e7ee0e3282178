use crate::entities::{prelude::*, scheduler_task};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

pub struct SchedulerTaskRepository {
    conn: DatabaseConnection,
}

impl SchedulerTaskRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn upsert(
        &self,
        id: &str,
        name: &str,
        job_type: &str,
        cron_expression: &str,
        is_enabled: bool,
    ) -> anyhow::Result<()> {
        let model = scheduler_task::ActiveModel {
            id: Set(id.to_string()),
            name: Set(name.to_string()),
            job_type: Set(job_type.to_string()),
            cron_expression: Set(cron_expression.to_string()),
            is_enabled: Set(is_enabled),
            last_run_at: Set(None),
            next_run_at: Set(None),
        };

        SchedulerTask::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(scheduler_task::Column::Id)
                    .update_columns([
                        scheduler_task::Column::Name,
                        scheduler_task::Column::JobType,
                        scheduler_task::Column::CronExpression,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> anyhow::Result<Vec<scheduler_task::Model>> {
        Ok(SchedulerTask::find().all(&self.conn).await?)
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<scheduler_task::Model>> {
        Ok(SchedulerTask::find_by_id(id).one(&self.conn).await?)
    }

    pub async fn mark_run(&self, id: &str) -> anyhow::Result<()> {
        let Some(row) = SchedulerTask::find_by_id(id).one(&self.conn).await? else {
            return Ok(());
        };
        let mut model: scheduler_task::ActiveModel = row.into();
        model.last_run_at = Set(Some(chrono::Utc::now().to_rfc3339()));
        model.update(&self.conn).await?;
        Ok(())
    }
}
