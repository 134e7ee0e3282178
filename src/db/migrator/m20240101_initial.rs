use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(Anime)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(AnimeMetadata)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(AnimeAlias)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(AnimeSource)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Episode)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Config)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(TaskHistory)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(SchedulerTask)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(WebhookQueue)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Cache)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(RateLimitState)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(ExternalApiLog)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(ScraperSetting)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(TitleRecognition)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let conn = manager.get_connection();

        conn.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_episode_source_index ON episode(source_id, episode_index)",
        )
        .await?;

        conn.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_source_provider_media ON anime_source(anime_id, provider_name, media_id)",
        )
        .await?;

        conn.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_task_history_unique_key ON task_history(unique_key)",
        )
        .await?;

        conn.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_anime_title_season ON anime(title, season)",
        )
        .await?;

        conn.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_webhook_queue_run_at ON webhook_queue(run_at)",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TitleRecognition).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ScraperSetting).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ExternalApiLog).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RateLimitState).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Cache).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WebhookQueue).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SchedulerTask).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TaskHistory).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Config).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Episode).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AnimeSource).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AnimeAlias).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AnimeMetadata).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Anime).to_owned())
            .await?;
        Ok(())
    }
}
