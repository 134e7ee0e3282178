use crate::entities::{anime, anime_metadata, anime_source, episode, rate_limit_state,
    scheduler_task, task_history, webhook_queue};
use crate::models::media::{MediaType, MetadataIds};
use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

/// Narrow persistence facade. Every table is reached through one of the
/// per-table repositories; services hold a `Store` clone and never touch
/// the connection directly.
#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    fn anime_repo(&self) -> repositories::anime::AnimeRepository {
        repositories::anime::AnimeRepository::new(self.conn.clone())
    }

    fn source_repo(&self) -> repositories::source::SourceRepository {
        repositories::source::SourceRepository::new(self.conn.clone())
    }

    fn episode_repo(&self) -> repositories::episode::EpisodeRepository {
        repositories::episode::EpisodeRepository::new(self.conn.clone())
    }

    fn task_repo(&self) -> repositories::task_history::TaskHistoryRepository {
        repositories::task_history::TaskHistoryRepository::new(self.conn.clone())
    }

    fn config_repo(&self) -> repositories::config::ConfigRepository {
        repositories::config::ConfigRepository::new(self.conn.clone())
    }

    fn cache_repo(&self) -> repositories::cache::CacheRepository {
        repositories::cache::CacheRepository::new(self.conn.clone())
    }

    fn rate_limit_repo(&self) -> repositories::rate_limit::RateLimitRepository {
        repositories::rate_limit::RateLimitRepository::new(self.conn.clone())
    }

    fn webhook_repo(&self) -> repositories::webhook_queue::WebhookQueueRepository {
        repositories::webhook_queue::WebhookQueueRepository::new(self.conn.clone())
    }

    fn scheduler_repo(&self) -> repositories::scheduler_task::SchedulerTaskRepository {
        repositories::scheduler_task::SchedulerTaskRepository::new(self.conn.clone())
    }

    fn api_log_repo(&self) -> repositories::api_log::ApiLogRepository {
        repositories::api_log::ApiLogRepository::new(self.conn.clone())
    }

    fn recognition_repo(&self) -> repositories::recognition::RecognitionRepository {
        repositories::recognition::RecognitionRepository::new(self.conn.clone())
    }

    // ===== anime =====

    pub async fn get_anime(&self, id: i32) -> Result<Option<anime::Model>> {
        self.anime_repo().get(id).await
    }

    pub async fn find_anime_by_title_season_year(
        &self,
        title: &str,
        season: i32,
        year: Option<i32>,
    ) -> Result<Option<anime::Model>> {
        self.anime_repo()
            .find_by_title_season_year(title, season, year)
            .await
    }

    pub async fn find_anime_by_metadata_id(
        &self,
        id_kind: &str,
        id_value: &str,
        season: i32,
    ) -> Result<Option<anime::Model>> {
        self.anime_repo()
            .find_by_metadata_id(id_kind, id_value, season)
            .await
    }

    pub async fn get_or_create_anime(
        &self,
        title: &str,
        media_type: MediaType,
        season: i32,
        year: Option<i32>,
        image_url: Option<&str>,
        local_image_path: Option<&str>,
    ) -> Result<i32> {
        self.anime_repo()
            .get_or_create(title, media_type, season, year, image_url, local_image_path)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_anime_with_id(
        &self,
        id: i32,
        title: &str,
        media_type: MediaType,
        season: i32,
        year: Option<i32>,
        image_url: Option<&str>,
        local_image_path: Option<&str>,
    ) -> Result<()> {
        self.anime_repo()
            .create_with_id(id, title, media_type, season, year, image_url, local_image_path)
            .await
    }

    pub async fn update_metadata_if_empty(&self, anime_id: i32, ids: &MetadataIds) -> Result<()> {
        self.anime_repo().update_metadata_if_empty(anime_id, ids).await
    }

    pub async fn get_anime_metadata(&self, anime_id: i32) -> Result<Option<anime_metadata::Model>> {
        self.anime_repo().get_metadata(anime_id).await
    }

    pub async fn get_anime_aliases(&self, anime_id: i32) -> Result<Vec<String>> {
        self.anime_repo().get_aliases(anime_id).await
    }

    pub async fn upsert_anime_aliases(
        &self,
        anime_id: i32,
        name_en: Option<&str>,
        name_jp: Option<&str>,
        name_romaji: Option<&str>,
        aliases_cn: &[String],
    ) -> Result<()> {
        self.anime_repo()
            .upsert_aliases(anime_id, name_en, name_jp, name_romaji, aliases_cn)
            .await
    }

    // ===== sources =====

    pub async fn get_source(&self, id: i32) -> Result<Option<anime_source::Model>> {
        self.source_repo().get(id).await
    }

    pub async fn link_source(
        &self,
        anime_id: i32,
        provider_name: &str,
        media_id: &str,
    ) -> Result<i32> {
        self.source_repo().link(anime_id, provider_name, media_id).await
    }

    pub async fn find_source_by_provider_media(
        &self,
        provider_name: &str,
        media_id: &str,
    ) -> Result<Option<anime_source::Model>> {
        self.source_repo()
            .find_by_provider_media(provider_name, media_id)
            .await
    }

    pub async fn sources_for_anime(&self, anime_id: i32) -> Result<Vec<anime_source::Model>> {
        self.source_repo().list_for_anime(anime_id).await
    }

    pub async fn find_favorited_source(
        &self,
        anime_id: i32,
    ) -> Result<Option<anime_source::Model>> {
        self.source_repo().find_favorited(anime_id).await
    }

    pub async fn set_source_favorited(&self, source_id: i32, favorited: bool) -> Result<()> {
        self.source_repo().set_favorited(source_id, favorited).await
    }

    pub async fn record_refresh_failure(&self, source_id: i32) -> Result<bool> {
        self.source_repo().record_refresh_failure(source_id).await
    }

    pub async fn reset_refresh_failures(&self, source_id: i32) -> Result<()> {
        self.source_repo().reset_refresh_failures(source_id).await
    }

    pub async fn incremental_refresh_sources(&self) -> Result<Vec<anime_source::Model>> {
        self.source_repo().list_incremental_refresh_enabled().await
    }

    pub async fn scraper_display_orders(&self) -> Result<HashMap<String, i32>> {
        self.source_repo().scraper_display_orders().await
    }

    pub async fn ensure_scraper_setting(
        &self,
        provider_name: &str,
        display_order: i32,
    ) -> Result<()> {
        self.source_repo()
            .ensure_scraper_setting(provider_name, display_order)
            .await
    }

    pub async fn enabled_scrapers(&self) -> Result<Vec<String>> {
        self.source_repo().enabled_scrapers().await
    }

    // ===== episodes =====

    pub async fn get_episode(&self, id: i64) -> Result<Option<episode::Model>> {
        self.episode_repo().get(id).await
    }

    pub async fn find_episode_by_index(
        &self,
        source_id: i32,
        episode_index: i32,
    ) -> Result<Option<episode::Model>> {
        self.episode_repo().find_by_index(source_id, episode_index).await
    }

    pub async fn episode_present(&self, source_id: i32, episode_index: i32) -> Result<bool> {
        self.episode_repo().is_present(source_id, episode_index).await
    }

    pub async fn present_episode_indices(
        &self,
        provider_name: &str,
        media_id: &str,
        indices: &[i32],
    ) -> Result<Vec<i32>> {
        self.episode_repo()
            .present_indices(provider_name, media_id, indices)
            .await
    }

    pub async fn present_episode_indices_for_source(&self, source_id: i32) -> Result<Vec<i32>> {
        self.episode_repo().present_indices_for_source(source_id).await
    }

    pub async fn get_or_create_episode(
        &self,
        source_id: i32,
        episode_index: i32,
        title: &str,
        url: Option<&str>,
        provider_episode_id: &str,
    ) -> Result<i64> {
        self.episode_repo()
            .get_or_create(source_id, episode_index, title, url, provider_episode_id)
            .await
    }

    pub async fn set_episode_danmaku(
        &self,
        episode_id: i64,
        file_path: &str,
        comment_count: i32,
    ) -> Result<()> {
        self.episode_repo()
            .set_danmaku(episode_id, file_path, comment_count)
            .await
    }

    pub async fn episodes_for_source(&self, source_id: i32) -> Result<Vec<episode::Model>> {
        self.episode_repo().list_for_source(source_id).await
    }

    // ===== task history =====

    pub async fn create_pending_task(
        &self,
        id: &str,
        title: &str,
        unique_key: &str,
        task_type: &str,
        scheduler_task_id: Option<&str>,
        parameters: Option<&str>,
    ) -> Result<()> {
        self.task_repo()
            .create_pending(id, title, unique_key, task_type, scheduler_task_id, parameters)
            .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<task_history::Model>> {
        self.task_repo().get(id).await
    }

    pub async fn update_task_progress(
        &self,
        id: &str,
        status: &str,
        progress: i32,
        message: &str,
    ) -> Result<()> {
        self.task_repo()
            .update_progress(id, status, progress, message)
            .await
    }

    pub async fn find_active_task_by_unique_key(
        &self,
        unique_key: &str,
    ) -> Result<Option<task_history::Model>> {
        self.task_repo().find_active_by_unique_key(unique_key).await
    }

    pub async fn find_recent_terminal_task(
        &self,
        unique_key: &str,
        since: &str,
    ) -> Result<Option<task_history::Model>> {
        self.task_repo()
            .find_recent_terminal_by_unique_key(unique_key, since)
            .await
    }

    pub async fn fail_orphaned_tasks(&self) -> Result<u64> {
        self.task_repo().fail_orphaned().await
    }

    pub async fn search_tasks(
        &self,
        status_filter: Option<&str>,
        limit: u64,
    ) -> Result<Vec<task_history::Model>> {
        self.task_repo().search(status_filter, limit).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        self.task_repo().delete(id).await
    }

    pub async fn find_task_by_scheduler_task(
        &self,
        scheduler_task_id: &str,
    ) -> Result<Option<task_history::Model>> {
        self.task_repo().find_by_scheduler_task(scheduler_task_id).await
    }

    // ===== config =====

    pub async fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        self.config_repo().get(key).await
    }

    pub async fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.config_repo().set(key, value).await
    }

    pub async fn init_config_defaults(&self, defaults: &[(&str, &str, &str)]) -> Result<()> {
        self.config_repo().init_defaults(defaults).await
    }

    // ===== cache =====

    pub async fn cache_get(&self, key: &str) -> Result<Option<String>> {
        self.cache_repo().get(key).await
    }

    pub async fn cache_set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
        provider: Option<&str>,
    ) -> Result<()> {
        self.cache_repo().set(key, value, ttl_seconds, provider).await
    }

    pub async fn purge_expired_cache(&self) -> Result<u64> {
        self.cache_repo().purge_expired().await
    }

    // ===== rate limit =====

    pub async fn rate_limit_state(&self, key: &str) -> Result<rate_limit_state::Model> {
        self.rate_limit_repo().get_or_create(key).await
    }

    pub async fn rate_limit_increment_pair(&self, first: &str, second: &str) -> Result<()> {
        self.rate_limit_repo().increment_pair(first, second).await
    }

    pub async fn rate_limit_reset_all(&self) -> Result<()> {
        self.rate_limit_repo().reset_all().await
    }

    pub async fn rate_limit_states(&self) -> Result<Vec<rate_limit_state::Model>> {
        self.rate_limit_repo().all_states().await
    }

    // ===== webhook queue =====

    pub async fn enqueue_webhook(
        &self,
        task_title: &str,
        unique_key: &str,
        payload_json: &str,
        webhook_source: &str,
        delay: chrono::Duration,
    ) -> Result<i64> {
        self.webhook_repo()
            .enqueue(task_title, unique_key, payload_json, webhook_source, delay)
            .await
    }

    pub async fn due_webhooks(&self) -> Result<Vec<webhook_queue::Model>> {
        self.webhook_repo().due().await
    }

    pub async fn delete_webhook(&self, id: i64) -> Result<()> {
        self.webhook_repo().delete(id).await
    }

    // ===== scheduler =====

    pub async fn upsert_scheduler_task(
        &self,
        id: &str,
        name: &str,
        job_type: &str,
        cron_expression: &str,
        is_enabled: bool,
    ) -> Result<()> {
        self.scheduler_repo()
            .upsert(id, name, job_type, cron_expression, is_enabled)
            .await
    }

    pub async fn list_scheduler_tasks(&self) -> Result<Vec<scheduler_task::Model>> {
        self.scheduler_repo().list().await
    }

    pub async fn get_scheduler_task(&self, id: &str) -> Result<Option<scheduler_task::Model>> {
        self.scheduler_repo().get(id).await
    }

    pub async fn mark_scheduler_run(&self, id: &str) -> Result<()> {
        self.scheduler_repo().mark_run(id).await
    }

    // ===== external api log =====

    pub async fn add_api_log(
        &self,
        ip_address: &str,
        endpoint: &str,
        status_code: i32,
        message: Option<&str>,
    ) -> Result<()> {
        self.api_log_repo()
            .add(ip_address, endpoint, status_code, message)
            .await
    }

    // ===== title recognition =====

    pub async fn load_recognition_rules(&self) -> Result<Option<String>> {
        self.recognition_repo().load().await
    }

    pub async fn save_recognition_rules(&self, rules: &str) -> Result<()> {
        self.recognition_repo().save(rules).await
    }
}
