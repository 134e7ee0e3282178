//! Background scheduler.
//!
//! Named jobs with cron-like triggers: the delayed-webhook drain, the
//! incremental refresh sweep, the optional full refresh and cache GC. Each
//! refresh trigger creates a real task through the manager and records the
//! scheduler-task id on the history row so operators can poll either side
//! of the bridge.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, interval};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::models::media::MediaType;
use crate::models::webhook::WebhookJob;
use crate::state::SharedState;
use crate::tasks::SubmitError;
use crate::tasks::import::{GenericImportRequest, import_task};

pub const JOB_WEBHOOK_DRAIN: &str = "webhook_drain";
pub const JOB_INCREMENTAL_REFRESH: &str = "incremental_refresh";
pub const JOB_FULL_REFRESH: &str = "full_refresh";
pub const JOB_CACHE_GC: &str = "cache_gc";

pub struct Scheduler {
    state: Arc<SharedState>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(state: Arc<SharedState>, config: SchedulerConfig) -> Self {
        Self {
            state,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        self.register_job_rows().await?;
        *self.running.write().await = true;
        info!("Starting background scheduler");

        let mut sched = JobScheduler::new().await?;

        // Refresh jobs run on their cron expressions; the drain and GC run
        // on plain intervals below.
        let state_for_refresh = Arc::clone(&self.state);
        let refresh_job = Job::new_async(
            self.config.incremental_refresh_cron.as_str(),
            move |_uuid, _lock| {
                let state = Arc::clone(&state_for_refresh);
                Box::pin(async move {
                    run_logged(JOB_INCREMENTAL_REFRESH, incremental_refresh(&state)).await;
                })
            },
        )?;
        sched.add(refresh_job).await?;

        if self.config.full_refresh_enabled {
            let state_for_full = Arc::clone(&self.state);
            let full_job =
                Job::new_async(self.config.full_refresh_cron.as_str(), move |_uuid, _lock| {
                    let state = Arc::clone(&state_for_full);
                    Box::pin(async move {
                        run_logged(JOB_FULL_REFRESH, full_refresh(&state)).await;
                    })
                })?;
            sched.add(full_job).await?;
        }

        sched.start().await?;
        info!(
            "Scheduler running: refresh cron '{}', drain every {}s, cache GC every {}h",
            self.config.incremental_refresh_cron,
            self.config.webhook_drain_interval_seconds,
            self.config.cache_gc_interval_hours
        );

        let mut drain_interval = interval(Duration::from_secs(u64::from(
            self.config.webhook_drain_interval_seconds,
        )));
        let mut gc_interval = interval(Duration::from_secs(
            u64::from(self.config.cache_gc_interval_hours.max(1)) * 3600,
        ));

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::select! {
                _ = drain_interval.tick() => {
                    run_logged(JOB_WEBHOOK_DRAIN, drain_webhook_queue(&self.state)).await;
                }
                _ = gc_interval.tick() => {
                    run_logged(JOB_CACHE_GC, cache_gc(&self.state)).await;
                }
            }
        }

        sched.shutdown().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping scheduler...");
        *self.running.write().await = false;
    }

    pub async fn run_once(&self) -> Result<()> {
        info!("Running manual scheduler pass...");
        drain_webhook_queue(&self.state).await?;
        incremental_refresh(&self.state).await?;
        cache_gc(&self.state).await?;
        Ok(())
    }

    async fn register_job_rows(&self) -> Result<()> {
        let store = &self.state.store;
        store
            .upsert_scheduler_task(
                JOB_WEBHOOK_DRAIN,
                "延时Webhook队列处理",
                JOB_WEBHOOK_DRAIN,
                &format!("every {}s", self.config.webhook_drain_interval_seconds),
                true,
            )
            .await?;
        store
            .upsert_scheduler_task(
                JOB_INCREMENTAL_REFRESH,
                "定时追更",
                JOB_INCREMENTAL_REFRESH,
                &self.config.incremental_refresh_cron,
                true,
            )
            .await?;
        store
            .upsert_scheduler_task(
                JOB_FULL_REFRESH,
                "全量刷新",
                JOB_FULL_REFRESH,
                &self.config.full_refresh_cron,
                self.config.full_refresh_enabled,
            )
            .await?;
        store
            .upsert_scheduler_task(
                JOB_CACHE_GC,
                "缓存清理",
                JOB_CACHE_GC,
                &format!("every {}h", self.config.cache_gc_interval_hours),
                true,
            )
            .await?;
        Ok(())
    }
}

async fn run_logged(job_name: &'static str, fut: impl Future<Output = Result<()>>) {
    let start = std::time::Instant::now();
    info!(event = "job_started", job_name, "Scheduled job starting");
    match fut.await {
        Ok(()) => info!(
            event = "job_finished",
            job_name,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Scheduled job finished"
        ),
        Err(e) => error!(event = "job_failed", job_name, error = %e, "Scheduled job failed"),
    }
}

/// Submit every due webhook-queue row and delete it. Duplicate submissions
/// (the live path may have raced the queue) still clear the row.
async fn drain_webhook_queue(state: &Arc<SharedState>) -> Result<()> {
    let due = state.store.due_webhooks().await?;
    if due.is_empty() {
        return Ok(());
    }
    info!("Draining {} due webhook job(s)", due.len());

    for row in due {
        let job: WebhookJob = match serde_json::from_str(&row.payload_json) {
            Ok(job) => job,
            Err(e) => {
                warn!("Dropping malformed webhook-queue row {}: {}", row.id, e);
                state.store.delete_webhook(row.id).await?;
                continue;
            }
        };

        let source = leak_source(&row.webhook_source);
        match state
            .webhook_dispatcher
            .submit_search_task(source, &row.task_title, &row.unique_key, job)
            .await
        {
            Ok(_) => {}
            Err(crate::webhook::WebhookError::Duplicate(message)) => {
                info!("Queued webhook job '{}' was a duplicate: {}", row.task_title, message);
            }
            Err(crate::webhook::WebhookError::Other(e)) => {
                warn!("Queued webhook job '{}' failed to submit: {}", row.task_title, e);
            }
        }
        state.store.delete_webhook(row.id).await?;
    }

    state.store.mark_scheduler_run(JOB_WEBHOOK_DRAIN).await?;
    Ok(())
}

/// Submit one import task per incremental-refresh source.
async fn incremental_refresh(state: &Arc<SharedState>) -> Result<()> {
    let sources = state.store.incremental_refresh_sources().await?;
    if sources.is_empty() {
        return Ok(());
    }
    info!("Incremental refresh sweep over {} source(s)", sources.len());

    for source in sources {
        let Some(anime) = state.store.get_anime(source.anime_id).await? else {
            continue;
        };

        let request = GenericImportRequest {
            provider: source.provider_name.clone(),
            media_id: source.media_id.clone(),
            title: anime.title.clone(),
            media_type: MediaType::parse(&anime.media_type).unwrap_or(MediaType::TvSeries),
            season: anime.season,
            year: anime.year,
            image_url: anime.image_url.clone(),
            episode_index: None,
            selected_episodes: None,
            metadata_ids: Default::default(),
            fallback: None,
            preassigned_anime_id: None,
            incremental_refresh_source_id: Some(source.id),
            smart_refresh: false,
        };

        let title = format!("定时追更: {} ({})", anime.title, source.provider_name);
        let unique_key = format!("refresh-{}-{}", source.provider_name, source.media_id);
        match state
            .task_manager
            .submit(
                import_task(&state.import_engine, request),
                &title,
                Some(&unique_key),
                "incremental_refresh",
                None,
                Some(JOB_INCREMENTAL_REFRESH),
            )
            .await
        {
            Ok(_) | Err(SubmitError::DuplicateActive { .. } | SubmitError::DuplicateRecent { .. }) => {}
            Err(SubmitError::Other(e)) => warn!("Refresh submit failed: {}", e),
        }
    }

    state.store.mark_scheduler_run(JOB_INCREMENTAL_REFRESH).await?;
    Ok(())
}

/// Smart-refresh every source in the library.
async fn full_refresh(state: &Arc<SharedState>) -> Result<()> {
    let sources = state.store.incremental_refresh_sources().await?;
    for source in sources {
        let Some(anime) = state.store.get_anime(source.anime_id).await? else {
            continue;
        };

        let request = GenericImportRequest {
            provider: source.provider_name.clone(),
            media_id: source.media_id.clone(),
            title: anime.title.clone(),
            media_type: MediaType::parse(&anime.media_type).unwrap_or(MediaType::TvSeries),
            season: anime.season,
            year: anime.year,
            image_url: anime.image_url.clone(),
            episode_index: None,
            selected_episodes: None,
            metadata_ids: Default::default(),
            fallback: None,
            preassigned_anime_id: None,
            incremental_refresh_source_id: None,
            smart_refresh: true,
        };

        let title = format!("全量刷新: {} ({})", anime.title, source.provider_name);
        let unique_key = format!("full-refresh-{}-{}", source.provider_name, source.media_id);
        match state
            .task_manager
            .submit(
                import_task(&state.import_engine, request),
                &title,
                Some(&unique_key),
                "full_refresh",
                None,
                Some(JOB_FULL_REFRESH),
            )
            .await
        {
            Ok(_) | Err(SubmitError::DuplicateActive { .. } | SubmitError::DuplicateRecent { .. }) => {}
            Err(SubmitError::Other(e)) => warn!("Full refresh submit failed: {}", e),
        }
    }

    state.store.mark_scheduler_run(JOB_FULL_REFRESH).await?;
    Ok(())
}

async fn cache_gc(state: &Arc<SharedState>) -> Result<()> {
    let purged = state.store.purge_expired_cache().await?;
    if purged > 0 {
        info!("Cache GC removed {} expired entries", purged);
    }
    state.store.mark_scheduler_run(JOB_CACHE_GC).await?;
    Ok(())
}

/// Webhook sources form a tiny closed set; map them onto static strings for
/// the dispatcher's `&'static str` source labels.
fn leak_source(source: &str) -> &'static str {
    match source {
        "emby" => "emby",
        "jellyfin" => "jellyfin",
        "plex" => "plex",
        "tautulli" => "tautulli",
        _ => "webhook",
    }
}
