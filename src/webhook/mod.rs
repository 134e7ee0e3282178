//! Media-server webhooks.
//!
//! Each server's payload is normalized at the edge into [`WebhookJob`];
//! downstream dispatch never branches on the source again. The dispatcher
//! applies the operator filter regex, then either queues the job for the
//! delayed drain or submits a search-and-dispatch task immediately.

pub mod emby;
pub mod jellyfin;
pub mod plex;
pub mod tautulli;

use futures::future::join_all;
use regex::RegexBuilder;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config_store::ConfigStore;
use crate::constants::matching;
use crate::db::Store;
use crate::matching::token_set_ratio;
use crate::models::media::{MediaType, MetadataIds, ProviderSearchInfo};
use crate::models::webhook::WebhookJob;
use crate::scrapers::{EpisodeSearchHint, ScraperRegistry};
use crate::search::keyword::parse_search_keyword;
use crate::tasks::import::{GenericImportRequest, ImportEngine, import_task};
use crate::tasks::util::is_movie_by_title;
use crate::tasks::{SubmitError, TaskManager, TaskOutcome};

/// What a payload normalizer produced.
pub enum Normalized {
    Jobs(Vec<WebhookJob>),
    /// Series-level event without season info: probe discoverable seasons
    /// and submit one full-season job per season.
    SeriesProbe {
        title: String,
        year: Option<i32>,
        ids: MetadataIds,
    },
    Ignored(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("{0}")]
    Duplicate(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub submitted: usize,
    pub queued: usize,
    pub filtered: usize,
    pub duplicates: usize,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Store,
    config: ConfigStore,
    task_manager: Arc<TaskManager>,
    engine: ImportEngine,
    scrapers: Arc<ScraperRegistry>,
    /// Compiled filter, keyed by its pattern so an operator edit recompiles.
    filter_cache: Arc<std::sync::Mutex<Option<(String, regex::Regex)>>>,
}

impl WebhookDispatcher {
    #[must_use]
    pub fn new(
        store: Store,
        config: ConfigStore,
        task_manager: Arc<TaskManager>,
        engine: ImportEngine,
        scrapers: Arc<ScraperRegistry>,
    ) -> Self {
        Self {
            store,
            config,
            task_manager,
            engine,
            scrapers,
            filter_cache: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Entry point for all webhook endpoints.
    pub async fn handle(
        &self,
        source: &'static str,
        normalized: Normalized,
    ) -> Result<DispatchReport, WebhookError> {
        if !self.config.get_bool("webhookEnabled", true).await {
            info!("Webhooks are globally disabled, ignoring {} payload", source);
            return Ok(DispatchReport::default());
        }

        let jobs = match normalized {
            Normalized::Ignored(reason) => {
                info!("{} webhook ignored: {}", source, reason);
                return Ok(DispatchReport::default());
            }
            Normalized::Jobs(jobs) => jobs,
            Normalized::SeriesProbe { title, year, ids } => {
                let seasons = self.probe_series_seasons(&title).await;
                seasons
                    .into_iter()
                    .map(|season| WebhookJob {
                        media_type: MediaType::TvSeries,
                        title: title.clone(),
                        season,
                        episode_index: None,
                        year,
                        ids: ids.clone(),
                    })
                    .collect()
            }
        };

        let mut report = DispatchReport::default();
        let mut duplicate_message = None;

        for job in jobs {
            if !self.passes_filter(&job).await {
                report.filtered += 1;
                continue;
            }

            match self.dispatch(source, job).await {
                Ok(Dispatched::Queued) => report.queued += 1,
                Ok(Dispatched::Submitted) => report.submitted += 1,
                Err(WebhookError::Duplicate(message)) => {
                    report.duplicates += 1;
                    duplicate_message = Some(message);
                }
                Err(e) => return Err(e),
            }
        }

        // A payload that only produced duplicates is a conflict; partial
        // fan-outs (some new, some duplicate) still count as accepted.
        if report.submitted == 0 && report.queued == 0 {
            if let Some(message) = duplicate_message {
                return Err(WebhookError::Duplicate(message));
            }
        }
        Ok(report)
    }

    /// Apply the operator filter; blacklist drops matches, whitelist drops
    /// non-matches. The regex is compiled once and reused until the
    /// pattern changes.
    async fn passes_filter(&self, job: &WebhookJob) -> bool {
        let pattern = self.config.get("webhookFilterRegex", "").await;
        if pattern.is_empty() {
            return true;
        }

        let cached = {
            let cache = self.filter_cache.lock().expect("filter cache poisoned");
            cache
                .as_ref()
                .filter(|(p, _)| *p == pattern)
                .map(|(_, r)| r.clone())
        };

        let regex = match cached {
            Some(regex) => regex,
            None => match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(regex) => {
                    let mut cache = self.filter_cache.lock().expect("filter cache poisoned");
                    *cache = Some((pattern.clone(), regex.clone()));
                    regex
                }
                Err(e) => {
                    warn!(
                        "Invalid webhookFilterRegex '{}': {}, filter skipped",
                        pattern, e
                    );
                    return true;
                }
            },
        };

        let mode = self.config.get("webhookFilterMode", "blacklist").await;
        let matches = regex.is_match(&job.title);
        let dropped = match mode.as_str() {
            "whitelist" => !matches,
            _ => matches,
        };
        if dropped {
            info!("Webhook job '{}' dropped by {} filter", job.title, mode);
        }
        !dropped
    }

    async fn dispatch(
        &self,
        source: &'static str,
        job: WebhookJob,
    ) -> Result<Dispatched, WebhookError> {
        let task_title = format!("Webhook（{source}）搜索: {}", job.search_keyword());
        let unique_key = job.unique_key();

        if self.config.get_bool("webhookDelayedImportEnabled", false).await {
            let delay_hours = self.config.get_i64("webhookDelayedImportHours", 24).await;
            let payload = serde_json::to_string(&job).map_err(anyhow::Error::from)?;
            self.store
                .enqueue_webhook(
                    &task_title,
                    &unique_key,
                    &payload,
                    source,
                    chrono::Duration::hours(delay_hours),
                )
                .await
                .map_err(WebhookError::Other)?;
            info!("Webhook job '{}' queued for delayed import", task_title);
            return Ok(Dispatched::Queued);
        }

        self.submit_search_task(source, &task_title, &unique_key, job)
            .await?;
        Ok(Dispatched::Submitted)
    }

    /// Submit the search-and-dispatch task for one normalized job. Also
    /// used by the scheduler drain for queued rows.
    pub async fn submit_search_task(
        &self,
        source: &'static str,
        task_title: &str,
        unique_key: &str,
        job: WebhookJob,
    ) -> Result<String, WebhookError> {
        let dispatcher = self.clone();
        let factory: crate::tasks::TaskFactory = Arc::new(move |ctx| {
            let dispatcher = dispatcher.clone();
            let job = job.clone();
            Box::pin(async move { dispatcher.search_and_dispatch(&ctx, source, job).await })
        });

        let parameters = serde_json::to_string(&serde_json::json!({
            "webhookSource": source,
            "uniqueKey": unique_key,
        }))
        .ok();

        match self
            .task_manager
            .submit(
                factory,
                task_title,
                Some(unique_key),
                "webhook_search",
                parameters.as_deref(),
                None,
            )
            .await
        {
            Ok(task_id) => Ok(task_id),
            Err(e @ (SubmitError::DuplicateActive { .. } | SubmitError::DuplicateRecent { .. })) => {
                Err(WebhookError::Duplicate(e.to_string()))
            }
            Err(SubmitError::Other(e)) => Err(WebhookError::Other(e)),
        }
    }

    /// The webhook background task: favor the favorited source, otherwise
    /// search every provider and import the best match(es).
    async fn search_and_dispatch(
        &self,
        ctx: &crate::tasks::TaskContext,
        source: &'static str,
        job: WebhookJob,
    ) -> anyhow::Result<TaskOutcome> {
        ctx.progress(5, "正在检查已收藏的源...").await?;

        if let Some(outcome) = self.try_favorited_source(ctx, source, &job).await? {
            return Ok(outcome);
        }

        ctx.progress(20, "并发搜索所有源...").await?;
        let parsed = parse_search_keyword(&job.search_keyword());
        let candidates = self
            .fan_out_search(&parsed.title, job.season, job.episode_index)
            .await;

        if candidates.is_empty() {
            return Ok(TaskOutcome::Failed(format!(
                "未找到 '{}' 的任何可用源。",
                job.title
            )));
        }

        let mut valid: Vec<ProviderSearchInfo> = candidates
            .into_iter()
            .map(|mut c| {
                if c.media_type == MediaType::TvSeries && is_movie_by_title(&c.title) {
                    c.media_type = MediaType::Movie;
                    c.season = 1;
                }
                c
            })
            .filter(|c| {
                c.media_type == job.media_type
                    && (job.media_type != MediaType::TvSeries || c.season == job.season)
            })
            .collect();

        if valid.is_empty() {
            return Ok(TaskOutcome::Failed(format!(
                "未找到 '{}' 的精确匹配项。",
                job.title
            )));
        }

        let orders = self.store.scraper_display_orders().await?;
        valid.sort_by(|a, b| {
            token_set_ratio(&job.title, &b.title)
                .cmp(&token_set_ratio(&job.title, &a.title))
                .then_with(|| {
                    let order_a = orders.get(&a.provider).copied().unwrap_or(999);
                    let order_b = orders.get(&b.provider).copied().unwrap_or(999);
                    order_a.cmp(&order_b)
                })
        });

        // Everything within the tie delta of the top score is imported.
        let top_score = token_set_ratio(&job.title, &valid[0].title);
        let mut seen = HashSet::new();
        let top_matches: Vec<ProviderSearchInfo> = valid
            .into_iter()
            .take_while(|c| top_score - token_set_ratio(&job.title, &c.title) <= matching::FUZZY_TIE_SCORE_DELTA)
            .filter(|c| seen.insert((c.provider.clone(), c.media_id.clone())))
            .collect();

        ctx.progress(55, &format!("准备创建 {} 个导入任务", top_matches.len()))
            .await?;

        let total = top_matches.len();
        let mut created = 0;
        for (idx, matched) in top_matches.into_iter().enumerate() {
            let episode_part = job
                .episode_index
                .map_or_else(|| "full".to_string(), |ep| format!("ep{ep}"));
            let unique_key = format!(
                "import-{}-{}-{}",
                matched.provider, matched.media_id, episode_part
            );
            let task_title = if total > 1 {
                format!(
                    "Webhook（{source}）自动导入[{}/{}]：{} ({})",
                    idx + 1,
                    total,
                    matched.title,
                    matched.provider
                )
            } else {
                format!(
                    "Webhook（{source}）自动导入：{} ({})",
                    matched.title, matched.provider
                )
            };

            let request = GenericImportRequest {
                provider: matched.provider.clone(),
                media_id: matched.media_id.clone(),
                title: matched.title.clone(),
                media_type: matched.media_type,
                season: job.season,
                year: job.year,
                image_url: matched.image_url.clone(),
                episode_index: job.episode_index,
                selected_episodes: None,
                metadata_ids: job.ids.clone(),
                fallback: None,
                preassigned_anime_id: None,
                incremental_refresh_source_id: None,
                smart_refresh: false,
            };

            match self
                .task_manager
                .submit(
                    import_task(&self.engine, request),
                    &task_title,
                    Some(&unique_key),
                    "generic_import",
                    None,
                    None,
                )
                .await
            {
                Ok(_) => created += 1,
                Err(e @ (SubmitError::DuplicateActive { .. }
                | SubmitError::DuplicateRecent { .. })) => {
                    info!("Webhook import task duplicate skipped: {}", e);
                }
                Err(SubmitError::Other(e)) => return Err(e),
            }
        }

        if created == 0 {
            return Ok(TaskOutcome::Success(
                "Webhook: 所有匹配源均已有等效任务，无需新建。".to_string(),
            ));
        }
        Ok(TaskOutcome::Success(format!(
            "Webhook: 已为 {created} 个最高匹配源创建导入任务。"
        )))
    }

    async fn try_favorited_source(
        &self,
        ctx: &crate::tasks::TaskContext,
        source: &'static str,
        job: &WebhookJob,
    ) -> anyhow::Result<Option<TaskOutcome>> {
        let Some(anime) = self
            .store
            .find_anime_by_title_season_year(&job.title, job.season, None)
            .await?
        else {
            return Ok(None);
        };
        let Some(favorited) = self.store.find_favorited_source(anime.id).await? else {
            return Ok(None);
        };

        ctx.progress(10, &format!("找到已收藏的源: {}", favorited.provider_name))
            .await?;

        let episode_part = job
            .episode_index
            .map_or_else(|| "full".to_string(), |ep| format!("ep{ep}"));
        let unique_key = format!(
            "import-{}-{}-{}",
            favorited.provider_name, favorited.media_id, episode_part
        );
        let task_title = format!(
            "Webhook（{source}）自动导入：{} ({})",
            anime.title, favorited.provider_name
        );

        let request = GenericImportRequest {
            provider: favorited.provider_name.clone(),
            media_id: favorited.media_id.clone(),
            title: anime.title.clone(),
            media_type: MediaType::parse(&anime.media_type).unwrap_or(job.media_type),
            season: job.season,
            year: job.year,
            image_url: anime.image_url.clone(),
            episode_index: job.episode_index,
            selected_episodes: None,
            metadata_ids: job.ids.clone(),
            fallback: None,
            preassigned_anime_id: None,
            incremental_refresh_source_id: None,
            smart_refresh: false,
        };

        match self
            .task_manager
            .submit(
                import_task(&self.engine, request),
                &task_title,
                Some(&unique_key),
                "generic_import",
                None,
                None,
            )
            .await
        {
            Ok(_) => Ok(Some(TaskOutcome::Success(format!(
                "Webhook: 已为收藏源 '{}' 创建导入任务。",
                favorited.provider_name
            )))),
            Err(SubmitError::DuplicateActive { .. } | SubmitError::DuplicateRecent { .. }) => {
                Ok(Some(TaskOutcome::Success(
                    "Webhook: 收藏源已有等效任务，无需新建。".to_string(),
                )))
            }
            Err(SubmitError::Other(e)) => Err(e),
        }
    }

    /// Direct scraper fan-out used by webhook flows (no pipeline cache, no
    /// search lock: webhook search runs inside the single-writer task).
    async fn fan_out_search(
        &self,
        title: &str,
        season: i32,
        episode: Option<i32>,
    ) -> Vec<ProviderSearchInfo> {
        let enabled = self.store.enabled_scrapers().await.unwrap_or_default();
        let titles = vec![title.to_string()];
        let hint = EpisodeSearchHint {
            season: Some(season),
            episode,
        };

        let futures = enabled.iter().filter_map(|name| {
            let scraper = self.scrapers.get(name).ok()?;
            let titles = titles.clone();
            Some(async move {
                match scraper.search(&titles, hint).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!("Webhook search via {} failed: {}", scraper.provider_name(), e);
                        Vec::new()
                    }
                }
            })
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    /// Discover which seasons exist for a series-level event; falls back to
    /// season 1 when nothing is found.
    async fn probe_series_seasons(&self, title: &str) -> Vec<i32> {
        let results = self.fan_out_search(title, 1, None).await;
        let mut seasons: Vec<i32> = results
            .iter()
            .filter(|r| r.media_type == MediaType::TvSeries && r.season > 0)
            .map(|r| r.season)
            .collect();
        seasons.sort_unstable();
        seasons.dedup();

        if seasons.is_empty() {
            info!("No season info discoverable for '{}', defaulting to S01", title);
            vec![1]
        } else {
            info!("Discovered seasons {:?} for '{}'", seasons, title);
            seasons
        }
    }
}

enum Dispatched {
    Queued,
    Submitted,
}

/// Case-insensitive provider-id extraction from an Emby-style map.
fn provider_ids_from_map(value: Option<&Value>) -> MetadataIds {
    let mut ids = MetadataIds::default();
    let Some(map) = value.and_then(Value::as_object) else {
        return ids;
    };

    for (key, value) in map {
        let Some(value) = value.as_str().filter(|s| !s.is_empty()) else {
            continue;
        };
        match key.to_lowercase().as_str() {
            "tmdb" => ids.tmdb_id = Some(value.to_string()),
            "imdb" => ids.imdb_id = Some(value.to_string()),
            "tvdb" => ids.tvdb_id = Some(value.to_string()),
            "douban" | "doubanid" => ids.douban_id = Some(value.to_string()),
            "bangumi" => ids.bangumi_id = Some(value.to_string()),
            _ => {}
        }
    }
    ids
}

/// Plex encodes ids as `Guid: [{id: "tmdb://123"}, ...]`.
fn provider_ids_from_guids(value: Option<&Value>) -> MetadataIds {
    let mut ids = MetadataIds::default();
    let Some(guids) = value.and_then(Value::as_array) else {
        return ids;
    };

    for guid in guids {
        let Some(id) = guid.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some((scheme, value)) = id.split_once("://") else {
            continue;
        };
        match scheme.to_lowercase().as_str() {
            "tmdb" => ids.tmdb_id = Some(value.to_string()),
            "imdb" => ids.imdb_id = Some(value.to_string()),
            "tvdb" => ids.tvdb_id = Some(value.to_string()),
            _ => {}
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_id_map_is_case_insensitive() {
        let value = json!({"Tmdb": "1", "IMDB": "tt2", "douban": "3", "DoubanID": "4"});
        let ids = provider_ids_from_map(Some(&value));
        assert_eq!(ids.tmdb_id.as_deref(), Some("1"));
        assert_eq!(ids.imdb_id.as_deref(), Some("tt2"));
        assert!(ids.douban_id.is_some());
    }

    #[test]
    fn guid_list_parses_schemes() {
        let value = json!([{"id": "tmdb://95479"}, {"id": "tvdb://371310"}, {"id": "junk"}]);
        let ids = provider_ids_from_guids(Some(&value));
        assert_eq!(ids.tmdb_id.as_deref(), Some("95479"));
        assert_eq!(ids.tvdb_id.as_deref(), Some("371310"));
        assert!(ids.imdb_id.is_none());
    }
}
