//! The import engine: validate a source by proving episode 1, then download
//! remaining episodes and commit them one at a time.
//!
//! The strict invariant throughout: no anime/source row exists until one
//! episode fetch returned actual comments. Per-episode failures are
//! absorbed into the terminal summary; a rate-limit hit converts into a
//! cooperative pause outcome that the manager retries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::util::{format_episode_ranges, short_error_message};
use super::{TaskContext, TaskOutcome};
use crate::config_store::ConfigStore;
use crate::danmaku::DanmakuStore;
use crate::db::Store;
use crate::image::ImageService;
use crate::models::danmaku::Comment;
use crate::models::media::{MediaType, MetadataIds, ProviderEpisodeInfo};
use crate::rate_limiter::{FallbackKind, RateLimitExceeded, RateLimiter};
use crate::recognition::TitleRecognizer;
use crate::scrapers::{Scraper, ScraperRegistry};

/// Workers used in the bounded-concurrent download mode.
const CONCURRENT_DOWNLOADS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTag {
    Match,
    Search,
}

impl FallbackTag {
    #[must_use]
    pub const fn kind(self) -> FallbackKind {
        match self {
            Self::Match => FallbackKind::Match,
            Self::Search => FallbackKind::Search,
        }
    }
}

/// Inputs of the canonical "generic import" job. Serialized into the task
/// history row so interrupted jobs can be diagnosed after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericImportRequest {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    /// Single-episode request; `None` imports the full season.
    pub episode_index: Option<i32>,
    /// Library-driven partial import: only these canonical indices.
    pub selected_episodes: Option<Vec<i32>>,
    #[serde(default)]
    pub metadata_ids: MetadataIds,
    #[serde(default)]
    pub fallback: Option<FallbackTag>,
    pub preassigned_anime_id: Option<i32>,
    pub incremental_refresh_source_id: Option<i32>,
    #[serde(default)]
    pub smart_refresh: bool,
}

/// Operator-curated episode list variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditedImportRequest {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub metadata_ids: MetadataIds,
    pub episodes: Vec<ProviderEpisodeInfo>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImportStats {
    comments_added: i64,
    successful: Vec<i32>,
    skipped: Vec<i32>,
    failed: BTreeMap<i32, String>,
}

enum IterationResult {
    Finished(ImportStats),
    /// Rate limit hit at `at_index`; accumulated stats travel along so the
    /// resumed run continues instead of starting over.
    Paused {
        error: RateLimitExceeded,
        at_index: i32,
        stats: ImportStats,
    },
}

/// Everything a paused import needs to re-enter the download loop at the
/// episode that hit the limit: no re-enumeration, no episode-1 refetch.
#[derive(Debug, Serialize, Deserialize)]
struct PausedImportState {
    anime_id: i32,
    source_id: i32,
    episodes: Vec<ProviderEpisodeInfo>,
    resume_index: i32,
    image_failed: bool,
    stats: ImportStats,
}

#[derive(Clone)]
pub struct ImportEngine {
    store: Store,
    config: ConfigStore,
    scrapers: Arc<ScraperRegistry>,
    rate_limiter: Arc<RateLimiter>,
    recognizer: Arc<TitleRecognizer>,
    danmaku: DanmakuStore,
    images: ImageService,
}

impl ImportEngine {
    #[must_use]
    pub fn new(
        store: Store,
        config: ConfigStore,
        scrapers: Arc<ScraperRegistry>,
        rate_limiter: Arc<RateLimiter>,
        recognizer: Arc<TitleRecognizer>,
        danmaku: DanmakuStore,
        images: ImageService,
    ) -> Self {
        Self {
            store,
            config,
            scrapers,
            rate_limiter,
            recognizer,
            danmaku,
            images,
        }
    }

    async fn check_rate(
        &self,
        fallback: Option<FallbackTag>,
        provider: &str,
    ) -> Result<(), RateLimitExceeded> {
        match fallback {
            Some(tag) => self.rate_limiter.check_fallback(tag.kind(), provider).await,
            None => self.rate_limiter.check(provider).await,
        }
    }

    async fn bump_rate(&self, fallback: Option<FallbackTag>, provider: &str) {
        let result = match fallback {
            Some(tag) => {
                self.rate_limiter
                    .increment_fallback(tag.kind(), provider)
                    .await
            }
            None => self.rate_limiter.increment(provider).await,
        };
        if let Err(e) = result {
            warn!("Rate limit increment failed for {}: {}", provider, e);
        }
    }

    /// The canonical import job: enumerate episodes, prove the source,
    /// download iteratively, then settle refresh bookkeeping.
    pub async fn generic_import(
        &self,
        ctx: &TaskContext,
        req: GenericImportRequest,
    ) -> anyhow::Result<TaskOutcome> {
        // A rate-limit pause leaves the loop position in the context; the
        // resumed run re-enters the download loop at that episode.
        if let Some(state) = ctx.take_resume_state() {
            match serde_json::from_value::<PausedImportState>(state) {
                Ok(paused) => return self.resume_import(ctx, &req, paused).await,
                Err(e) => warn!("Discarding unreadable resume state: {}", e),
            }
        }

        let scraper = self.scrapers.get(&req.provider)?;
        let title = req.title.trim().to_string();

        ctx.progress(10, "正在获取分集列表...").await?;

        // Library-driven partial imports need the full list before the
        // local filter.
        let target_episode = if req.selected_episodes.is_some() {
            None
        } else {
            req.episode_index
        };

        let mut episodes = scraper
            .get_episodes(&req.media_id, target_episode, Some(req.media_type))
            .await?;

        // In-flight recognition: canonical indices before any comparison.
        for episode in &mut episodes {
            episode.episode_index = self
                .recognizer
                .canonical_episode_index(&title, episode.episode_index);
        }

        if episodes.is_empty() {
            return self.failover_single_episode(ctx, &*scraper, &req, &title).await;
        }

        if let Some(selected) = &req.selected_episodes {
            let outcome = self
                .filter_selected(&req, selected, &mut episodes)
                .await?;
            if let Some(done) = outcome {
                return Ok(done);
            }
        }

        self.validate_and_import(ctx, &*scraper, &req, &title, episodes)
            .await
    }

    /// Provider-level failover: no episode list, but a single-episode
    /// request may still succeed by fetching comments for the media id
    /// directly.
    async fn failover_single_episode(
        &self,
        ctx: &TaskContext,
        scraper: &dyn Scraper,
        req: &GenericImportRequest,
        title: &str,
    ) -> anyhow::Result<TaskOutcome> {
        let Some(episode_index) = req.episode_index else {
            return Ok(TaskOutcome::Success("未找到任何分集信息。".to_string()));
        };

        ctx.progress(15, "未找到分集列表，尝试故障转移...").await?;

        if let Err(e) = self.check_rate(req.fallback, &req.provider).await {
            return Ok(pause_for(e));
        }
        let comments = scraper.get_comments(&req.media_id, None).await?;
        if comments.is_some() {
            self.bump_rate(req.fallback, &req.provider).await;
        }

        let Some(comments) = comments.filter(|c| !c.is_empty()) else {
            return Ok(TaskOutcome::Failed(format!(
                "未能找到第 {episode_index} 集。"
            )));
        };

        ctx.progress(20, &format!("故障转移成功，找到 {} 条弹幕。", comments.len()))
            .await?;

        let (anime_id, source_id, image_failed) = self
            .create_library_rows(req, title)
            .await?;

        let synthesized = ProviderEpisodeInfo {
            provider: req.provider.clone(),
            episode_id: "failover".to_string(),
            title: format!("第 {episode_index} 集"),
            episode_index,
            url: None,
        };
        let added = self
            .commit_episode(anime_id, source_id, &synthesized, &comments)
            .await?;

        let mut message = format!("通过故障转移导入完成，共新增 {added} 条弹幕。");
        if image_failed {
            message.push_str(" (警告：海报图片下载失败)");
        }
        Ok(TaskOutcome::Success(message))
    }

    /// Apply the `selected_episodes` filter. Returns a terminal outcome
    /// when nothing is left to do.
    async fn filter_selected(
        &self,
        req: &GenericImportRequest,
        selected: &[i32],
        episodes: &mut Vec<ProviderEpisodeInfo>,
    ) -> anyhow::Result<Option<TaskOutcome>> {
        let wanted: Vec<i32> = selected.iter().copied().filter(|&i| i > 0).collect();
        episodes.retain(|ep| wanted.contains(&ep.episode_index));

        if episodes.is_empty() {
            return Ok(Some(TaskOutcome::Success(
                "源中没有媒体库选择的任一分集，未导入新的弹幕。".to_string(),
            )));
        }

        let indices: Vec<i32> = episodes.iter().map(|e| e.episode_index).collect();
        let present = self
            .store
            .present_episode_indices(&req.provider, &req.media_id, &indices)
            .await?;

        if !present.is_empty() && indices.iter().all(|i| present.contains(i)) {
            let range = format_episode_ranges(&present);
            return Ok(Some(TaskOutcome::Success(format!(
                "导入完成，跳过集: < {range} > (已有弹幕)，未新增弹幕。"
            ))));
        }

        // Missing episodes first so validation spends its first fetch on
        // something new.
        episodes.sort_by_key(|ep| present.contains(&ep.episode_index));
        Ok(None)
    }

    /// Prove the source with one episode fetch, then run the download
    /// loop. No rows exist until the proof succeeds.
    async fn validate_and_import(
        &self,
        ctx: &TaskContext,
        scraper: &dyn Scraper,
        req: &GenericImportRequest,
        title: &str,
        episodes: Vec<ProviderEpisodeInfo>,
    ) -> anyhow::Result<TaskOutcome> {
        let first = &episodes[0];
        ctx.progress(20, &format!("正在验证数据源有效性: {}", first.title))
            .await?;

        if let Err(e) = self.check_rate(req.fallback, &req.provider).await {
            return Ok(pause_for(e));
        }

        let first_comments = match scraper.get_comments(&first.episode_id, None).await {
            Ok(comments) => {
                if comments.is_some() {
                    self.bump_rate(req.fallback, &req.provider).await;
                }
                comments
            }
            Err(e) => {
                warn!("Source validation fetch failed: {}", e);
                None
            }
        };

        let Some(first_comments) = first_comments.filter(|c| !c.is_empty()) else {
            return Ok(TaskOutcome::Success(
                "数据源验证失败，未能获取到任何弹幕，未创建数据库条目。".to_string(),
            ));
        };

        info!(
            "Source validated, episode 1 returned {} comments",
            first_comments.len()
        );
        ctx.progress(30, "数据源验证成功，正在创建数据库条目...")
            .await?;

        let (anime_id, source_id, image_failed) = self.create_library_rows(req, title).await?;

        let result = self
            .import_iteratively(
                ctx,
                scraper,
                req,
                anime_id,
                source_id,
                &episodes,
                Some(first_comments),
                ImportStats::default(),
                0,
            )
            .await?;

        let stats = match result {
            IterationResult::Paused {
                error,
                at_index,
                stats,
            } => {
                stash_pause(ctx, anime_id, source_id, episodes, at_index, image_failed, stats);
                return Ok(pause_for(error));
            }
            IterationResult::Finished(stats) => stats,
        };

        self.record_refresh_outcome(req, &stats).await?;

        Ok(summarize(&stats, image_failed))
    }

    /// Continue a paused import: the library rows exist and the episode
    /// list is already enumerated, so only the paused index is retried and
    /// the loop carries on from there.
    async fn resume_import(
        &self,
        ctx: &TaskContext,
        req: &GenericImportRequest,
        paused: PausedImportState,
    ) -> anyhow::Result<TaskOutcome> {
        let scraper = self.scrapers.get(&req.provider)?;

        let start = paused
            .episodes
            .iter()
            .position(|e| e.episode_index == paused.resume_index)
            .unwrap_or(0);

        ctx.progress(
            30,
            &format!("速率限制解除，从第 {} 集继续导入", paused.resume_index),
        )
        .await?;

        let result = self
            .import_iteratively(
                ctx,
                &*scraper,
                req,
                paused.anime_id,
                paused.source_id,
                &paused.episodes,
                None,
                paused.stats,
                start,
            )
            .await?;

        let stats = match result {
            IterationResult::Paused {
                error,
                at_index,
                stats,
            } => {
                stash_pause(
                    ctx,
                    paused.anime_id,
                    paused.source_id,
                    paused.episodes,
                    at_index,
                    paused.image_failed,
                    stats,
                );
                return Ok(pause_for(error));
            }
            IterationResult::Finished(stats) => stats,
        };

        self.record_refresh_outcome(req, &stats).await?;

        Ok(summarize(&stats, paused.image_failed))
    }

    /// Create anime, metadata and source rows. Only reached after a proven
    /// episode fetch.
    async fn create_library_rows(
        &self,
        req: &GenericImportRequest,
        title: &str,
    ) -> anyhow::Result<(i32, i32, bool)> {
        let mut image_failed = false;
        let mut local_image_path = None;
        if let Some(url) = &req.image_url {
            local_image_path = self.images.download(url).await;
            image_failed = local_image_path.is_none();
        }

        let storage_title = self.recognizer.storage_title(title);

        let anime_id = if let Some(id) = req.preassigned_anime_id {
            self.store
                .create_anime_with_id(
                    id,
                    &storage_title,
                    req.media_type,
                    req.season,
                    req.year,
                    req.image_url.as_deref(),
                    local_image_path.as_deref(),
                )
                .await?;
            id
        } else {
            self.store
                .get_or_create_anime(
                    &storage_title,
                    req.media_type,
                    req.season,
                    req.year,
                    req.image_url.as_deref(),
                    local_image_path.as_deref(),
                )
                .await?
        };

        self.store
            .update_metadata_if_empty(anime_id, &req.metadata_ids)
            .await?;
        let source_id = self
            .store
            .link_source(anime_id, &req.provider, &req.media_id)
            .await?;

        info!(
            "Library rows ready (anime {}, source {})",
            anime_id, source_id
        );
        Ok((anime_id, source_id, image_failed))
    }

    /// The download loop. Serial by default; the bounded-concurrent mode only covers
    /// the trivial single-episode case. `stats` and `start` carry a paused
    /// run's position so a resume retries the limited episode, not the
    /// whole list.
    #[allow(clippy::too_many_arguments)]
    async fn import_iteratively(
        &self,
        ctx: &TaskContext,
        scraper: &dyn Scraper,
        req: &GenericImportRequest,
        anime_id: i32,
        source_id: i32,
        episodes: &[ProviderEpisodeInfo],
        mut first_comments: Option<Vec<Comment>>,
        mut stats: ImportStats,
        start: usize,
    ) -> anyhow::Result<IterationResult> {
        let smart_refresh =
            req.smart_refresh || self.config.get_bool("smartRefreshEnabled", false).await;

        let concurrent = req.episode_index.is_some() && episodes.len() == 1;
        if concurrent {
            let downloads = self
                .download_concurrent(req, scraper, episodes, first_comments.take())
                .await;
            ctx.progress(90, "正在写入数据库...").await?;

            for (episode, comments) in downloads {
                self.commit_outcome(
                    anime_id,
                    source_id,
                    &episode,
                    comments,
                    smart_refresh,
                    &mut stats,
                )
                .await;
            }
            return Ok(IterationResult::Finished(stats));
        }

        let total = episodes.len();
        for (i, episode) in episodes.iter().enumerate().skip(start) {
            let base_progress = 30 + i32::try_from(i * 60 / total).unwrap_or(60);
            ctx.progress(base_progress, &format!("正在处理分集: {}", episode.title))
                .await?;

            let prefetched = (i == 0).then(|| first_comments.take()).flatten();

            // Recheck presence before any network traffic.
            if prefetched.is_none()
                && !smart_refresh
                && self
                    .store
                    .episode_present(source_id, episode.episode_index)
                    .await?
            {
                stats.skipped.push(episode.episode_index);
                continue;
            }

            let comments = if let Some(comments) = prefetched {
                Some(comments)
            } else {
                if let Err(e) = self.check_rate(req.fallback, &req.provider).await {
                    return Ok(IterationResult::Paused {
                        error: e,
                        at_index: episode.episode_index,
                        stats,
                    });
                }
                match scraper.get_comments(&episode.episode_id, None).await {
                    Ok(comments) => {
                        if comments.is_some() {
                            self.bump_rate(req.fallback, &req.provider).await;
                        }
                        comments
                    }
                    Err(e) => {
                        stats
                            .failed
                            .insert(episode.episode_index, short_error_message(&e));
                        continue;
                    }
                }
            };

            self.commit_outcome(
                anime_id,
                source_id,
                episode,
                comments,
                smart_refresh,
                &mut stats,
            )
            .await;
        }

        Ok(IterationResult::Finished(stats))
    }

    /// Semaphore-bounded fetch of a small episode set.
    async fn download_concurrent(
        &self,
        req: &GenericImportRequest,
        scraper: &dyn Scraper,
        episodes: &[ProviderEpisodeInfo],
        first_comments: Option<Vec<Comment>>,
    ) -> Vec<(ProviderEpisodeInfo, Option<Vec<Comment>>)> {
        let semaphore = Arc::new(Semaphore::new(CONCURRENT_DOWNLOADS));
        let mut results = Vec::with_capacity(episodes.len());
        let mut first_comments = first_comments;

        let futures = episodes.iter().enumerate().map(|(i, episode)| {
            let semaphore = semaphore.clone();
            let prefetched = (i == 0).then(|| first_comments.take()).flatten();
            async move {
                let _permit = semaphore.acquire().await;
                if let Some(comments) = prefetched {
                    return (episode.clone(), Some(comments));
                }

                if self.check_rate(req.fallback, &req.provider).await.is_err() {
                    return (episode.clone(), None);
                }
                match scraper.get_comments(&episode.episode_id, None).await {
                    Ok(comments) => {
                        if comments.is_some() {
                            self.bump_rate(req.fallback, &req.provider).await;
                        }
                        (episode.clone(), comments)
                    }
                    Err(e) => {
                        warn!("Concurrent fetch of '{}' failed: {}", episode.title, e);
                        (episode.clone(), None)
                    }
                }
            }
        });

        for result in futures::future::join_all(futures).await {
            results.push(result);
        }
        results
    }

    /// Sort one fetched episode into successful/skipped/failed, committing
    /// when there is something to write.
    async fn commit_outcome(
        &self,
        anime_id: i32,
        source_id: i32,
        episode: &ProviderEpisodeInfo,
        comments: Option<Vec<Comment>>,
        smart_refresh: bool,
        stats: &mut ImportStats,
    ) {
        let Some(comments) = comments else {
            stats
                .failed
                .insert(episode.episode_index, "获取弹幕失败".to_string());
            return;
        };
        if comments.is_empty() {
            stats
                .failed
                .insert(episode.episode_index, "获取弹幕为空".to_string());
            return;
        }

        if smart_refresh {
            if let Ok(Some(existing)) = self
                .store
                .find_episode_by_index(source_id, episode.episode_index)
                .await
            {
                let new_count = i32::try_from(comments.len()).unwrap_or(i32::MAX);
                if existing.comment_count > 0 && new_count <= existing.comment_count {
                    stats.skipped.push(episode.episode_index);
                    return;
                }
            }
        } else if let Ok(true) = self
            .store
            .episode_present(source_id, episode.episode_index)
            .await
        {
            stats.skipped.push(episode.episode_index);
            return;
        }

        match self
            .commit_episode(anime_id, source_id, episode, &comments)
            .await
        {
            Ok(added) => {
                stats.comments_added += i64::from(added);
                stats.successful.push(episode.episode_index);
            }
            Err(e) => {
                stats.failed.insert(
                    episode.episode_index,
                    format!("写入数据库失败: {}", short_error_message(&e)),
                );
            }
        }
    }

    /// Write one episode's blob and row; all-or-nothing per episode.
    async fn commit_episode(
        &self,
        _anime_id: i32,
        source_id: i32,
        episode: &ProviderEpisodeInfo,
        comments: &[Comment],
    ) -> anyhow::Result<i32> {
        let episode_id = self
            .store
            .get_or_create_episode(
                source_id,
                episode.episode_index,
                &episode.title,
                episode.url.as_deref(),
                &episode.episode_id,
            )
            .await?;

        let (path, count) = self.danmaku.write(episode_id, comments).await?;
        self.store
            .set_episode_danmaku(episode_id, &path, count)
            .await?;
        Ok(count)
    }

    /// Incremental-refresh failure accounting.
    async fn record_refresh_outcome(
        &self,
        req: &GenericImportRequest,
        stats: &ImportStats,
    ) -> anyhow::Result<()> {
        let Some(source_id) = req.incremental_refresh_source_id else {
            return Ok(());
        };

        let all_failed =
            stats.successful.is_empty() && stats.skipped.is_empty() && !stats.failed.is_empty();
        if all_failed {
            self.store.record_refresh_failure(source_id).await?;
        } else {
            self.store.reset_refresh_failures(source_id).await?;
        }
        Ok(())
    }

    /// Edited import: drop episodes the repo already has, then validate
    /// and download the trimmed list.
    pub async fn edited_import(
        &self,
        ctx: &TaskContext,
        req: EditedImportRequest,
    ) -> anyhow::Result<TaskOutcome> {
        let generic = GenericImportRequest {
            provider: req.provider.clone(),
            media_id: req.media_id.clone(),
            title: req.title.clone(),
            media_type: req.media_type,
            season: req.season,
            year: req.year,
            image_url: req.image_url.clone(),
            episode_index: None,
            selected_episodes: None,
            metadata_ids: req.metadata_ids.clone(),
            fallback: None,
            preassigned_anime_id: None,
            incremental_refresh_source_id: None,
            smart_refresh: false,
        };

        // A resumed run continues the paused loop; it never re-validates.
        if let Some(state) = ctx.take_resume_state() {
            match serde_json::from_value::<PausedImportState>(state) {
                Ok(paused) => return self.resume_import(ctx, &generic, paused).await,
                Err(e) => warn!("Discarding unreadable resume state: {}", e),
            }
        }

        let indices: Vec<i32> = req.episodes.iter().map(|e| e.episode_index).collect();
        let present = self
            .store
            .present_episode_indices(&req.provider, &req.media_id, &indices)
            .await?;

        let mut episodes = req.episodes.clone();
        episodes.retain(|e| !present.contains(&e.episode_index));

        if episodes.is_empty() {
            let range = format_episode_ranges(&present);
            return Ok(TaskOutcome::Success(format!(
                "导入完成，跳过集: < {range} > (已有弹幕)，未新增弹幕。"
            )));
        }

        let scraper = self.scrapers.get(&generic.provider)?;
        let title = generic.title.trim().to_string();
        self.validate_and_import(ctx, &*scraper, &generic, &title, episodes)
            .await
    }
}

/// Task-factory wrapper so callers can queue a generic import through the
/// manager.
#[must_use]
pub fn import_task(engine: &ImportEngine, req: GenericImportRequest) -> crate::tasks::TaskFactory {
    let engine = engine.clone();
    Arc::new(move |ctx| {
        let engine = engine.clone();
        let req = req.clone();
        Box::pin(async move { engine.generic_import(&ctx, req).await })
    })
}

/// Task-factory wrapper for the edited-import variant.
#[must_use]
pub fn edited_import_task(
    engine: &ImportEngine,
    req: EditedImportRequest,
) -> crate::tasks::TaskFactory {
    let engine = engine.clone();
    Arc::new(move |ctx| {
        let engine = engine.clone();
        let req = req.clone();
        Box::pin(async move { engine.edited_import(&ctx, req).await })
    })
}

/// Record where a rate-limited import stopped so the resumed run skips
/// enumeration and validation and retries the limited episode directly.
fn stash_pause(
    ctx: &TaskContext,
    anime_id: i32,
    source_id: i32,
    episodes: Vec<ProviderEpisodeInfo>,
    resume_index: i32,
    image_failed: bool,
    stats: ImportStats,
) {
    let state = PausedImportState {
        anime_id,
        source_id,
        episodes,
        resume_index,
        image_failed,
        stats,
    };
    match serde_json::to_value(&state) {
        Ok(value) => ctx.set_resume_state(value),
        Err(e) => warn!("Failed to stash resume state: {}", e),
    }
}

/// Safe-block is terminal (a retry can never succeed); an ordinary quota
/// hit cooperatively pauses the task.
pub(crate) fn pause_for(e: RateLimitExceeded) -> TaskOutcome {
    if e.safe_block {
        return TaskOutcome::Failed(e.message);
    }
    TaskOutcome::PauseForRateLimit {
        retry_after_seconds: e.retry_after_seconds,
        message: format!(
            "速率受限，将在 {} 秒后自动重试... ({})",
            e.retry_after_seconds, e.message
        ),
    }
}

/// The single terminal line summarizing an import run.
fn summarize(stats: &ImportStats, image_failed: bool) -> TaskOutcome {
    if stats.successful.is_empty() && stats.skipped.is_empty() && !stats.failed.is_empty() {
        let details: Vec<String> = stats
            .failed
            .iter()
            .map(|(idx, reason)| format!("第{idx}集: {reason}"))
            .collect();
        return TaskOutcome::Success(format!(
            "导入完成，但所有分集弹幕获取失败。失败详情: {}",
            details.join("; ")
        ));
    }

    let mut message = format!("导入完成，共新增 {} 条弹幕。", stats.comments_added);
    if !stats.successful.is_empty() {
        message.push_str(&format!(
            " 成功集: < {} >。",
            format_episode_ranges(&stats.successful)
        ));
    }
    if !stats.skipped.is_empty() {
        message.push_str(&format!(
            " 跳过集: < {} > (已有弹幕)。",
            format_episode_ranges(&stats.skipped)
        ));
    }
    if !stats.failed.is_empty() {
        let details: Vec<String> = stats
            .failed
            .iter()
            .map(|(idx, reason)| format!("第{idx}集: {reason}"))
            .collect();
        message.push_str(&format!(
            " 失败 {} 集 ({})。",
            stats.failed.len(),
            details.join("; ")
        ));
    }
    if image_failed {
        message.push_str(" (警告：海报图片下载失败)");
    }
    TaskOutcome::Success(message)
}
