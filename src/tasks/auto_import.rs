//! Auto import: the outer policy wrapping the search pipeline.
//!
//! Resolves metadata-id search terms to a canonical (preferably Chinese)
//! title, checks the library before touching any provider, and otherwise
//! ranks pipeline candidates deterministically with an optional AI
//! override and fallback verification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::import::{GenericImportRequest, ImportEngine};
use super::util::{format_episode_ranges, parse_episode_ranges};
use super::{TaskContext, TaskOutcome};
use crate::ai::{AiMatcherManager, MatchQuery};
use crate::config_store::ConfigStore;
use crate::db::Store;
use crate::matching::token_set_ratio;
use crate::metadata::{MetadataRegistry, tmdb::TmdbClient};
use crate::models::media::{MediaType, MetadataIds, ProviderSearchInfo};
use crate::rate_limiter::RateLimiter;
use crate::recognition::TitleRecognizer;
use crate::scrapers::{LockHolder, ScraperRegistry};
use crate::search::{SearchPipeline, SearchPipelineError, timer::search_types};
use crate::tasks::util::is_chinese_title;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoImportRequest {
    /// `keyword` or a metadata id kind (`tmdb`, `tvdb`, `douban`, `imdb`,
    /// `bangumi`).
    pub search_type: String,
    pub search_term: String,
    pub season: Option<i32>,
    /// Single index or a range string (`"1-3,5"`).
    pub episode: Option<String>,
    pub media_type: Option<MediaType>,
}

pub struct AutoImporter {
    store: Store,
    config: ConfigStore,
    engine: ImportEngine,
    pipeline: Arc<SearchPipeline>,
    scrapers: Arc<ScraperRegistry>,
    metadata: Arc<MetadataRegistry>,
    ai: Arc<AiMatcherManager>,
    recognizer: Arc<TitleRecognizer>,
    rate_limiter: Arc<RateLimiter>,
    tmdb: Arc<TmdbClient>,
}

impl AutoImporter {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Store,
        config: ConfigStore,
        engine: ImportEngine,
        pipeline: Arc<SearchPipeline>,
        scrapers: Arc<ScraperRegistry>,
        metadata: Arc<MetadataRegistry>,
        ai: Arc<AiMatcherManager>,
        recognizer: Arc<TitleRecognizer>,
        rate_limiter: Arc<RateLimiter>,
        tmdb: Arc<TmdbClient>,
    ) -> Self {
        Self {
            store,
            config,
            engine,
            pipeline,
            scrapers,
            metadata,
            ai,
            recognizer,
            rate_limiter,
            tmdb,
        }
    }

    pub async fn run(
        &self,
        ctx: &TaskContext,
        req: AutoImportRequest,
    ) -> anyhow::Result<TaskOutcome> {
        ctx.progress(5, "正在解析导入请求...").await?;

        let episodes = req
            .episode
            .as_deref()
            .map(parse_episode_ranges)
            .filter(|eps| !eps.is_empty());

        // An all-digit keyword is treated as a TMDB id.
        let search_type = if req.search_type == "keyword"
            && req.search_term.chars().all(|c| c.is_ascii_digit())
            && !req.search_term.is_empty()
        {
            info!(
                "Keyword '{}' is numeric, treating it as a TMDB id",
                req.search_term
            );
            "tmdb".to_string()
        } else {
            req.search_type.clone()
        };

        let (title, year, metadata_ids) = if search_type == "keyword" {
            (req.search_term.clone(), None, MetadataIds::default())
        } else {
            self.resolve_metadata_term(ctx, &search_type, &req).await?
        };

        let season = req.season.unwrap_or(1);

        ctx.progress(15, "正在检查媒体库...").await?;
        if let Some(outcome) = self
            .try_library_import(ctx, &title, season, year, &metadata_ids, &search_type, &req, episodes.as_deref())
            .await?
        {
            return Ok(outcome);
        }

        ctx.progress(25, "媒体库中未找到，开始全网搜索...").await?;
        self.search_and_import(ctx, &req, &title, season, year, metadata_ids, episodes)
            .await
    }

    /// Resolve a metadata id to a canonical title + id bundle; attempts the
    /// TMDB reverse Chinese lookup for non-Chinese titles.
    async fn resolve_metadata_term(
        &self,
        ctx: &TaskContext,
        search_type: &str,
        req: &AutoImportRequest,
    ) -> anyhow::Result<(String, Option<i32>, MetadataIds)> {
        if !self.metadata.is_enabled(search_type).await {
            anyhow::bail!("元数据源 '{search_type}' 未启用");
        }

        ctx.progress(8, &format!("正在从 {search_type} 获取详情..."))
            .await?;

        let details = self
            .metadata
            .details_with_type_probe(search_type, &req.search_term, req.media_type)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("{search_type} 上未找到 ID 为 {} 的条目", req.search_term)
            })?;

        let mut ids = details.ids.clone();
        match search_type {
            "tmdb" => ids.tmdb_id = Some(req.search_term.clone()),
            "tvdb" => ids.tvdb_id = Some(req.search_term.clone()),
            "imdb" => ids.imdb_id = Some(req.search_term.clone()),
            "douban" => ids.douban_id = Some(req.search_term.clone()),
            "bangumi" => ids.bangumi_id = Some(req.search_term.clone()),
            _ => {}
        }

        let mut title = details.title.clone();
        if !is_chinese_title(&title) {
            if let Some(alias) = details.aliases_cn.first() {
                title = alias.clone();
            } else if self.config.get_bool("tmdbReverseLookupEnabled", true).await {
                if let Some(chinese) = self.reverse_lookup_chinese(&ids, req.media_type).await {
                    title = chinese;
                }
            }
        }

        Ok((title, details.year, ids))
    }

    async fn reverse_lookup_chinese(
        &self,
        ids: &MetadataIds,
        media_type: Option<MediaType>,
    ) -> Option<String> {
        if let Some(tmdb_id) = &ids.tmdb_id {
            if let Ok(Some(title)) = self.tmdb.chinese_title(tmdb_id, media_type).await {
                return Some(title);
            }
        }

        for (kind, value) in [("imdb", &ids.imdb_id), ("tvdb", &ids.tvdb_id)] {
            let Some(value) = value else { continue };
            if let Ok(Some(details)) = self.tmdb.find_by_external(kind, value).await {
                if is_chinese_title(&details.title) {
                    return Some(details.title);
                }
                if let Some(alias) = details.aliases_cn.first() {
                    return Some(alias.clone());
                }
            }
        }
        None
    }

    /// Library check: an existing work short-circuits a full-season import
    /// and narrows an episode request to the missing indices.
    #[allow(clippy::too_many_arguments)]
    async fn try_library_import(
        &self,
        ctx: &TaskContext,
        title: &str,
        season: i32,
        year: Option<i32>,
        metadata_ids: &MetadataIds,
        search_type: &str,
        req: &AutoImportRequest,
        episodes: Option<&[i32]>,
    ) -> anyhow::Result<Option<TaskOutcome>> {
        let by_id = if search_type == "keyword" {
            None
        } else {
            self.store
                .find_anime_by_metadata_id(search_type, &req.search_term, season)
                .await?
        };

        let existing = match by_id {
            Some(anime) => Some(anime),
            None => {
                let lookup_title = self.recognizer.storage_title(title);
                self.store
                    .find_anime_by_title_season_year(&lookup_title, season, year)
                    .await?
            }
        };

        let Some(anime) = existing else {
            return Ok(None);
        };

        let Some(requested) = episodes else {
            return Ok(Some(TaskOutcome::Success(
                "作品已在媒体库中，无需重复导入。".to_string(),
            )));
        };

        // Pick the source: favorited wins, else lowest display order.
        let sources = self.store.sources_for_anime(anime.id).await?;
        if sources.is_empty() {
            return Ok(None);
        }
        let source = match self.store.find_favorited_source(anime.id).await? {
            Some(favorited) => favorited,
            None => {
                let orders = self.store.scraper_display_orders().await?;
                sources
                    .into_iter()
                    .min_by_key(|s| orders.get(&s.provider_name).copied().unwrap_or(999))
                    .expect("sources is non-empty")
            }
        };

        let requested_canonical: Vec<i32> = requested
            .iter()
            .map(|&idx| self.recognizer.canonical_episode_index(&anime.title, idx))
            .collect();
        let present = self
            .store
            .present_episode_indices_for_source(source.id)
            .await?;
        let missing: Vec<i32> = requested_canonical
            .iter()
            .copied()
            .filter(|idx| !present.contains(idx))
            .collect();

        if missing.is_empty() {
            let range = format_episode_ranges(&requested_canonical);
            return Ok(Some(TaskOutcome::Success(format!(
                "导入完成，跳过集: < {range} > (已有弹幕)，未新增弹幕。"
            ))));
        }

        info!(
            "Work already in library (anime {}), importing missing episodes {:?} via source {}",
            anime.id, missing, source.provider_name
        );
        ctx.progress(
            20,
            &format!("作品已在库中，补充缺失分集: {}", format_episode_ranges(&missing)),
        )
        .await?;

        let import = GenericImportRequest {
            provider: source.provider_name.clone(),
            media_id: source.media_id.clone(),
            title: anime.title.clone(),
            media_type: MediaType::parse(&anime.media_type).unwrap_or(MediaType::TvSeries),
            season,
            year,
            image_url: anime.image_url.clone(),
            episode_index: (missing.len() == 1).then(|| missing[0]),
            selected_episodes: (missing.len() > 1).then(|| missing.clone()),
            metadata_ids: metadata_ids.clone(),
            fallback: None,
            preassigned_anime_id: None,
            incremental_refresh_source_id: None,
            smart_refresh: false,
        };

        self.engine.generic_import(ctx, import).await.map(Some)
    }

    /// Not in the library: run the pipeline and import the best candidate.
    #[allow(clippy::too_many_arguments)]
    async fn search_and_import(
        &self,
        ctx: &TaskContext,
        req: &AutoImportRequest,
        title: &str,
        season: i32,
        year: Option<i32>,
        metadata_ids: MetadataIds,
        episodes: Option<Vec<i32>>,
    ) -> anyhow::Result<TaskOutcome> {
        let keyword = match (&req.media_type, episodes.as_deref()) {
            (Some(MediaType::Movie), _) | (None, None) => title.to_string(),
            (_, Some([single])) => format!("{title} S{season:02}E{single:02}"),
            _ => format!("{title} S{season:02}"),
        };

        let outcome = self
            .pipeline
            .search(
                &keyword,
                LockHolder::Task(ctx.task_id.clone()),
                search_types::AUTO_IMPORT,
            )
            .await;

        let search = match outcome {
            Ok(search) => search,
            Err(SearchPipelineError::Busy) => {
                return Ok(TaskOutcome::Failed(
                    "搜索服务正忙，请稍后重试。".to_string(),
                ));
            }
            Err(SearchPipelineError::Other(e)) => return Err(e),
        };

        let mut candidates = search.candidates;
        if let Some(media_type) = req.media_type {
            candidates.retain(|c| c.media_type == media_type);
        }
        if candidates.is_empty() {
            return Ok(TaskOutcome::Failed(format!("未找到 '{title}' 的任何可用源。")));
        }

        let orders = self.store.scraper_display_orders().await?;
        rank_candidates(&mut candidates, title, year, &orders);

        ctx.progress(55, &format!("找到 {} 个候选，正在选择最佳匹配...", candidates.len()))
            .await?;

        let mut chosen_index = 0;
        if self.ai.is_enabled().await {
            let query = MatchQuery {
                title: title.to_string(),
                season: Some(season),
                episode: episodes.as_ref().and_then(|e| e.first().copied()),
                year,
                media_type: req.media_type.map(|m| m.as_str().to_string()),
            };
            if let Some(index) = self
                .ai
                .select_best_match(&query, &candidates, &HashMap::new())
                .await
            {
                chosen_index = index;
            }
        }

        if self
            .config
            .get_bool("fallbackVerificationEnabled", false)
            .await
        {
            chosen_index = self
                .verify_candidates(ctx, &candidates, chosen_index)
                .await
                .unwrap_or(chosen_index);
        }

        let chosen = candidates
            .get(chosen_index)
            .cloned()
            .unwrap_or_else(|| candidates[0].clone());

        info!(
            "Auto import selected '{}' from {} ({})",
            chosen.title, chosen.provider, chosen.media_id
        );

        let import = GenericImportRequest {
            provider: chosen.provider.clone(),
            media_id: chosen.media_id.clone(),
            title: chosen.title.clone(),
            media_type: chosen.media_type,
            season: if chosen.media_type == MediaType::Movie {
                1
            } else {
                season
            },
            year: year.or(chosen.year),
            image_url: chosen.image_url.clone(),
            episode_index: episodes.as_deref().and_then(|eps| match eps {
                [single] => Some(*single),
                _ => None,
            }),
            selected_episodes: episodes.filter(|eps| eps.len() > 1),
            metadata_ids,
            fallback: None,
            preassigned_anime_id: None,
            incremental_refresh_source_id: None,
            smart_refresh: false,
        };

        self.engine.generic_import(ctx, import).await
    }

    /// Probe episode 1 of the chosen candidate; advance to the next one
    /// when the probe yields no comments.
    async fn verify_candidates(
        &self,
        ctx: &TaskContext,
        candidates: &[ProviderSearchInfo],
        start: usize,
    ) -> Option<usize> {
        for (offset, candidate) in candidates.iter().enumerate().skip(start).take(3) {
            ctx.progress(
                60,
                &format!("正在验证候选源 {} ({})...", candidate.title, candidate.provider),
            )
            .await
            .ok()?;

            let Ok(scraper) = self.scrapers.get(&candidate.provider) else {
                continue;
            };
            if self.rate_limiter.check(&candidate.provider).await.is_err() {
                // Quota pressure: keep the current choice instead of
                // burning more of the window on probes.
                return Some(start);
            }

            let episodes = scraper
                .get_episodes(&candidate.media_id, Some(1), Some(candidate.media_type))
                .await
                .unwrap_or_default();
            let Some(first) = episodes.first() else {
                continue;
            };

            match scraper.get_comments(&first.episode_id, None).await {
                Ok(Some(comments)) if !comments.is_empty() => {
                    if let Err(e) = self.rate_limiter.increment(&candidate.provider).await {
                        warn!("Rate limit increment failed: {}", e);
                    }
                    return Some(offset);
                }
                Ok(Some(_) | None) => {
                    if let Err(e) = self.rate_limiter.increment(&candidate.provider).await {
                        warn!("Rate limit increment failed: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Fallback verification failed for {}: {}", candidate.provider, e);
                }
            }
        }
        None
    }
}

/// Deterministic ranking: year match dominates, exact title next, fuzzy
/// similarity underneath, a year mismatch penalized, provider display
/// order breaking ties.
fn rank_candidates(
    candidates: &mut [ProviderSearchInfo],
    title: &str,
    year: Option<i32>,
    orders: &std::collections::HashMap<String, i32>,
) {
    let score = |c: &ProviderSearchInfo| -> i64 {
        let mut score = i64::from(token_set_ratio(title, &c.title));
        if let (Some(wanted), Some(candidate_year)) = (year, c.year) {
            if wanted == candidate_year {
                score += 10_000;
            } else {
                score -= 1000;
            }
        }
        if c.title == title {
            score += 1000;
        }
        score
    };

    candidates.sort_by(|a, b| {
        score(b).cmp(&score(a)).then_with(|| {
            let order_a = orders.get(&a.provider).copied().unwrap_or(999);
            let order_b = orders.get(&b.provider).copied().unwrap_or(999);
            order_a.cmp(&order_b)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, year: Option<i32>, provider: &str) -> ProviderSearchInfo {
        ProviderSearchInfo {
            provider: provider.to_string(),
            media_id: "m1".to_string(),
            title: title.to_string(),
            media_type: MediaType::TvSeries,
            season: 1,
            year,
            image_url: None,
            current_episode_index: None,
        }
    }

    #[test]
    fn year_match_dominates_ranking() {
        let mut candidates = vec![
            candidate("鬼灭之刃 外传", Some(2021), "a"),
            candidate("鬼灭之刃", Some(2019), "b"),
        ];
        rank_candidates(&mut candidates, "鬼灭之刃", Some(2019), &Default::default());
        assert_eq!(candidates[0].provider, "b");
    }

    #[test]
    fn equal_scores_break_on_display_order() {
        let mut orders = HashMap::new();
        orders.insert("secondary".to_string(), 5);
        orders.insert("preferred".to_string(), 0);

        let mut candidates = vec![
            candidate("同名作品", None, "secondary"),
            candidate("同名作品", None, "preferred"),
        ];
        rank_candidates(&mut candidates, "同名作品", None, &orders);
        assert_eq!(candidates[0].provider, "preferred");
    }

    #[test]
    fn year_mismatch_is_penalized() {
        let mut candidates = vec![
            candidate("某作品", Some(2010), "a"),
            candidate("某作品 第二部", None, "b"),
        ];
        rank_candidates(&mut candidates, "某作品", Some(2020), &Default::default());
        assert_eq!(candidates[0].provider, "b");
    }
}
