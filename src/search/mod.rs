//! The search & match pipeline.
//!
//! One entry point, [`SearchPipeline::search`], runs the ordered stages:
//! keyword parsing, recognition rewrite, optional name conversion, cache
//! lookup, alias enrichment, the parallel provider fan-out, filtering,
//! ranking, optional AI correction, and the cache store. The process-wide
//! search lock is held for the whole run and released on every exit path.

pub mod keyword;
pub mod name_converter;
pub mod timer;

use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::ai::AiMatcherManager;
use crate::config_store::ConfigStore;
use crate::constants::{cache, matching};
use crate::db::Store;
use crate::matching::{partial_ratio, token_set_ratio};
use crate::metadata::MetadataRegistry;
use crate::models::media::{MediaType, ProviderSearchInfo};
use crate::recognition::TitleRecognizer;
use crate::scrapers::{EpisodeSearchHint, LockHolder, ScraperRegistry, SearchLockGuard};
use crate::tasks::util::is_movie_by_title;
use self::keyword::parse_search_keyword;
use self::timer::SearchTimer;

#[derive(Debug, thiserror::Error)]
pub enum SearchPipelineError {
    #[error("另一个搜索正在进行中，请稍后重试")]
    Busy,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub title: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub candidates: Vec<ProviderSearchInfo>,
    pub from_cache: bool,
}

pub struct SearchPipeline {
    store: Store,
    config: ConfigStore,
    scrapers: Arc<ScraperRegistry>,
    metadata: Arc<MetadataRegistry>,
    recognizer: Arc<TitleRecognizer>,
    ai: Arc<AiMatcherManager>,
}

impl SearchPipeline {
    #[must_use]
    pub fn new(
        store: Store,
        config: ConfigStore,
        scrapers: Arc<ScraperRegistry>,
        metadata: Arc<MetadataRegistry>,
        recognizer: Arc<TitleRecognizer>,
        ai: Arc<AiMatcherManager>,
    ) -> Self {
        Self {
            store,
            config,
            scrapers,
            metadata,
            recognizer,
            ai,
        }
    }

    pub async fn search(
        &self,
        raw_keyword: &str,
        holder: LockHolder,
        search_type: &'static str,
    ) -> Result<SearchOutcome, SearchPipelineError> {
        let _lock = SearchLockGuard::try_acquire(self.scrapers.clone(), holder)
            .ok_or(SearchPipelineError::Busy)?;

        let mut timer = SearchTimer::start(search_type, raw_keyword);
        let result = self.run_stages(raw_keyword, &mut timer).await;
        timer.finish();
        result.map_err(SearchPipelineError::Other)
    }

    async fn run_stages(
        &self,
        raw_keyword: &str,
        timer: &mut SearchTimer,
    ) -> anyhow::Result<SearchOutcome> {
        timer.step_start("parse_keyword");
        let parsed = parse_search_keyword(raw_keyword);

        timer.step_start("recognition_rewrite");
        let rewritten = self
            .recognizer
            .pre_search(&parsed.title, parsed.season, parsed.episode);
        let episode = rewritten.episode;
        let season = rewritten.season;

        timer.step_start("name_conversion");
        let title = if needs_conversion(&rewritten.title) {
            let (converted, _) = name_converter::convert_to_chinese_title(
                &rewritten.title,
                &self.config,
                &self.metadata,
                &self.ai,
            )
            .await;
            converted
        } else {
            rewritten.title.clone()
        };

        timer.step_start("cache_lookup");
        let cache_key = search_cache_key(&title, season);
        if let Some(cached) = self.store.cache_get(&cache_key).await? {
            if let Ok(mut candidates) = serde_json::from_str::<Vec<ProviderSearchInfo>>(&cached) {
                // Stored lists never keep an episode index; re-annotate with
                // the current request's.
                for candidate in &mut candidates {
                    candidate.current_episode_index = episode;
                }
                info!(
                    "Search cache hit for '{}' ({} candidates)",
                    title,
                    candidates.len()
                );
                return Ok(SearchOutcome {
                    title,
                    season,
                    episode,
                    candidates,
                    from_cache: true,
                });
            }
        }

        timer.step_start("alias_enrichment");
        let aliases = self.gather_aliases(&title).await;

        timer.step_start("provider_search");
        let mut titles = vec![title.clone()];
        titles.extend(aliases.iter().cloned());
        let mut candidates = self
            .fan_out(&titles, EpisodeSearchHint { season, episode })
            .await?;

        timer.step_start("filter_and_rank");
        candidates.retain(|c| !self.recognizer.is_blocked(&c.title));

        // Type correction: series whose title carries a movie keyword.
        for candidate in &mut candidates {
            if candidate.media_type == MediaType::TvSeries && is_movie_by_title(&candidate.title) {
                candidate.media_type = MediaType::Movie;
                candidate.season = 1;
            }
        }

        if let Some(wanted_season) = season {
            candidates.retain(|c| c.media_type == MediaType::TvSeries);
            candidates.retain(|c| c.season == wanted_season);
        }

        if !aliases.is_empty() {
            let mut accepted: Vec<&str> = vec![title.as_str()];
            accepted.extend(aliases.iter().map(String::as_str));
            candidates.retain(|c| {
                accepted
                    .iter()
                    .any(|alias| partial_ratio(&c.title, alias) >= matching::ALIAS_FILTER_SCORE)
            });
        }

        let orders = self.store.scraper_display_orders().await?;
        candidates.sort_by(|a, b| {
            let order_a = orders.get(&a.provider).copied().unwrap_or(999);
            let order_b = orders.get(&b.provider).copied().unwrap_or(999);
            order_a.cmp(&order_b).then_with(|| {
                token_set_ratio(&title, &b.title).cmp(&token_set_ratio(&title, &a.title))
            })
        });

        timer.step_start("ai_correction");
        if self.ai.is_enabled().await {
            self.ai_correct(&title, season, &mut candidates).await;
        }

        timer.step_start("cache_store");
        let mut to_cache = candidates.clone();
        for candidate in &mut to_cache {
            candidate.current_episode_index = None;
        }
        self.store
            .cache_set(
                &cache_key,
                &serde_json::to_string(&to_cache)?,
                cache::SEARCH_TTL_SECONDS,
                None,
            )
            .await?;
        if !aliases.is_empty() {
            self.store
                .cache_set(
                    &alias_cache_key(&title),
                    &serde_json::to_string(&aliases)?,
                    cache::ALIAS_TTL_SECONDS,
                    None,
                )
                .await?;
        }

        for candidate in &mut candidates {
            candidate.current_episode_index = episode;
        }

        Ok(SearchOutcome {
            title,
            season,
            episode,
            candidates,
            from_cache: false,
        })
    }

    /// Concurrently search enabled metadata sources; keep aliases whose
    /// similarity to the query clears the validation threshold.
    async fn gather_aliases(&self, title: &str) -> Vec<String> {
        if let Ok(Some(cached)) = self.store.cache_get(&alias_cache_key(title)).await {
            if let Ok(aliases) = serde_json::from_str::<Vec<String>>(&cached) {
                return aliases;
            }
        }

        let hits = self.metadata.search_all(title, None).await;
        let mut aliases: Vec<String> = Vec::new();
        for hit in hits {
            for alias in std::iter::once(hit.title).chain(hit.aliases) {
                if alias.is_empty() || alias == title {
                    continue;
                }
                if token_set_ratio(title, &alias) > matching::ALIAS_VALIDATION_SCORE
                    && !aliases.contains(&alias)
                {
                    aliases.push(alias);
                }
            }
        }
        debug!("Validated {} aliases for '{}'", aliases.len(), title);
        aliases
    }

    /// Fan out across every enabled scraper, recording per-provider timing.
    async fn fan_out(
        &self,
        titles: &[String],
        hint: EpisodeSearchHint,
    ) -> anyhow::Result<Vec<ProviderSearchInfo>> {
        let enabled = self.store.enabled_scrapers().await?;

        let futures = enabled.iter().filter_map(|name| {
            let scraper = self.scrapers.get(name).ok()?;
            let registry = self.scrapers.clone();
            let titles = titles.to_vec();
            Some(async move {
                let provider = scraper.provider_name();
                let start = Instant::now();
                let result = scraper.search(&titles, hint).await;
                registry.record_search_timing(provider, start.elapsed());

                match result {
                    Ok(items) => items,
                    Err(e) => {
                        warn!("Provider '{}' search failed: {}", provider, e);
                        Vec::new()
                    }
                }
            })
        });

        Ok(join_all(futures).await.into_iter().flatten().collect())
    }

    /// One unified AI pass that may retype or re-season individual
    /// candidates. Any parse or transport failure leaves the list as-is.
    async fn ai_correct(
        &self,
        title: &str,
        season: Option<i32>,
        candidates: &mut [ProviderSearchInfo],
    ) {
        if candidates.is_empty() {
            return;
        }

        let mut prompt = String::from(
            "以下是针对一个作品的搜索候选。请检查每个候选的媒体类型与季度是否标注正确，\
             对需要修正的候选返回 JSON 数组 [{\"index\":N,\"media_type\":\"tv_series|movie\",\"season\":N}]，\
             无需修正时返回 []。只返回 JSON。\n",
        );
        prompt.push_str(&format!(
            "作品: '{title}' 请求季度={}\n候选:\n",
            season.map_or_else(|| "?".to_string(), |s| s.to_string())
        ));
        for (i, c) in candidates.iter().enumerate() {
            prompt.push_str(&format!(
                "{i}. '{}' 类型={} 季={}\n",
                c.title, c.media_type, c.season
            ));
        }

        let Some(answer) = self.ai.query(&prompt).await else {
            return;
        };

        #[derive(Deserialize)]
        struct Correction {
            index: usize,
            media_type: Option<String>,
            season: Option<i32>,
        }

        let Some(json) = extract_json_array(&answer) else {
            debug!("AI correction response had no JSON array");
            return;
        };
        let Ok(corrections) = serde_json::from_str::<Vec<Correction>>(json) else {
            debug!("AI correction response failed to parse");
            return;
        };

        for correction in corrections {
            let Some(candidate) = candidates.get_mut(correction.index) else {
                continue;
            };
            if let Some(mt) = correction.media_type.as_deref().and_then(MediaType::parse) {
                candidate.media_type = mt;
            }
            if let Some(s) = correction.season.filter(|&s| s >= 1) {
                candidate.season = s;
            }
        }
    }
}

/// Name conversion only fires for titles with neither Han characters nor
/// kana; CJK queries already match provider catalogues directly.
fn needs_conversion(title: &str) -> bool {
    !title.chars().any(|c| {
        let cp = c as u32;
        (0x3040..=0x30FF).contains(&cp)
            || (0x4E00..=0x9FFF).contains(&cp)
            || (0x3400..=0x4DBF).contains(&cp)
            || (0xF900..=0xFAFF).contains(&cp)
    })
}

fn search_cache_key(title: &str, season: Option<i32>) -> String {
    let season_part = season.map_or_else(|| "all".to_string(), |s| s.to_string());
    format!(
        "provider_search_{}_{}",
        title.trim().to_lowercase(),
        season_part
    )
}

fn alias_cache_key(title: &str) -> String {
    format!("search_aliases_{}", title.trim().to_lowercase())
}

fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end >= start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_gate_skips_cjk_titles() {
        assert!(!needs_conversion("鬼灭之刃"));
        assert!(!needs_conversion("ソードアート"));
        assert!(needs_conversion("Attack on Titan"));
    }

    #[test]
    fn cache_keys_are_normalized() {
        assert_eq!(
            search_cache_key("  Frieren ", Some(2)),
            "provider_search_frieren_2"
        );
        assert_eq!(search_cache_key("Frieren", None), "provider_search_frieren_all");
    }

    #[test]
    fn json_array_extraction_tolerates_prose() {
        assert_eq!(
            extract_json_array("好的，结果如下: [{\"index\":0}] 完"),
            Some("[{\"index\":0}]")
        );
        assert_eq!(extract_json_array("no json here"), None);
    }
}
