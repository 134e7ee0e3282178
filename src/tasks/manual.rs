//! Manual ingestion into an existing source: a single episode from a
//! provider URL, or a raw XML/text payload handled by the "custom"
//! provider semantics.

use std::sync::Arc;
use tracing::info;

use super::{TaskContext, TaskOutcome};
use crate::danmaku::{DanmakuStore, xml};
use crate::db::Store;
use crate::rate_limiter::RateLimiter;
use crate::scrapers::ScraperRegistry;

pub struct ManualImporter {
    store: Store,
    scrapers: Arc<ScraperRegistry>,
    rate_limiter: Arc<RateLimiter>,
    danmaku: DanmakuStore,
}

impl ManualImporter {
    #[must_use]
    pub fn new(
        store: Store,
        scrapers: Arc<ScraperRegistry>,
        rate_limiter: Arc<RateLimiter>,
        danmaku: DanmakuStore,
    ) -> Self {
        Self {
            store,
            scrapers,
            rate_limiter,
            danmaku,
        }
    }

    /// Fetch one episode's comments through the source's own provider,
    /// resolving the episode id from the given URL.
    pub async fn url_import(
        &self,
        ctx: &TaskContext,
        source_id: i32,
        episode_index: i32,
        url: &str,
    ) -> anyhow::Result<TaskOutcome> {
        let Some(source) = self.store.get_source(source_id).await? else {
            return Ok(TaskOutcome::Failed(format!("源 {source_id} 不存在")));
        };

        let scraper = self.scrapers.get(&source.provider_name)?;
        ctx.progress(10, "正在解析播放链接...").await?;

        let Some(episode_id) = scraper.get_id_from_url(url).await? else {
            return Ok(TaskOutcome::Failed(format!(
                "无法从链接解析分集 ID: {url}"
            )));
        };

        if let Err(e) = self.rate_limiter.check(&source.provider_name).await {
            return Ok(super::import::pause_for(e));
        }

        ctx.progress(30, "正在下载弹幕...").await?;
        let comments = scraper.get_comments(&episode_id, None).await?;
        if comments.is_some() {
            self.rate_limiter.increment(&source.provider_name).await?;
        }

        let Some(comments) = comments.filter(|c| !c.is_empty()) else {
            return Ok(TaskOutcome::Failed("未获取到任何弹幕。".to_string()));
        };

        ctx.progress(80, "正在写入数据库...").await?;
        let added = self
            .commit(source_id, episode_index, Some(url), &episode_id, &comments)
            .await?;

        Ok(TaskOutcome::Success(format!(
            "手动导入完成，第 {episode_index} 集新增 {added} 条弹幕。"
        )))
    }

    /// Ingest a raw XML or plain-text payload without any network traffic.
    pub async fn xml_import(
        &self,
        ctx: &TaskContext,
        source_id: i32,
        episode_index: i32,
        content: &str,
    ) -> anyhow::Result<TaskOutcome> {
        if self.store.get_source(source_id).await?.is_none() {
            return Ok(TaskOutcome::Failed(format!("源 {source_id} 不存在")));
        }

        ctx.progress(20, "正在解析弹幕内容...").await?;
        let payload = content.trim_start_matches('\u{feff}').trim();
        let comments = if payload.starts_with('<') {
            xml::parse_xml(payload)?
        } else {
            xml::parse_text(payload)
        };

        if comments.is_empty() {
            return Ok(TaskOutcome::Failed(
                "内容中没有可识别的弹幕。".to_string(),
            ));
        }

        ctx.progress(80, "正在写入数据库...").await?;
        let added = self
            .commit(source_id, episode_index, None, "custom", &comments)
            .await?;

        Ok(TaskOutcome::Success(format!(
            "手动导入完成，第 {episode_index} 集新增 {added} 条弹幕。"
        )))
    }

    async fn commit(
        &self,
        source_id: i32,
        episode_index: i32,
        url: Option<&str>,
        provider_episode_id: &str,
        comments: &[crate::models::danmaku::Comment],
    ) -> anyhow::Result<i32> {
        let episode_id = self
            .store
            .get_or_create_episode(
                source_id,
                episode_index,
                &format!("第 {episode_index} 集"),
                url,
                provider_episode_id,
            )
            .await?;

        let (path, count) = self.danmaku.write(episode_id, comments).await?;
        self.store
            .set_episode_danmaku(episode_id, &path, count)
            .await?;

        info!(
            "Manual import wrote {} comments to source {} episode {}",
            count, source_id, episode_index
        );
        Ok(count)
    }
}
