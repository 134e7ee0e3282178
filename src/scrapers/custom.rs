//! The "custom" provider: accepts operator-supplied XML or plain-text
//! danmaku payloads directly instead of talking to a remote platform.
//! Manual XML ingestion routes here with the raw content as the episode id.

use async_trait::async_trait;

use super::{EpisodeSearchHint, ProgressSink, Scraper};
use crate::danmaku::xml;
use crate::models::danmaku::Comment;
use crate::models::media::{MediaType, ProviderEpisodeInfo, ProviderSearchInfo};

pub struct CustomScraper;

#[async_trait]
impl Scraper for CustomScraper {
    fn provider_name(&self) -> &'static str {
        "custom"
    }

    async fn search(
        &self,
        _titles: &[String],
        _hint: EpisodeSearchHint,
    ) -> anyhow::Result<Vec<ProviderSearchInfo>> {
        Ok(Vec::new())
    }

    async fn get_episodes(
        &self,
        _media_id: &str,
        _target_episode: Option<i32>,
        _db_media_type: Option<MediaType>,
    ) -> anyhow::Result<Vec<ProviderEpisodeInfo>> {
        Ok(Vec::new())
    }

    /// `episode_id` carries the raw payload. XML is detected by its leading
    /// `<`; anything else is treated as plain text lines.
    async fn get_comments(
        &self,
        episode_id: &str,
        _progress: Option<&ProgressSink>,
    ) -> anyhow::Result<Option<Vec<Comment>>> {
        let payload = episode_id.trim_start_matches('\u{feff}').trim();
        if payload.is_empty() {
            return Ok(None);
        }

        let comments = if payload.starts_with('<') {
            xml::parse_xml(payload)?
        } else {
            xml::parse_text(payload)
        };

        if comments.is_empty() {
            Ok(None)
        } else {
            Ok(Some(comments))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn xml_payload_is_parsed() {
        let scraper = CustomScraper;
        let xml = r#"<i><d p="5,1,25,16777215">content</d></i>"#;
        let comments = scraper.get_comments(xml, None).await.unwrap().unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "content");
    }

    #[tokio::test]
    async fn empty_payload_is_a_hard_failure() {
        let scraper = CustomScraper;
        assert!(scraper.get_comments("   ", None).await.unwrap().is_none());
        assert!(
            scraper
                .get_comments("<i></i>", None)
                .await
                .unwrap()
                .is_none()
        );
    }
}
