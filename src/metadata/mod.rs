//! Metadata source adapters (external catalogues).
//!
//! These never produce danmaku; they supply aliases, details and id
//! reverse-lookups that sharpen provider matching.

pub mod tmdb;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config_store::ConfigStore;
use crate::models::media::{MediaType, MetadataDetails, MetadataSearchInfo};

#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn search(
        &self,
        title: &str,
        media_type: Option<MediaType>,
    ) -> anyhow::Result<Vec<MetadataSearchInfo>>;

    async fn get_details(
        &self,
        id: &str,
        media_type: Option<MediaType>,
    ) -> anyhow::Result<Option<MetadataDetails>>;

    /// Map an id from another catalogue (imdb/tvdb) onto this source.
    async fn find_by_external_id(
        &self,
        _id_kind: &str,
        _id_value: &str,
    ) -> anyhow::Result<Option<MetadataDetails>> {
        Ok(None)
    }
}

pub struct MetadataRegistry {
    sources: HashMap<&'static str, Arc<dyn MetadataSource>>,
    config: ConfigStore,
}

impl MetadataRegistry {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn MetadataSource>>, config: ConfigStore) -> Self {
        let sources = sources.into_iter().map(|s| (s.source_name(), s)).collect();
        Self { sources, config }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MetadataSource>> {
        self.sources.get(name).cloned()
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.sources.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Sources the operator enabled (`metadataSourcesEnabled` JSON list),
    /// restricted to ones actually registered.
    pub async fn enabled_sources(&self) -> Vec<Arc<dyn MetadataSource>> {
        let raw = self
            .config
            .get("metadataSourcesEnabled", r#"["tmdb","bangumi"]"#)
            .await;
        let enabled: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();

        enabled
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.enabled_sources()
            .await
            .iter()
            .any(|s| s.source_name() == name)
    }

    /// Fan a search out across every enabled source; failures degrade to
    /// empty results per source.
    pub async fn search_all(
        &self,
        title: &str,
        media_type: Option<MediaType>,
    ) -> Vec<MetadataSearchInfo> {
        let sources = self.enabled_sources().await;
        let futures = sources.iter().map(|source| {
            let source = source.clone();
            let title = title.to_string();
            async move {
                match source.search(&title, media_type).await {
                    Ok(results) => results,
                    Err(e) => {
                        debug!("Metadata search via {} failed: {}", source.source_name(), e);
                        Vec::new()
                    }
                }
            }
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    /// Fetch details, trying TV first and falling back to Movie when the
    /// media type is unknown.
    pub async fn details_with_type_probe(
        &self,
        source_name: &str,
        id: &str,
        media_type: Option<MediaType>,
    ) -> anyhow::Result<Option<MetadataDetails>> {
        let Some(source) = self.get(source_name) else {
            anyhow::bail!("unknown metadata source '{source_name}'");
        };

        if media_type.is_some() {
            return source.get_details(id, media_type).await;
        }

        if let Some(details) = source.get_details(id, Some(MediaType::TvSeries)).await? {
            return Ok(Some(details));
        }
        source.get_details(id, Some(MediaType::Movie)).await
    }
}
