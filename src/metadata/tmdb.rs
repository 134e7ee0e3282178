//! TMDB metadata adapter.
//!
//! Besides plain search/details it backs the reverse Chinese-title lookup
//! used by auto import: given a TMDB id (or an IMDB/TVDB id resolved via
//! `/find`), ask for the zh-CN translation of the work.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::MetadataSource;
use crate::config_store::ConfigStore;
use crate::constants::timeouts;
use crate::models::media::{MediaType, MetadataDetails, MetadataIds, MetadataSearchInfo};
use crate::tasks::util::is_chinese_title;

const TMDB_API: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: i64,
    #[serde(alias = "name", alias = "title")]
    display_title: Option<String>,
    #[serde(alias = "original_name", alias = "original_title")]
    original_title: Option<String>,
    #[serde(alias = "first_air_date", alias = "release_date")]
    date: Option<String>,
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    id: i64,
    #[serde(alias = "name", alias = "title")]
    display_title: Option<String>,
    #[serde(alias = "original_name", alias = "original_title")]
    original_title: Option<String>,
    #[serde(alias = "first_air_date", alias = "release_date")]
    date: Option<String>,
    poster_path: Option<String>,
    #[serde(default)]
    alternative_titles: AlternativeTitles,
    external_ids: Option<ExternalIds>,
}

#[derive(Debug, Default, Deserialize)]
struct AlternativeTitles {
    #[serde(default, alias = "titles", alias = "results")]
    entries: Vec<AltTitle>,
}

#[derive(Debug, Deserialize)]
struct AltTitle {
    iso_3166_1: Option<String>,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    imdb_id: Option<String>,
    tvdb_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    tv_results: Vec<SearchHit>,
    #[serde(default)]
    movie_results: Vec<SearchHit>,
}

pub struct TmdbClient {
    client: Client,
    config: ConfigStore,
}

impl TmdbClient {
    #[must_use]
    pub fn new(config: ConfigStore) -> Self {
        let client = Client::builder()
            .timeout(timeouts::PROVIDER_CALL)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    async fn api_key(&self) -> anyhow::Result<String> {
        let key = self.config.get("tmdbApiKey", "").await;
        if key.is_empty() {
            anyhow::bail!("TMDB API key is not configured");
        }
        Ok(key)
    }

    fn media_path(media_type: Option<MediaType>) -> &'static str {
        match media_type {
            Some(MediaType::Movie) => "movie",
            _ => "tv",
        }
    }

    fn year_from_date(date: Option<&str>) -> Option<i32> {
        date?.split('-').next()?.parse().ok()
    }

    /// zh-CN title for a known TMDB id, if the catalogue has one.
    pub async fn chinese_title(
        &self,
        tmdb_id: &str,
        media_type: Option<MediaType>,
    ) -> anyhow::Result<Option<String>> {
        let api_key = self.api_key().await?;
        let path = Self::media_path(media_type);
        let url = format!("{TMDB_API}/{path}/{tmdb_id}?api_key={api_key}&language=zh-CN");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let details: DetailsResponse = response.json().await?;
        let title = details.display_title.filter(|t| is_chinese_title(t));
        Ok(title)
    }

    /// Resolve an IMDB/TVDB id to a TMDB entry via `/find`.
    pub async fn find_by_external(
        &self,
        id_kind: &str,
        id_value: &str,
    ) -> anyhow::Result<Option<MetadataDetails>> {
        let source = match id_kind {
            "imdb" => "imdb_id",
            "tvdb" => "tvdb_id",
            _ => return Ok(None),
        };

        let api_key = self.api_key().await?;
        let url = format!(
            "{TMDB_API}/find/{}?api_key={api_key}&external_source={source}",
            urlencoding::encode(id_value)
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let found: FindResponse = response.json().await?;
        let (hit, media_type) = if let Some(hit) = found.tv_results.into_iter().next() {
            (hit, MediaType::TvSeries)
        } else if let Some(hit) = found.movie_results.into_iter().next() {
            (hit, MediaType::Movie)
        } else {
            return Ok(None);
        };

        self.get_details(&hit.id.to_string(), Some(media_type)).await
    }
}

#[async_trait]
impl MetadataSource for TmdbClient {
    fn source_name(&self) -> &'static str {
        "tmdb"
    }

    async fn search(
        &self,
        title: &str,
        media_type: Option<MediaType>,
    ) -> anyhow::Result<Vec<MetadataSearchInfo>> {
        let api_key = self.api_key().await?;
        let path = match media_type {
            Some(MediaType::TvSeries) => "search/tv",
            Some(MediaType::Movie) => "search/movie",
            None => "search/multi",
        };
        let url = format!(
            "{TMDB_API}/{path}?api_key={api_key}&language=zh-CN&query={}",
            urlencoding::encode(title)
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("TMDB API error: {status}");
        }

        let parsed: SearchResponse = response.json().await?;
        let results = parsed
            .results
            .into_iter()
            .filter_map(|hit| {
                let hit_type = match hit.media_type.as_deref() {
                    Some("tv") => Some(MediaType::TvSeries),
                    Some("movie") => Some(MediaType::Movie),
                    Some(_) => return None,
                    None => media_type,
                };
                let title = hit.display_title.clone().or(hit.original_title.clone())?;
                Some(MetadataSearchInfo {
                    source: "tmdb".to_string(),
                    id: hit.id.to_string(),
                    title,
                    media_type: hit_type,
                    year: Self::year_from_date(hit.date.as_deref()),
                    aliases: hit.original_title.into_iter().collect(),
                })
            })
            .collect();

        Ok(results)
    }

    async fn get_details(
        &self,
        id: &str,
        media_type: Option<MediaType>,
    ) -> anyhow::Result<Option<MetadataDetails>> {
        let api_key = self.api_key().await?;
        let path = Self::media_path(media_type);
        let url = format!(
            "{TMDB_API}/{path}/{id}?api_key={api_key}&language=zh-CN&append_to_response=alternative_titles,external_ids"
        );

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("TMDB API error: {status}");
        }

        let details: DetailsResponse = response.json().await?;

        let mut aliases_cn = Vec::new();
        let mut aliases = Vec::new();
        for alt in details.alternative_titles.entries {
            if matches!(alt.iso_3166_1.as_deref(), Some("CN" | "TW" | "HK"))
                && is_chinese_title(&alt.title)
            {
                aliases_cn.push(alt.title);
            } else {
                aliases.push(alt.title);
            }
        }

        let title = details
            .display_title
            .or_else(|| details.original_title.clone())
            .unwrap_or_default();
        if title.is_empty() {
            debug!("TMDB details for {} had no usable title", id);
            return Ok(None);
        }

        let ids = MetadataIds {
            tmdb_id: Some(details.id.to_string()),
            imdb_id: details.external_ids.as_ref().and_then(|e| e.imdb_id.clone()),
            tvdb_id: details
                .external_ids
                .as_ref()
                .and_then(|e| e.tvdb_id.map(|v| v.to_string())),
            ..MetadataIds::default()
        };

        Ok(Some(MetadataDetails {
            id: details.id.to_string(),
            title,
            media_type: media_type.or(Some(MediaType::TvSeries)),
            year: Self::year_from_date(details.date.as_deref()),
            season: None,
            name_en: None,
            name_jp: None,
            name_romaji: details.original_title,
            aliases_cn,
            aliases,
            image_url: details
                .poster_path
                .map(|p| format!("{IMAGE_BASE}{p}")),
            ids,
        }))
    }

    async fn find_by_external_id(
        &self,
        id_kind: &str,
        id_value: &str,
    ) -> anyhow::Result<Option<MetadataDetails>> {
        self.find_by_external(id_kind, id_value).await
    }
}
