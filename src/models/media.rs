use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    TvSeries,
    Movie,
}

impl MediaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TvSeries => "tv_series",
            Self::Movie => "movie",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tv_series" => Some(Self::TvSeries),
            "movie" => Some(Self::Movie),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate returned by a provider search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSearchInfo {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    /// Episode the *current request* is after; re-annotated on cache hits
    /// and stripped before the list is cached.
    pub current_episode_index: Option<i32>,
}

/// One episode descriptor returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEpisodeInfo {
    pub provider: String,
    pub episode_id: String,
    pub title: String,
    pub episode_index: i32,
    pub url: Option<String>,
}

/// External catalogue ids travelling with an import request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataIds {
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub douban_id: Option<String>,
    pub bangumi_id: Option<String>,
}

impl MetadataIds {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tmdb_id.is_none()
            && self.imdb_id.is_none()
            && self.tvdb_id.is_none()
            && self.douban_id.is_none()
            && self.bangumi_id.is_none()
    }
}

/// A search hit from a metadata source (TMDB, TVDB, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSearchInfo {
    pub source: String,
    pub id: String,
    pub title: String,
    pub media_type: Option<MediaType>,
    pub year: Option<i32>,
    pub aliases: Vec<String>,
}

/// Details for one metadata entry, including alias bundles used for
/// enrichment and name conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDetails {
    pub id: String,
    pub title: String,
    pub media_type: Option<MediaType>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub name_en: Option<String>,
    pub name_jp: Option<String>,
    pub name_romaji: Option<String>,
    pub aliases_cn: Vec<String>,
    pub aliases: Vec<String>,
    pub image_url: Option<String>,
    pub ids: MetadataIds,
}
