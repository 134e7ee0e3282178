use serde::{Deserialize, Serialize};

use super::media::{MediaType, MetadataIds};

/// The normalized job envelope every media-server payload collapses into.
/// Downstream dispatch never branches on the webhook source again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJob {
    pub media_type: MediaType,
    pub title: String,
    pub season: i32,
    /// `None` means a full-season import.
    pub episode_index: Option<i32>,
    pub year: Option<i32>,
    #[serde(default)]
    pub ids: MetadataIds,
}

impl WebhookJob {
    /// Search keyword in the operator grammar (`Title S02E03`).
    #[must_use]
    pub fn search_keyword(&self) -> String {
        match (self.media_type, self.episode_index) {
            (MediaType::TvSeries, Some(ep)) => {
                format!("{} S{:02}E{:02}", self.title, self.season, ep)
            }
            (MediaType::TvSeries, None) => format!("{} S{:02}", self.title, self.season),
            (MediaType::Movie, _) => self.title.clone(),
        }
    }

    /// Deduplication token for the search-and-dispatch task. Episode jobs
    /// end in `_{episode}` so multi-episode fan-outs stay distinct.
    #[must_use]
    pub fn unique_key(&self) -> String {
        match self.episode_index {
            Some(ep) => format!("webhook-search-{}-S{}_{}", self.title, self.season, ep),
            None => format!("webhook-search-{}-S{}-FULL", self.title, self.season),
        }
    }
}
