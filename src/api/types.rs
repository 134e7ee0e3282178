use serde::{Deserialize, Serialize};

use crate::models::media::{MediaType, ProviderSearchInfo};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreatedDto {
    pub message: String,
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoImportBody {
    pub search_type: String,
    pub search_term: String,
    pub season: Option<i32>,
    pub episode: Option<serde_json::Value>,
    pub media_type: Option<MediaType>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponseDto {
    pub search_id: String,
    pub results: Vec<SearchResultDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultDto {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub current_episode_index: Option<i32>,
}

impl From<&ProviderSearchInfo> for SearchResultDto {
    fn from(info: &ProviderSearchInfo) -> Self {
        Self {
            provider: info.provider.clone(),
            media_id: info.media_id.clone(),
            title: info.title.clone(),
            media_type: info.media_type,
            season: info.season,
            year: info.year,
            image_url: info.image_url.clone(),
            current_episode_index: info.current_episode_index,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodesQuery {
    pub search_id: String,
    pub result_index: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEpisodeDto {
    pub episode_index: i32,
    pub title: String,
    pub episode_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectImportBody {
    pub search_id: String,
    pub result_index: usize,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub douban_id: Option<String>,
    pub bangumi_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedImportBody {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub season: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub douban_id: Option<String>,
    pub bangumi_id: Option<String>,
    pub episodes: Vec<EditedEpisodeBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedEpisodeBody {
    pub episode_index: i32,
    pub title: String,
    pub episode_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlImportBody {
    pub source_id: i32,
    pub episode_index: i32,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlImportBody {
    pub source_id: i32,
    pub episode_index: i32,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub id: String,
    pub title: String,
    pub status: String,
    pub progress: i32,
    pub message: String,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub task_type: String,
}

impl From<crate::entities::task_history::Model> for TaskDto {
    fn from(model: crate::entities::task_history::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            status: model.status,
            progress: model.progress,
            message: model.message,
            created_at: model.created_at,
            finished_at: model.finished_at,
            task_type: model.task_type,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDto {
    pub scheduler_task_id: String,
    pub execution_task_id: Option<String>,
    pub status: Option<String>,
}
