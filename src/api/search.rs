//! Cross-provider search endpoints. Results are cached under a search id
//! so the follow-up `/episodes` and `/import/direct` calls reuse them
//! without another provider fan-out.

use axum::{
    Json,
    extract::{Query, State},
};
use std::sync::Arc;
use uuid::Uuid;

use super::{ApiError, ApiResponse, AppState};
use super::types::{EpisodesQuery, ProviderEpisodeDto, SearchQuery, SearchResponseDto, SearchResultDto};
use crate::constants::cache;
use crate::models::media::ProviderSearchInfo;
use crate::scrapers::LockHolder;
use crate::search::SearchPipelineError;
use crate::search::timer::search_types;

fn result_cache_key(search_id: &str) -> String {
    format!("search_result_{search_id}")
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<SearchResponseDto>>, ApiError> {
    let mut keyword = query.keyword.trim().to_string();
    if keyword.is_empty() {
        return Err(ApiError::validation("keyword must not be empty"));
    }
    if let Some(season) = query.season {
        keyword = match query.episode {
            Some(episode) => format!("{keyword} S{season:02}E{episode:02}"),
            None => format!("{keyword} S{season:02}"),
        };
    }

    let search_id = Uuid::new_v4().to_string();
    let outcome = state
        .shared
        .search_pipeline
        .search(
            &keyword,
            LockHolder::ApiToken(search_id.clone()),
            search_types::HOME,
        )
        .await
        .map_err(|e| match e {
            SearchPipelineError::Busy => ApiError::Busy(e.to_string()),
            SearchPipelineError::Other(e) => ApiError::from(e),
        })?;

    state
        .shared
        .store
        .cache_set(
            &result_cache_key(&search_id),
            &serde_json::to_string(&outcome.candidates).map_err(anyhow::Error::from)?,
            cache::SEARCH_TTL_SECONDS,
            None,
        )
        .await?;

    let results = outcome.candidates.iter().map(SearchResultDto::from).collect();
    Ok(Json(ApiResponse::success(SearchResponseDto {
        search_id,
        results,
    })))
}

pub(super) async fn load_cached_result(
    state: &Arc<AppState>,
    search_id: &str,
    result_index: usize,
) -> Result<ProviderSearchInfo, ApiError> {
    let cached = state
        .shared
        .store
        .cache_get(&result_cache_key(search_id))
        .await?
        .ok_or_else(|| ApiError::not_found("search", search_id))?;

    let candidates: Vec<ProviderSearchInfo> =
        serde_json::from_str(&cached).map_err(|e| ApiError::internal(e.to_string()))?;

    candidates
        .into_iter()
        .nth(result_index)
        .ok_or_else(|| ApiError::validation(format!("result_index {result_index} out of range")))
}

pub async fn episodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EpisodesQuery>,
) -> Result<Json<ApiResponse<Vec<ProviderEpisodeDto>>>, ApiError> {
    let candidate = load_cached_result(&state, &query.search_id, query.result_index).await?;

    let scraper = state.shared.scrapers.get(&candidate.provider)?;
    let episodes = scraper
        .get_episodes(&candidate.media_id, None, Some(candidate.media_type))
        .await?;

    let dtos = episodes
        .into_iter()
        .map(|e| ProviderEpisodeDto {
            episode_index: e.episode_index,
            title: e.title,
            episode_id: e.episode_id,
            url: e.url,
        })
        .collect();
    Ok(Json(ApiResponse::success(dtos)))
}
