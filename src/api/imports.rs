//! Import endpoints: auto, direct (from a cached search), edited, and the
//! manual URL/XML ingest paths. Each submits a task and answers `202` with
//! the task id; unique-key collisions answer `409`.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use std::sync::Arc;

use super::types::{
    AutoImportBody, DirectImportBody, EditedImportBody, TaskCreatedDto, UrlImportBody,
    XmlImportBody,
};
use super::{ApiError, ApiResponse, AppState};
use crate::models::media::{MetadataIds, ProviderEpisodeInfo};
use crate::tasks::auto_import::AutoImportRequest;
use crate::tasks::import::{
    EditedImportRequest, GenericImportRequest, edited_import_task, import_task,
};
use crate::tasks::TaskFactory;

const SEARCH_TYPES: [&str; 6] = ["keyword", "tmdb", "tvdb", "douban", "imdb", "bangumi"];

type Created = (StatusCode, Json<ApiResponse<TaskCreatedDto>>);

fn accepted(message: impl Into<String>, task_id: String) -> Created {
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(TaskCreatedDto {
            message: message.into(),
            task_id,
        })),
    )
}

pub async fn auto_import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AutoImportBody>,
) -> Result<Created, ApiError> {
    if !SEARCH_TYPES.contains(&body.search_type.as_str()) {
        return Err(ApiError::validation(format!(
            "unknown searchType '{}'",
            body.search_type
        )));
    }
    if body.search_term.trim().is_empty() {
        return Err(ApiError::validation("searchTerm must not be empty"));
    }

    // `episode` accepts an integer or a range string like "1-3,5".
    let episode = match body.episode {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(other) => {
            return Err(ApiError::validation(format!(
                "episode must be an integer or range string, got {other}"
            )));
        }
    };

    let request = AutoImportRequest {
        search_type: body.search_type.clone(),
        search_term: body.search_term.trim().to_string(),
        season: body.season,
        episode: episode.clone(),
        media_type: body.media_type,
    };

    let title = format!("自动导入: {}", request.search_term);
    let unique_key = format!(
        "auto-import-{}-{}-S{}-{}",
        request.search_type,
        request.search_term,
        request.season.unwrap_or(0),
        episode.as_deref().unwrap_or("all"),
    );
    let parameters = serde_json::to_string(&request).ok();

    let importer = state.shared.auto_importer.clone();
    let factory: TaskFactory = Arc::new(move |ctx| {
        let importer = importer.clone();
        let request = request.clone();
        Box::pin(async move { importer.run(&ctx, request).await })
    });

    let task_id = state
        .shared
        .task_manager
        .submit(
            factory,
            &title,
            Some(&unique_key),
            "auto_import",
            parameters.as_deref(),
            None,
        )
        .await?;

    Ok(accepted("自动导入任务已提交", task_id))
}

pub async fn direct_import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DirectImportBody>,
) -> Result<Created, ApiError> {
    let candidate =
        super::search::load_cached_result(&state, &body.search_id, body.result_index).await?;

    let metadata_ids = MetadataIds {
        tmdb_id: body.tmdb_id,
        imdb_id: body.imdb_id,
        tvdb_id: body.tvdb_id,
        douban_id: body.douban_id,
        bangumi_id: body.bangumi_id,
    };

    let request = GenericImportRequest {
        provider: candidate.provider.clone(),
        media_id: candidate.media_id.clone(),
        title: candidate.title.clone(),
        media_type: candidate.media_type,
        season: candidate.season,
        year: candidate.year,
        image_url: candidate.image_url.clone(),
        episode_index: candidate.current_episode_index,
        selected_episodes: None,
        metadata_ids,
        fallback: None,
        preassigned_anime_id: None,
        incremental_refresh_source_id: None,
        smart_refresh: false,
    };

    let title = format!("导入: {} ({})", candidate.title, candidate.provider);
    let episode_part = candidate
        .current_episode_index
        .map_or_else(|| "full".to_string(), |ep| format!("ep{ep}"));
    let unique_key = format!(
        "import-{}-{}-{}",
        candidate.provider, candidate.media_id, episode_part
    );
    let parameters = serde_json::to_string(&request).ok();

    let task_id = state
        .shared
        .task_manager
        .submit(
            import_task(&state.shared.import_engine, request),
            &title,
            Some(&unique_key),
            "generic_import",
            parameters.as_deref(),
            None,
        )
        .await?;

    Ok(accepted("导入任务已提交", task_id))
}

pub async fn edited_import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EditedImportBody>,
) -> Result<Created, ApiError> {
    if body.episodes.is_empty() {
        return Err(ApiError::validation("episodes must not be empty"));
    }

    let provider = body.provider.clone();
    let episodes: Vec<ProviderEpisodeInfo> = body
        .episodes
        .iter()
        .map(|e| ProviderEpisodeInfo {
            provider: provider.clone(),
            episode_id: e.episode_id.clone(),
            title: e.title.clone(),
            episode_index: e.episode_index,
            url: e.url.clone(),
        })
        .collect();

    let request = EditedImportRequest {
        provider: body.provider.clone(),
        media_id: body.media_id.clone(),
        title: body.title.clone(),
        media_type: body.media_type,
        season: body.season,
        year: body.year,
        image_url: body.image_url.clone(),
        metadata_ids: MetadataIds {
            tmdb_id: body.tmdb_id,
            imdb_id: body.imdb_id,
            tvdb_id: body.tvdb_id,
            douban_id: body.douban_id,
            bangumi_id: body.bangumi_id,
        },
        episodes,
    };

    let title = format!("编辑导入: {} ({})", body.title, body.provider);
    let unique_key = format!("edited-import-{}-{}", body.provider, body.media_id);
    let parameters = serde_json::to_string(&request).ok();

    let task_id = state
        .shared
        .task_manager
        .submit(
            edited_import_task(&state.shared.import_engine, request),
            &title,
            Some(&unique_key),
            "edited_import",
            parameters.as_deref(),
            None,
        )
        .await?;

    Ok(accepted("编辑导入任务已提交", task_id))
}

pub async fn url_import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UrlImportBody>,
) -> Result<Created, ApiError> {
    if body.episode_index < 1 {
        return Err(ApiError::validation("episode_index must be >= 1"));
    }

    let source = state
        .shared
        .store
        .get_source(body.source_id)
        .await?
        .ok_or_else(|| ApiError::not_found("source", body.source_id))?;

    let importer = state.shared.manual_importer.clone();
    let url = body.url.clone();
    let (source_id, episode_index) = (body.source_id, body.episode_index);
    let factory: TaskFactory = Arc::new(move |ctx| {
        let importer = importer.clone();
        let url = url.clone();
        Box::pin(async move { importer.url_import(&ctx, source_id, episode_index, &url).await })
    });

    let title = format!(
        "手动导入: 源 {} 第 {} 集 ({})",
        body.source_id, body.episode_index, source.provider_name
    );
    let unique_key = format!("manual-url-{}-ep{}", body.source_id, body.episode_index);

    let task_id = state
        .shared
        .task_manager
        .submit(factory, &title, Some(&unique_key), "manual_import", None, None)
        .await?;

    Ok(accepted("手动导入任务已提交", task_id))
}

pub async fn xml_import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<XmlImportBody>,
) -> Result<Created, ApiError> {
    if body.episode_index < 1 {
        return Err(ApiError::validation("episode_index must be >= 1"));
    }
    if body.content.trim().is_empty() {
        return Err(ApiError::validation("content must not be empty"));
    }

    let importer = state.shared.manual_importer.clone();
    let content = body.content.clone();
    let (source_id, episode_index) = (body.source_id, body.episode_index);
    let factory: TaskFactory = Arc::new(move |ctx| {
        let importer = importer.clone();
        let content = content.clone();
        Box::pin(async move {
            importer
                .xml_import(&ctx, source_id, episode_index, &content)
                .await
        })
    });

    let title = format!("XML导入: 源 {} 第 {} 集", body.source_id, body.episode_index);
    let unique_key = format!("manual-xml-{}-ep{}", body.source_id, body.episode_index);

    let task_id = state
        .shared
        .task_manager
        .submit(factory, &title, Some(&unique_key), "manual_import", None, None)
        .await?;

    Ok(accepted("XML导入任务已提交", task_id))
}
