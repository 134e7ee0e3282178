//! Task control endpoints: listing, abort (cooperative or forced),
//! pause/resume, deletion, and the scheduler→execution bridge poll.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::types::{ExecutionDto, TaskDto};
use super::{ApiError, ApiResponse, AppState};

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Deserialize)]
pub struct AbortQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<ApiResponse<Vec<TaskDto>>>, ApiError> {
    let tasks = state
        .shared
        .store
        .search_tasks(query.status.as_deref(), query.limit.unwrap_or(100))
        .await?;
    Ok(Json(ApiResponse::success(
        tasks.into_iter().map(TaskDto::from).collect(),
    )))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TaskDto>>, ApiError> {
    let task = state
        .shared
        .store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("task", &id))?;
    Ok(Json(ApiResponse::success(TaskDto::from(task))))
}

pub async fn abort_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<AbortQuery>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    // A still-pending task is simply dequeued.
    if state.shared.task_manager.cancel_pending(&id).await? {
        return Ok(Json(ApiResponse::success("任务已从队列中移除".to_string())));
    }

    if state.shared.task_manager.abort(&id, query.force).await? {
        Ok(Json(ApiResponse::success("中止信号已发送".to_string())))
    } else {
        Err(ApiError::not_found("active task", &id))
    }
}

pub async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    if state.shared.task_manager.pause(&id) {
        Ok(Json(ApiResponse::success("任务将在下次进度更新时暂停".to_string())))
    } else {
        Err(ApiError::not_found("active task", &id))
    }
}

pub async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    if state.shared.task_manager.resume(&id) {
        Ok(Json(ApiResponse::success("任务已恢复".to_string())))
    } else {
        Err(ApiError::not_found("active task", &id))
    }
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    if state.shared.task_manager.is_active(&id) {
        return Err(ApiError::Conflict("任务仍在执行中，请先中止".to_string()));
    }
    if state.shared.store.delete_task(&id).await? {
        Ok(Json(ApiResponse::success("任务记录已删除".to_string())))
    } else {
        Err(ApiError::not_found("task", &id))
    }
}

/// Poll the scheduler→execution bridge: which manager task (if any) the
/// given scheduler job spawned most recently.
pub async fn execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ExecutionDto>>, ApiError> {
    state
        .shared
        .store
        .get_scheduler_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("scheduler task", &id))?;

    let execution = state.shared.store.find_task_by_scheduler_task(&id).await?;
    let (execution_task_id, status) = execution
        .map(|t| (Some(t.id), Some(t.status)))
        .unwrap_or((None, None));

    Ok(Json(ApiResponse::success(ExecutionDto {
        scheduler_task_id: id,
        execution_task_id,
        status,
    })))
}
