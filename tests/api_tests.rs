//! Contract tests for the external control API and webhook endpoints.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use danmarr::config::Config;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

const API_KEY: &str = "test-api-key";

async fn spawn_app() -> (Arc<danmarr::api::AppState>, Router) {
    let run_id = uuid::Uuid::new_v4();
    let db_path = std::env::temp_dir().join(format!("danmarr-api-test-{run_id}.db"));
    let data_dir = std::env::temp_dir().join(format!("danmarr-api-test-{run_id}"));

    let mut config = Config::default();
    config.general.database_url = format!("sqlite:{}", db_path.display());
    config.general.data_dir = data_dir.display().to_string();
    config.scheduler.enabled = false;

    let state = danmarr::api::create_app_state_from_config(config, None)
        .await
        .expect("failed to create app state");

    state
        .shared
        .config_store
        .set("externalApiKey", API_KEY)
        .await
        .expect("failed to set api key");

    let router = danmarr::api::router(state.clone()).await;
    (state, router)
}

fn get(path: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(key) = key {
        builder = builder.header("X-Api-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(path: &str, key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-Api-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn auth_rejects_missing_and_wrong_keys() {
    let (_, app) = spawn_app().await;

    let response = app.clone().oneshot(get("/api/tasks", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(get("/api/tasks", Some("wrong-key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(get("/api/tasks", Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The query-parameter form works too.
    let response = app
        .clone()
        .oneshot(get(&format!("/api/tasks?api_key={API_KEY}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_failures_are_logged() {
    let (state, app) = spawn_app().await;

    let _ = app
        .clone()
        .oneshot(get("/api/tasks", Some("wrong-key")))
        .await
        .unwrap();

    use sea_orm::EntityTrait;
    let logs = danmarr::entities::prelude::ExternalApiLog::find()
        .all(&state.shared.store.conn)
        .await
        .unwrap();
    assert!(!logs.is_empty());
    assert_eq!(logs[0].status_code, 401);
}

#[tokio::test]
async fn auto_import_keyword_submits_task() {
    let (state, app) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/import/auto",
            Some(API_KEY),
            serde_json::json!({
                "searchType": "keyword",
                "searchTerm": "1429",
                "mediaType": "tv_series",
                "season": 1
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    let task_id = body["data"]["taskId"].as_str().unwrap().to_string();

    let task = state
        .shared
        .store
        .get_task(&task_id)
        .await
        .unwrap()
        .expect("task row exists");
    assert!(task.title.starts_with("自动导入:"), "title: {}", task.title);
}

#[tokio::test]
async fn auto_import_rejects_unknown_search_type() {
    let (_, app) = spawn_app().await;

    let response = app
        .oneshot(post_json(
            "/api/import/auto",
            Some(API_KEY),
            serde_json::json!({"searchType": "anilist", "searchTerm": "x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_emby_webhook_conflicts() {
    let (_, app) = spawn_app().await;

    let payload = serde_json::json!({
        "Event": "library.new",
        "Item": {
            "Type": "Episode",
            "SeriesName": "鬼灭之刃",
            "ParentIndexNumber": 1,
            "IndexNumber": 2,
            "ProviderIds": {"Tmdb": "85937"}
        }
    });

    let first = app
        .clone()
        .oneshot(post_json("/api/webhook/emby", Some(API_KEY), payload.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app
        .clone()
        .oneshot(post_json("/api/webhook/emby", Some(API_KEY), payload))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn tautulli_multi_episode_creates_one_job_per_episode() {
    let (state, app) = spawn_app().await;

    let response = app
        .oneshot(post_json(
            "/api/webhook/tautulli",
            Some(API_KEY),
            serde_json::json!({
                "event": "created",
                "media_type": "episode",
                "show_name": "某科学的超电磁炮",
                "season": 1,
                "episode": "1-3,5"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let tasks = state.shared.store.search_tasks(None, 100).await.unwrap();
    let mut suffixes: Vec<String> = tasks
        .iter()
        .filter(|t| t.task_type == "webhook_search")
        .map(|t| t.unique_key.clone())
        .collect();
    suffixes.sort();
    assert_eq!(suffixes.len(), 4);
    for expected in ["_1", "_2", "_3", "_5"] {
        assert!(
            suffixes.iter().any(|k| k.ends_with(expected)),
            "no unique key ends with {expected}: {suffixes:?}"
        );
    }
}

#[tokio::test]
async fn rate_limit_status_has_expected_shape() {
    let (_, app) = spawn_app().await;

    let response = app
        .oneshot(get("/api/rate-limit/status", Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let data = &body["data"];
    assert!(data["globalEnabled"].is_boolean());
    assert!(data["globalRequestCount"].is_number());
    assert!(data["fallbackTotalLimit"].is_number());
    assert!(data["providers"].is_array());
    // The built-in custom provider has no quota.
    let providers = data["providers"].as_array().unwrap();
    let custom = providers
        .iter()
        .find(|p| p["providerName"] == "custom")
        .expect("custom provider listed");
    assert_eq!(custom["quota"], "∞");
}

#[tokio::test]
async fn xml_import_writes_episode_end_to_end() {
    let (state, app) = spawn_app().await;

    // Seed an anime + source the manual import can target.
    let anime_id = state
        .shared
        .store
        .get_or_create_anime(
            "测试作品",
            danmarr::models::media::MediaType::TvSeries,
            1,
            Some(2024),
            None,
            None,
        )
        .await
        .unwrap();
    let source_id = state
        .shared
        .store
        .link_source(anime_id, "custom", "manual-1")
        .await
        .unwrap();

    let xml = r#"<i><d p="1.5,1,25,16777215">第一条</d><d p="3.2,1,25,16777215">第二条</d></i>"#;
    let response = app
        .oneshot(post_json(
            "/api/import/xml",
            Some(API_KEY),
            serde_json::json!({
                "sourceId": source_id,
                "episodeIndex": 1,
                "content": xml
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    let task_id = body["data"]["taskId"].as_str().unwrap().to_string();

    // The single worker runs it in the background; poll until terminal.
    let mut status = String::new();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if let Some(task) = state.shared.store.get_task(&task_id).await.unwrap() {
            status = task.status.clone();
            if matches!(status.as_str(), "completed" | "failed" | "cancelled") {
                break;
            }
        }
    }
    assert_eq!(status, "completed");

    let episode = state
        .shared
        .store
        .find_episode_by_index(source_id, 1)
        .await
        .unwrap()
        .expect("episode row created");
    assert_eq!(episode.comment_count, 2);
    assert!(episode.danmaku_file_path.is_some());
}

#[tokio::test]
async fn unknown_scheduler_task_execution_is_404() {
    let (_, app) = spawn_app().await;

    let response = app
        .oneshot(get("/api/tasks/nope/execution", Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
