//! Router-level tests against in-memory stores.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use storyvox_api::{create_router, ApiConfig, AppState};
use storyvox_engine::EngineConfig;
use storyvox_media::{EncodingSettings, FfmpegToolchain};
use storyvox_providers::{ProviderConfig, ProviderSet, VoiceBackend};
use storyvox_queue::AnalysisQueueConfig;
use storyvox_storage::LocalArtifactStore;
use storyvox_store::StoreSet;

const USER: &str = "user-1";

fn test_app(dir: &TempDir) -> (AppState, Router) {
    let providers = ProviderSet::from_config(&ProviderConfig {
        backend: VoiceBackend::Local,
        ..ProviderConfig::default()
    })
    .unwrap();
    let engine_config = EngineConfig {
        work_dir: dir.path().join("work"),
        ..EngineConfig::default()
    };
    let state = AppState::from_parts(
        ApiConfig::default(),
        StoreSet::memory(),
        providers,
        Arc::new(FfmpegToolchain::new(EncodingSettings::default())),
        Arc::new(LocalArtifactStore::new(dir.path().join("artifacts"))),
        engine_config,
        AnalysisQueueConfig::default(),
    );
    let router = create_router(state.clone(), None);
    (state, router)
}

fn post_json(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_ready_requires_running_queue() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .oneshot(post_json("/api/v1/stories", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "unauthorized");
}

#[tokio::test]
async fn test_create_and_fetch_story() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/stories",
            Some(USER),
            json!({ "title": "Bedtime", "video_url": "https://cdn.example.com/story.mp4" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let story = body_json(response).await;
    let story_id = story["id"].as_str().unwrap().to_string();
    assert_eq!(story["owner"], USER);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/stories/{}", story_id), USER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["title"], "Bedtime");

    // Other users cannot see it
    let response = app
        .oneshot(get(&format!("/api/v1/stories/{}", story_id), "user-2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .oneshot(get("/api/v1/jobs/does-not-exist", USER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "not_found");
}

#[tokio::test]
async fn test_job_for_story_without_video_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (state, app) = test_app(&dir);

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/stories", Some(USER), json!({ "title": "Draft" })))
        .await
        .unwrap();
    let story_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(post_json(
            "/api/v1/jobs",
            Some(USER),
            json!({ "story_id": story_id, "speakers": [{ "voice_id": "voice-a" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.orchestrator.registry().is_empty().await);
}

#[tokio::test]
async fn test_list_jobs_rejects_oversized_page() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .clone()
        .oneshot(get("/api/v1/jobs?page=1&page_size=500", USER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/v1/jobs", USER)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["items"], json!([]));
}

#[tokio::test]
async fn test_queue_status_reports_depth() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir);

    let response = app
        .oneshot(get("/api/v1/analysis/queue", USER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["depth"], 0);
    assert_eq!(status["running"], false);
}
