//! API integration tests

use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use roomhub::auth::StaticValidator;
use roomhub::config::HubConfig;
use roomhub::ids::encode_id;
use roomhub::models::{App, SetState, StateType, UserInfo, EDIT_VERSION};
use roomhub::store::{MemoryStore, StateStore};
use roomhub::AppState;

const TEAM: i64 = 7;
const APP: i64 = 42;

async fn setup_app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let validator = StaticValidator::new().with_user(
        "tok-1",
        UserInfo {
            id: 1,
            uid: "uid-1".to_string(),
            nickname: "user1".to_string(),
            avatar: String::new(),
        },
    );
    let state = AppState::new(store.clone(), Arc::new(validator), HubConfig::default());
    (roomhub::router(state), store)
}

async fn seed_app(store: &MemoryStore) {
    store.insert_app(&App::new(TEAM, APP, "crm")).await.unwrap();
    store
        .create_set_state(SetState::new(StateType::DisplayName, TEAM, APP, EDIT_VERSION, "btn1"))
        .await
        .unwrap();
}

fn app_path(suffix: &str) -> String {
    format!(
        "/api/v1/teams/{}/apps/{}/{}",
        encode_id(TEAM),
        encode_id(APP),
        suffix
    )
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> hyper::Request<Body> {
    let mut builder = hyper::Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", token);
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: hyper::Request<Body>) -> (hyper::StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _store) = setup_app().await;

    let response = app
        .oneshot(
            hyper::Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), hyper::StatusCode::OK);
}

#[tokio::test]
async fn test_control_endpoints_require_token() {
    let (app, store) = setup_app().await;
    seed_app(&store).await;

    let (status, _) = call(&app, request("POST", &app_path("snapshots"), None, None)).await;
    assert_eq!(status, hyper::StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, request("POST", &app_path("deploy"), Some("wrong"), None)).await;
    assert_eq!(status, hyper::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_ids_are_bad_requests() {
    let (app, _store) = setup_app().await;

    let (status, _) = call(
        &app,
        request("GET", "/api/v1/teams/zz/apps/zz/release", None, None),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_release_before_deploy_is_not_found() {
    let (app, store) = setup_app().await;
    seed_app(&store).await;

    let (status, _) = call(&app, request("GET", &app_path("release"), None, None)).await;
    assert_eq!(status, hyper::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deploy_then_release() {
    let (app, store) = setup_app().await;
    seed_app(&store).await;

    let (status, body) = call(&app, request("POST", &app_path("deploy"), Some("tok-1"), None)).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(body["releaseVersion"], 1);

    let (status, body) = call(&app, request("GET", &app_path("release"), None, None)).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert_eq!(body["setStates"][0]["value"], "btn1");
}

#[tokio::test]
async fn test_manual_snapshot_and_listing() {
    let (app, store) = setup_app().await;
    seed_app(&store).await;

    let (status, archived) =
        call(&app, request("POST", &app_path("snapshots"), Some("tok-1"), None)).await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(archived["targetVersion"], 1);
    assert!(archived["snapshotID"].is_string());

    let (status, listed) =
        call(&app, request("GET", &app_path("snapshots"), Some("tok-1"), None)).await;
    assert_eq!(status, hyper::StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    let active = listed.iter().find(|s| s["targetVersion"] == 0).unwrap();
    assert_eq!(active["triggerMode"], "manual");
}

#[tokio::test]
async fn test_recover_snapshot() {
    let (app, store) = setup_app().await;
    seed_app(&store).await;

    let (_, archived) =
        call(&app, request("POST", &app_path("snapshots"), Some("tok-1"), None)).await;
    let snapshot_id = archived["snapshotID"].clone();

    let active = store.find_active_snapshot(TEAM, APP).await.unwrap().unwrap();
    let (status, _) = call(
        &app,
        request(
            "POST",
            &app_path("recoverSnapshot"),
            Some("tok-1"),
            Some(json!({"snapshotID": encode_id(active.id)})),
        ),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::BAD_REQUEST);

    let (status, recovered) = call(
        &app,
        request(
            "POST",
            &app_path("recoverSnapshot"),
            Some("tok-1"),
            Some(json!({"snapshotID": snapshot_id})),
        ),
    )
    .await;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(recovered["snapshotID"], archived["snapshotID"]);

    let active = store.find_active_snapshot(TEAM, APP).await.unwrap().unwrap();
    assert_eq!(active.modify_history.len(), 1);
    assert_eq!(active.modify_history[0].modified_by, 1);
}
