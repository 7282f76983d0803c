//! Integration tests for the supervisor token client

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roomhub::auth::{request_token, SupervisorClient, TokenValidator};
use roomhub::error::AppError;
use roomhub::ids::encode_id;

const SECRET: &str = "hub-secret";

async fn mount_valid(mock_server: &MockServer, token: &str, valid: bool) {
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/validateAccessToken"))
        .and(header("Authorization", token))
        .and(header("Request-Token", request_token(SECRET, token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "valid": valid
        })))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_authenticate_success() {
    let mock_server = MockServer::start().await;
    mount_valid(&mock_server, "tok", true).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("Authorization", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": encode_id(31),
            "uid": "8a1c0f52-1111-4c6e-9a3b-5d0f2c7e9b10",
            "nickname": "alice",
            "avatar": "https://cdn.example/a.png"
        })))
        .mount(&mock_server)
        .await;

    let client = SupervisorClient::new(mock_server.uri(), SECRET);
    let user = client.authenticate("tok").await.unwrap();

    assert_eq!(user.id, 31);
    assert_eq!(user.nickname, "alice");
    assert_eq!(user.avatar, "https://cdn.example/a.png");
}

#[tokio::test]
async fn test_authenticate_invalid_token() {
    let mock_server = MockServer::start().await;
    mount_valid(&mock_server, "stale", false).await;

    let client = SupervisorClient::new(mock_server.uri(), SECRET);
    let result = client.authenticate("stale").await;

    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn test_rejected_signature_is_unauthorized() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/auth/validateAccessToken"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let client = SupervisorClient::new(mock_server.uri(), "wrong-secret");
    let result = client.validate("tok").await;

    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn test_supervisor_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/auth/validateAccessToken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = SupervisorClient::new(mock_server.uri(), SECRET);
    let result = client.validate("tok").await;

    assert!(matches!(result, Err(AppError::Supervisor(_))));
}

#[tokio::test]
async fn test_malformed_user_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "not-an-id"
        })))
        .mount(&mock_server)
        .await;

    let client = SupervisorClient::new(mock_server.uri(), SECRET);
    let result = client.user_info("tok").await;

    assert!(matches!(result, Err(AppError::Supervisor(_))));
}
