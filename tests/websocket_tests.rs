//! WebSocket integration tests

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use roomhub::auth::StaticValidator;
use roomhub::config::HubConfig;
use roomhub::ids::encode_id;
use roomhub::models::UserInfo;
use roomhub::protocol::{BinaryFrame, MovingState};
use roomhub::store::MemoryStore;
use roomhub::AppState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TEAM: i64 = 7;
const APP: i64 = 42;

fn user(id: i64) -> UserInfo {
    UserInfo {
        id,
        uid: format!("uid-{}", id),
        nickname: format!("user{}", id),
        avatar: String::new(),
    }
}

async fn setup_server() -> SocketAddr {
    let validator = StaticValidator::new()
        .with_user("tok-1", user(1))
        .with_user("tok-2", user(2));
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(validator),
        HubConfig::default(),
    );
    let app = roomhub::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    addr
}

fn app_url(addr: SocketAddr) -> String {
    format!(
        "ws://{}/teams/{}/room/websocketConnection/apps/{}",
        addr,
        encode_id(TEAM),
        encode_id(APP)
    )
}

fn binary_url(addr: SocketAddr, token: &str) -> String {
    format!(
        "ws://{}/teams/{}/room/binaryWebsocketConnection/apps/{}?token={}",
        addr,
        encode_id(TEAM),
        encode_id(APP),
        token
    )
}

async fn send_json(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(tokio::time::Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for a frame");
        match message {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text message, got {:?}", other),
        }
    }
}

async fn enter(ws: &mut Client, token: &str) -> Value {
    send_json(ws, json!({"signal": 1, "payload": [{"authToken": token}]})).await;
    next_json(ws).await
}

#[tokio::test]
async fn test_websocket_ping() {
    let addr = setup_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(app_url(addr)).await.unwrap();

    send_json(&mut ws, json!({"signal": 0})).await;
    assert_eq!(next_json(&mut ws).await["errorCode"], 3);
}

#[tokio::test]
async fn test_websocket_dashboard_enter() {
    let addr = setup_server().await;
    let url = format!(
        "ws://{}/teams/{}/room/websocketConnection/dashboard",
        addr,
        encode_id(TEAM)
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let entered = enter(&mut ws, "tok-1").await;
    assert_eq!(entered["errorCode"], 0);
    assert_eq!(entered["broadcast"]["type"], "enter/remote");
    assert_eq!(entered["broadcast"]["payload"]["inRoomUsers"][0]["id"], 1);
}

#[tokio::test]
async fn test_websocket_state_broadcast_between_peers() {
    let addr = setup_server().await;
    let (mut a, _) = tokio_tungstenite::connect_async(app_url(addr)).await.unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(app_url(addr)).await.unwrap();

    enter(&mut a, "tok-1").await;
    enter(&mut b, "tok-2").await;
    let joined = next_json(&mut a).await;
    assert_eq!(joined["broadcast"]["payload"]["inRoomUsers"].as_array().unwrap().len(), 2);

    send_json(
        &mut a,
        json!({
            "signal": 3,
            "target": 1,
            "option": 1,
            "payload": [{"displayName": "text1", "type": "TEXT"}]
        }),
    )
    .await;

    let relayed = next_json(&mut b).await;
    assert_eq!(relayed["broadcast"]["type"], "components/createState");
    assert_eq!(relayed["broadcast"]["payload"][0]["displayName"], "text1");
}

#[tokio::test]
async fn test_websocket_close_notifies_room() {
    let addr = setup_server().await;
    let (mut a, _) = tokio_tungstenite::connect_async(app_url(addr)).await.unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(app_url(addr)).await.unwrap();
    enter(&mut a, "tok-1").await;
    enter(&mut b, "tok-2").await;
    next_json(&mut a).await;

    b.close(None).await.unwrap();
    let left = next_json(&mut a).await;
    assert_eq!(left["broadcast"]["type"], "leave/remote");
}

#[tokio::test]
async fn test_websocket_rejects_malformed_room_id() {
    let addr = setup_server().await;
    let url = format!("ws://{}/teams/nope/room/websocketConnection/dashboard", addr);

    match tokio_tungstenite::connect_async(&url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 400),
        other => panic!("Expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_binary_upgrade_requires_token() {
    let addr = setup_server().await;

    match tokio_tungstenite::connect_async(binary_url(addr, "bogus")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("Expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_binary_frames_relay_with_sender_identity() {
    let addr = setup_server().await;
    let (mut a, _) = tokio_tungstenite::connect_async(binary_url(addr, "tok-1"))
        .await
        .unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(binary_url(addr, "tok-2"))
        .await
        .unwrap();
    // Both sessions must be registered before the frame goes out
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let frame = BinaryFrame::Moving(MovingState {
        client_id: 0,
        user_id: 0,
        display_names: vec!["btn1".to_string()],
        status: 1,
        x: 1.0,
        y: 2.0,
        width: 3.0,
        height: 4.0,
    })
    .encode()
    .unwrap();
    a.send(Message::Binary(frame)).await.unwrap();

    let received = tokio::time::timeout(tokio::time::Duration::from_secs(2), b.next())
        .await
        .expect("Timed out waiting for a frame");
    let bytes = match received {
        Some(Ok(Message::Binary(bytes))) => bytes,
        other => panic!("Expected binary message, got {:?}", other),
    };
    match BinaryFrame::decode(&bytes).unwrap() {
        BinaryFrame::Moving(state) => {
            assert_eq!(state.user_id, 1);
            assert_ne!(state.client_id, 0);
            assert_eq!(state.display_names, vec!["btn1".to_string()]);
        }
        other => panic!("Unexpected frame {:?}", other),
    }
}
