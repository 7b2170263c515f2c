//! Integration tests for per-session WebSocket event streaming.
//!
//! These tests validate the connected snapshot, event ordering for a
//! transition, and that clients only see events for their own session.

use std::net::TcpListener;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use genius_lesson::{create_router, AppState, Config, LessonEvent, LessonResolver, Phase};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns its address.
async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let mut config = Config::default();
    config.lessons_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/lessons").to_string();
    let resolver = LessonResolver::from_config(&config).expect("resolver");
    let state = AppState::new(config, resolver);

    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, handle)
}

async fn start_session(client: &reqwest::Client, addr: &str, grade: u8) -> String {
    let created: Value = client
        .post(format!("http://{addr}/api/sessions"))
        .json(&json!({ "childId": "kid-ws", "grade": grade }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    created["sessionId"]
        .as_str()
        .expect("session id")
        .to_string()
}

async fn post_event(client: &reqwest::Client, addr: &str, session_id: &str, event: Value) {
    let response = client
        .post(format!("http://{addr}/api/sessions/{session_id}/events"))
        .json(&event)
        .send()
        .await
        .expect("request");
    assert!(response.status().is_success());
}

/// Connects a WebSocket client to a session stream.
async fn connect_client(addr: &str, session_id: &str) -> WsClient {
    let url = format!("ws://{addr}/api/sessions/{session_id}/ws");
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as LessonEvent.
/// Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> LessonEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connected_event_carries_snapshot() {
    let (addr, _handle) = spawn_test_server().await;
    let http = reqwest::Client::new();
    let session_id = start_session(&http, &addr, 1).await;

    let mut client = connect_client(&addr, &session_id).await;
    let event = receive_event(&mut client).await;

    let LessonEvent::Connected(payload) = event else {
        panic!("Expected Connected event, got: {event:?}");
    };
    assert_eq!(payload.session_id, session_id);
    assert_eq!(payload.session.phase, Phase::Rules);
    assert_eq!(payload.session.lesson_id, "g1-robot-path-1");
}

#[tokio::test]
async fn test_unknown_session_refuses_upgrade() {
    let (addr, _handle) = spawn_test_server().await;

    let result = connect_async(format!("ws://{addr}/api/sessions/missing/ws")).await;

    assert!(result.is_err(), "upgrade should fail for an unknown session");
}

// ============================================================================
// Event Streaming Tests
// ============================================================================

#[tokio::test]
async fn test_events_stream_in_order() {
    let (addr, _handle) = spawn_test_server().await;
    let http = reqwest::Client::new();
    let session_id = start_session(&http, &addr, 1).await;

    let mut client = connect_client(&addr, &session_id).await;
    let _connected = receive_event(&mut client).await;

    post_event(&http, &addr, &session_id, json!({ "type": "advance" })).await;
    let event = receive_event(&mut client).await;
    assert!(
        matches!(&event, LessonEvent::PhaseChanged(p) if p.from == Phase::Rules && p.to == Phase::Demo),
        "got {event:?}"
    );

    post_event(&http, &addr, &session_id, json!({ "type": "advance" })).await;
    let _practice = receive_event(&mut client).await;

    post_event(&http, &addr, &session_id, json!({ "type": "request_hint" })).await;
    let event = receive_event(&mut client).await;
    let LessonEvent::HintRevealed(hint) = event else {
        panic!("Expected HintRevealed, got: {event:?}");
    };
    assert_eq!(hint.challenge_index, 0);
    assert_eq!(hint.tier, 1);
    assert_eq!(hint.hint, "The charger is straight ahead.");

    post_event(
        &http,
        &addr,
        &session_id,
        json!({ "type": "challenge_result", "success": true }),
    )
    .await;
    let event = receive_event(&mut client).await;
    assert!(
        matches!(&event, LessonEvent::ChallengeScored(s) if s.challenge_index == 0 && s.success && s.score == 1),
        "got {event:?}"
    );

    // The final result is followed by the phase change, then completion
    post_event(
        &http,
        &addr,
        &session_id,
        json!({ "type": "challenge_result", "success": true }),
    )
    .await;
    let scored = receive_event(&mut client).await;
    assert!(matches!(scored, LessonEvent::ChallengeScored(_)), "got {scored:?}");
    let changed = receive_event(&mut client).await;
    assert!(
        matches!(&changed, LessonEvent::PhaseChanged(p) if p.to == Phase::Complete),
        "got {changed:?}"
    );
    let complete = receive_event(&mut client).await;
    let LessonEvent::LessonComplete(done) = complete else {
        panic!("Expected LessonComplete, got: {complete:?}");
    };
    assert_eq!(done.score, 2);
    assert_eq!(done.total, 2);
    assert!(done.perfect);
}

#[tokio::test]
async fn test_clients_only_see_their_session() {
    let (addr, _handle) = spawn_test_server().await;
    let http = reqwest::Client::new();
    let first = start_session(&http, &addr, 1).await;
    let second = start_session(&http, &addr, 3).await;

    let mut first_client = connect_client(&addr, &first).await;
    let mut second_client = connect_client(&addr, &second).await;
    let _ = receive_event(&mut first_client).await;
    let _ = receive_event(&mut second_client).await;

    post_event(&http, &addr, &second, json!({ "type": "skip" })).await;
    post_event(&http, &addr, &first, json!({ "type": "advance" })).await;

    let event = receive_event(&mut first_client).await;
    assert_eq!(event.session_id(), first);

    let event = receive_event(&mut second_client).await;
    assert_eq!(event.session_id(), second);
    assert!(matches!(event, LessonEvent::PhaseChanged(_)));
}
