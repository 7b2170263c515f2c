//! Integration tests for the HTTP session API over a real socket.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use genius_lesson::{
    create_router, AppState, Config, LessonResolver, MemorySink, ProgressReporter,
    TransitionPolicy,
};
use serde_json::{json, Value};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

fn fixture_config() -> Config {
    let mut config = Config::default();
    config.lessons_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/lessons").to_string();
    config
}

fn fixture_state(config: Config) -> AppState {
    let resolver = LessonResolver::from_config(&config).expect("resolver");
    AppState::new(config, resolver)
}

/// Spawns the test server and returns its base URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let base_url = format!("http://{addr}/api");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (base_url, handle)
}

async fn start_session(client: &reqwest::Client, base_url: &str, body: Value) -> Value {
    let response = client
        .post(format!("{base_url}/sessions"))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response.json().await.expect("json")
}

async fn post_event(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
    event: Value,
) -> reqwest::Response {
    client
        .post(format!("{base_url}/sessions/{session_id}/events"))
        .json(&event)
        .send()
        .await
        .expect("request")
}

// ============================================================================
// Session Lifecycle
// ============================================================================

#[tokio::test]
async fn test_full_lesson_over_http() {
    let sink = Arc::new(MemorySink::new());
    let state = fixture_state(fixture_config()).with_reporter(ProgressReporter::new(sink.clone()));
    let (base_url, _handle) = spawn_test_server(state).await;
    let client = reqwest::Client::new();

    let created = start_session(&client, &base_url, json!({ "childId": "kid-9", "grade": 1 })).await;
    assert_eq!(created["source"], "primary");
    assert_eq!(created["session"]["lessonId"], "g1-robot-path-1");
    assert_eq!(created["session"]["phase"], "rules");
    assert_eq!(created["session"]["rule"], "One Step at a Time");
    let session_id = created["sessionId"].as_str().expect("session id").to_string();

    let events = [
        json!({ "type": "advance" }),
        json!({ "type": "advance" }),
        json!({ "type": "request_hint" }),
        json!({ "type": "challenge_result", "success": true }),
        json!({ "type": "challenge_result", "success": false }),
    ];
    let mut last = Value::Null;
    for event in events {
        let response = post_event(&client, &base_url, &session_id, event).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        last = response.json().await.expect("json");
    }

    assert_eq!(last["outcome"]["result"], "applied");
    assert_eq!(last["outcome"]["to"], "complete");
    assert_eq!(last["session"]["score"], 1);
    assert_eq!(last["session"]["total"], 2);
    assert_eq!(last["session"]["result"]["perfect"], false);

    // The write is fire-and-forget; poll until it lands
    let mut records = Vec::new();
    for _ in 0..50 {
        records = sink.records().await;
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].child_id, "kid-9");
    assert_eq!(records[0].score, 1);

    let snapshot: Value = client
        .get(format!("{base_url}/sessions/{session_id}"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(snapshot["phase"], "complete");

    let deleted = client
        .delete(format!("{base_url}/sessions/{session_id}"))
        .send()
        .await
        .expect("request");
    assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);

    let missing = client
        .get(format!("{base_url}/sessions/{session_id}"))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fallback_source_reported() {
    let (base_url, _handle) = spawn_test_server(fixture_state(fixture_config())).await;
    let client = reqwest::Client::new();

    let created = start_session(&client, &base_url, json!({ "childId": "kid-1", "grade": 4 })).await;

    assert_eq!(created["source"], "fallback");
    assert_eq!(created["session"]["phase"], "rules");
}

#[tokio::test]
async fn test_requested_lesson_id_selected() {
    let (base_url, _handle) = spawn_test_server(fixture_state(fixture_config())).await;
    let client = reqwest::Client::new();

    let created = start_session(
        &client,
        &base_url,
        json!({ "childId": "kid-1", "grade": 1, "lessonId": "g1-robot-path-1" }),
    )
    .await;

    assert_eq!(created["session"]["lessonId"], "g1-robot-path-1");
}

// ============================================================================
// Error Responses
// ============================================================================

#[tokio::test]
async fn test_out_of_range_grade_is_bad_request() {
    let (base_url, _handle) = spawn_test_server(fixture_state(fixture_config())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/sessions"))
        .json(&json!({ "childId": "kid-1", "grade": 13 }))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("json");
    assert!(body["error"].as_str().expect("error").contains("grade 13"));
}

#[tokio::test]
async fn test_ignored_event_leaves_session_unchanged() {
    let (base_url, _handle) = spawn_test_server(fixture_state(fixture_config())).await;
    let client = reqwest::Client::new();

    let created = start_session(&client, &base_url, json!({ "childId": "kid-1", "grade": 1 })).await;
    let session_id = created["sessionId"].as_str().expect("session id");

    let response = post_event(&client, &base_url, session_id, json!({ "type": "retry" })).await;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["outcome"]["result"], "ignored");
    assert_eq!(body["session"]["phase"], "rules");
}

#[tokio::test]
async fn test_rejected_event_is_conflict() {
    let mut config = fixture_config();
    config.invalid_transitions = TransitionPolicy::Reject;
    let (base_url, _handle) = spawn_test_server(fixture_state(config)).await;
    let client = reqwest::Client::new();

    let created = start_session(&client, &base_url, json!({ "childId": "kid-1", "grade": 1 })).await;
    let session_id = created["sessionId"].as_str().expect("session id");

    let response = post_event(
        &client,
        &base_url,
        session_id,
        json!({ "type": "challenge_result", "success": true }),
    )
    .await;

    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (base_url, _handle) = spawn_test_server(fixture_state(fixture_config())).await;
    let client = reqwest::Client::new();

    let response = post_event(&client, &base_url, "nope", json!({ "type": "advance" })).await;

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
