// Push channel and session tests against a mock SSE backend
// Run with: cargo test -p pressluft-stream --test live_delivery

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use pressluft_stream::memory::{self, ScriptedConnection, ScriptedPushTransport};
use pressluft_stream::{
    ActivityFeed, ActivityFilter, ActivityStreamOptions, ApiClient, ClientConfig, ConnectionMode,
    JobStatus, JobWatchOptions, JobWatcher, PageRequest, PushTransport, SseTransport,
    TransportError,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn activity(id: i64, message: &str) -> Value {
    json!({
        "id": id,
        "event_type": "backup.completed",
        "category": "backup",
        "level": "info",
        "actor_type": "system",
        "title": "Backup",
        "message": message,
        "requires_attention": false,
        "created_at": "2026-02-01T11:00:00Z"
    })
}

/// Encode named events the way the backend writes them
fn sse_body(events: &[(&str, i64, Value)]) -> String {
    let mut body = String::from(": connected\n\n");
    for (name, id, data) in events {
        body.push_str(&format!("id: {}\nevent: {}\ndata: {}\n\n", id, name, data));
    }
    body
}

fn sse(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream")
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(format!("{}/api", server.uri()))
        .with_poll_interval(Duration::from_millis(50))
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// SSE transport
// ============================================================================

#[tokio::test]
async fn test_sse_transport_yields_named_messages_then_ends() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/activity/stream"))
        .and(query_param("since_id", "41"))
        .respond_with(sse(sse_body(&[
            ("activity", 42, activity(42, "one")),
            ("activity", 43, activity(43, "two")),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&config(&server)).unwrap();
    let transport = SseTransport::activity(client);
    let messages: Vec<_> = transport
        .open(Some(41))
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;

    assert_eq!(messages.len(), 2);
    let first = messages[0].as_ref().unwrap();
    assert_eq!(first.event, "activity");
    assert_eq!(first.id.as_deref(), Some("42"));
    assert_eq!(
        serde_json::from_str::<Value>(&first.data).unwrap()["message"],
        "one"
    );
}

#[tokio::test]
async fn test_sse_transport_rejects_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/5/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = ApiClient::new(&config(&server)).unwrap();
    let result = SseTransport::job_events(client, 5).open(None).await;
    assert_eq!(result.err(), Some(TransportError::Rejected { status: 503 }));
}

#[tokio::test]
async fn test_sse_transport_detects_missing_event_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/5/events"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .mount(&server)
        .await;

    let client = ApiClient::new(&config(&server)).unwrap();
    let err = SseTransport::job_events(client, 5)
        .open(None)
        .await
        .err()
        .unwrap();
    assert!(err.is_unavailable(), "{err:?}");
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_activity_redelivery_replaces_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/activity/stream"))
        .respond_with(sse(sse_body(&[
            ("activity", 5, activity(5, "running")),
            ("activity", 5, activity(5, "done")),
        ])))
        .mount(&server)
        .await;

    let config = config(&server);
    let feed = ActivityFeed::new(ApiClient::new(&config).unwrap(), &config);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let session = feed.stream(
        ActivityStreamOptions::new().on_event(move |a| sink.lock().push(a.message.clone())),
    );

    assert!(eventually(|| delivered.lock().len() >= 2).await);
    session.dispose();

    let items = feed.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].message.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_activity_reconnect_resumes_after_last_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/activity/stream"))
        .and(query_param("since_id", "7"))
        .respond_with(sse(sse_body(&[("activity", 8, activity(8, "resumed"))])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/activity/stream"))
        .respond_with(sse(sse_body(&[("activity", 7, activity(7, "first"))])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let config = config(&server).with_backoff(
        pressluft_stream::BackoffPolicy::default()
            .with_initial_interval(Duration::from_millis(20)),
    );
    let feed = ActivityFeed::new(ApiClient::new(&config).unwrap(), &config);
    let session = feed.stream(ActivityStreamOptions::new());

    assert!(eventually(|| feed.get(8).is_some()).await);
    session.dispose();

    let ids: Vec<i64> = feed.items().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![8, 7]);
}

#[tokio::test]
async fn test_pushed_records_merge_into_listed_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [activity(3, "three"), activity(2, "two"), activity(1, "one")]
        })))
        .mount(&server)
        .await;

    let mut updated = memory::activity(2, "Backup");
    updated.message = Some("two, updated".to_string());
    let transport = Arc::new(ScriptedPushTransport::new());
    transport.push_connection(
        ScriptedConnection::new()
            .json("activity", &updated)
            .json("activity", &memory::activity(4, "Backup"))
            .hold_open(),
    );

    let config = config(&server);
    let feed = ActivityFeed::with_transport(ApiClient::new(&config).unwrap(), &config, transport);
    feed.list(&ActivityFilter::new(), &PageRequest::first())
        .await
        .unwrap();

    let session = feed.stream(ActivityStreamOptions::new());
    assert!(eventually(|| feed.get(4).is_some()).await);
    session.dispose();

    let ids: Vec<i64> = feed.items().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);
    assert_eq!(feed.len(), 4);
    assert_eq!(
        feed.get(2).unwrap().message.as_deref(),
        Some("two, updated")
    );
}

#[tokio::test]
async fn test_server_error_event_triggers_reconnect() {
    let server = MockServer::start().await;
    let body = format!(
        "{}event: error\ndata: {}\n\n",
        sse_body(&[("activity", 1, activity(1, "ok"))]),
        json!({"error": "listener lost"})
    );
    Mock::given(method("GET"))
        .and(path("/api/activity/stream"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let config = config(&server).with_backoff(
        pressluft_stream::BackoffPolicy::default()
            .with_initial_interval(Duration::from_millis(20)),
    );
    let feed = ActivityFeed::new(ApiClient::new(&config).unwrap(), &config);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let session = feed.stream(
        ActivityStreamOptions::new().on_error(move |e| sink.lock().push(e.clone())),
    );

    assert!(eventually(|| !errors.lock().is_empty()).await);
    session.dispose();

    assert_eq!(
        errors.lock()[0],
        TransportError::Stream("listener lost".to_string())
    );
    assert_eq!(feed.len(), 1);
}

#[tokio::test]
async fn test_job_push_rejected_falls_back_to_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/9/events"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 9,
            "kind": "deploy_site",
            "status": "succeeded",
            "current_step": "switch_release",
            "retry_count": 0,
            "created_at": "2026-02-01T11:00:00Z",
            "updated_at": "2026-02-01T11:09:00Z"
        })))
        .mount(&server)
        .await;

    let config = config(&server);
    let watcher = JobWatcher::new(ApiClient::new(&config).unwrap(), &config);

    let modes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&modes);
    let session = watcher.watch(
        9,
        JobWatchOptions::new().on_mode(move |m| sink.lock().push(m)),
    );

    tokio::time::timeout(Duration::from_secs(5), session.disconnected())
        .await
        .expect("session should disconnect once the job is terminal");

    assert_eq!(
        *modes.lock(),
        vec![
            ConnectionMode::Streaming,
            ConnectionMode::Polling,
            ConnectionMode::Disconnected
        ]
    );
    let events = watcher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].step_key.as_deref(), Some("switch_release"));
    assert_eq!(events[0].status, Some(JobStatus::Succeeded));
    assert_eq!(watcher.active_job().unwrap().status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_job_stream_resumes_with_since_seq() {
    let server = MockServer::start().await;
    let event = json!({
        "job_id": 4, "seq": 12, "event_type": "job_completed", "level": "success",
        "status": "succeeded", "message": "Done", "occurred_at": "2026-02-01T11:09:00Z"
    });
    Mock::given(method("GET"))
        .and(path("/api/jobs/4/events"))
        .and(query_param("since_seq", "11"))
        .respond_with(sse(sse_body(&[("job_event", 12, event)])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 4,
            "kind": "backup",
            "status": "succeeded",
            "created_at": "2026-02-01T11:00:00Z",
            "updated_at": "2026-02-01T11:09:00Z"
        })))
        .mount(&server)
        .await;

    let config = config(&server);
    let watcher = JobWatcher::new(ApiClient::new(&config).unwrap(), &config);
    let session = watcher.watch(4, JobWatchOptions::new().since_seq(11));

    tokio::time::timeout(Duration::from_secs(5), session.disconnected())
        .await
        .expect("terminal event should disconnect");
    assert!(eventually(|| watcher.active_job().is_some()).await);

    assert_eq!(watcher.events().len(), 1);
    assert_eq!(watcher.connection_mode(), ConnectionMode::Disconnected);
}
