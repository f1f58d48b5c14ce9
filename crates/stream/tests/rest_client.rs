// REST boundary tests against a mock backend
// Run with: cargo test -p pressluft-stream --test rest_client

use pressluft_stream::{
    ActivityFeed, ActivityFilter, ApiClient, ApiError, ClientConfig, CreateJobRequest,
    JobStatus, JobWatcher, PageRequest,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn activity(id: i64, read: bool) -> Value {
    json!({
        "id": id,
        "event_type": "site.deployed",
        "category": "site",
        "level": "success",
        "resource_type": "site",
        "resource_id": 40 + id,
        "actor_type": "user",
        "actor_id": "7",
        "title": format!("Deploy #{}", id),
        "requires_attention": true,
        "read_at": if read { json!("2026-02-01T12:00:00Z") } else { Value::Null },
        "created_at": "2026-02-01T11:00:00Z"
    })
}

fn job(id: i64, status: &str) -> Value {
    json!({
        "id": id,
        "server_id": 3,
        "kind": "provision_server",
        "status": status,
        "current_step": "install_packages",
        "retry_count": 0,
        "created_at": "2026-02-01T11:00:00Z",
        "updated_at": "2026-02-01T11:05:00Z"
    })
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(format!("{}/api", server.uri()))
}

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&config(server)).expect("client")
}

// ============================================================================
// Error envelope
// ============================================================================

#[tokio::test]
async fn test_error_envelope_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "job not found"})))
        .mount(&server)
        .await;

    let err = client(&server).get_job(404).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "job not found");
}

#[tokio::test]
async fn test_missing_envelope_falls_back_to_status_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>upstream</html>"))
        .mount(&server)
        .await;

    let err = client(&server).get_job(1).await.unwrap_err();
    assert!(matches!(err, ApiError::Api { status: 502, .. }));
    assert_eq!(err.to_string(), "Bad Gateway");
}

#[tokio::test]
async fn test_schema_mismatch_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let err = client(&server).get_job(2).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)), "{err:?}");
}

// ============================================================================
// Cursor pager
// ============================================================================

#[tokio::test]
async fn test_pages_append_in_server_order_without_duplicates() {
    let server = MockServer::start().await;

    // More specific mock first; wiremock prefers the earliest match
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .and(query_param("cursor", "c1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [activity(2, false)]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [activity(1, false)],
            "next_cursor": "c1"
        })))
        .mount(&server)
        .await;

    let feed = ActivityFeed::new(client(&server), &config(&server));

    let first = feed
        .list(&ActivityFilter::new(), &PageRequest::first().with_limit(1))
        .await
        .unwrap();
    assert_eq!(first.cursor(), Some("c1"));
    assert!(feed.has_more());

    feed.list(&ActivityFilter::new(), &PageRequest::after("c1"))
        .await
        .unwrap();

    let ids: Vec<i64> = feed.items().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(!feed.has_more());
}

#[tokio::test]
async fn test_filter_and_limit_are_sent_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .and(query_param("limit", "20"))
        .and(query_param("category", "site"))
        .and(query_param("requires_attention", "true"))
        .and(query_param("unread_only", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let filter = ActivityFilter::new()
        .with_category("site")
        .with_requires_attention(true)
        .unread_only();
    let feed = ActivityFeed::new(client(&server), &config(&server));
    let page = feed
        .list(&filter, &PageRequest::first().with_limit(20))
        .await
        .unwrap();
    assert!(page.data.is_empty());
}

#[tokio::test]
async fn test_server_activity_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers/3/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [activity(9, true), activity(8, false)],
            "next_cursor": ""
        })))
        .mount(&server)
        .await;

    let feed = ActivityFeed::new(client(&server), &config(&server));
    feed.list_server(3, &PageRequest::first()).await.unwrap();

    assert_eq!(feed.len(), 2);
    assert!(!feed.has_more());
    assert!(!feed.get(9).unwrap().is_unread());
}

#[tokio::test]
async fn test_failed_page_keeps_previous_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .and(query_param("cursor", "broken"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid cursor"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [activity(1, false)],
            "next_cursor": "c1"
        })))
        .mount(&server)
        .await;

    let feed = ActivityFeed::new(client(&server), &config(&server));
    feed.list(&ActivityFilter::new(), &PageRequest::first())
        .await
        .unwrap();

    let err = feed
        .list(&ActivityFilter::new(), &PageRequest::after("broken"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid cursor");
    assert_eq!(feed.len(), 1);
    assert_eq!(feed.next_cursor().as_deref(), Some("c1"));
}

// ============================================================================
// Read state
// ============================================================================

async fn seeded_feed(server: &MockServer) -> ActivityFeed {
    Mock::given(method("GET"))
        .and(path("/api/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [activity(2, false), activity(1, false)]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/activity/unread-count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
        .up_to_n_times(1)
        .mount(server)
        .await;

    let feed = ActivityFeed::new(client(server), &config(server));
    feed.list(&ActivityFilter::new(), &PageRequest::first())
        .await
        .unwrap();
    assert_eq!(feed.fetch_unread_count(&ActivityFilter::new()).await.unwrap(), 2);
    feed
}

#[tokio::test]
async fn test_mark_read_updates_store_and_unread_count() {
    let server = MockServer::start().await;
    let feed = seeded_feed(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/activity/1/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity(1, true)))
        .mount(&server)
        .await;

    let confirmed = feed.mark_read(1).await.unwrap();
    assert!(!confirmed.is_unread());
    assert_eq!(feed.unread_count(), 1);

    let ids: Vec<i64> = feed.items().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert!(!feed.get(1).unwrap().is_unread());
    assert!(feed.get(2).unwrap().is_unread());
}

#[tokio::test]
async fn test_mark_read_failure_keeps_optimistic_state() {
    let server = MockServer::start().await;
    let feed = seeded_feed(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/activity/2/read"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "db down"})))
        .mount(&server)
        .await;

    let err = feed.mark_read(2).await.unwrap_err();
    assert_eq!(err.to_string(), "db down");

    // Not rolled back
    assert!(!feed.get(2).unwrap().is_unread());
    assert_eq!(feed.unread_count(), 1);
}

#[tokio::test]
async fn test_mark_all_read_refreshes_count() {
    let server = MockServer::start().await;
    let feed = seeded_feed(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/activity/read-all"))
        .and(query_param("category", "site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/activity/unread-count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0})))
        .mount(&server)
        .await;

    feed.mark_all_read(&ActivityFilter::new().with_category("site"))
        .await
        .unwrap();

    assert!(feed.items().iter().all(|a| !a.is_unread()));
    assert_eq!(feed.unread_count(), 0);
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_create_job_becomes_active() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs"))
        .and(body_json(json!({"kind": "provision_server", "server_id": 3})))
        .respond_with(ResponseTemplate::new(201).set_body_json(job(11, "queued")))
        .mount(&server)
        .await;

    let watcher = JobWatcher::new(client(&server), &config(&server));
    let created = watcher
        .create_job(&CreateJobRequest {
            kind: Some("provision_server".into()),
            server_id: Some(3),
        })
        .await
        .unwrap();

    assert_eq!(created.id, 11);
    assert_eq!(created.status, JobStatus::Queued);
    assert_eq!(watcher.active_job().unwrap().id, 11);
}

#[tokio::test]
async fn test_create_job_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"error": "server already has an active job"})),
        )
        .mount(&server)
        .await;

    let watcher = JobWatcher::new(client(&server), &config(&server));
    let err = watcher
        .create_job(&CreateJobRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert!(watcher.active_job().is_none());
}

#[tokio::test]
async fn test_history_seeds_job_events() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/11/events/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"job_id": 11, "seq": 1, "event_type": "job_created", "level": "info",
             "message": "Job queued", "occurred_at": "2026-02-01T11:00:00Z"},
            {"job_id": 11, "seq": 2, "event_type": "step_started", "level": "info",
             "step_key": "install_packages", "status": "running",
             "message": "Installing", "occurred_at": "2026-02-01T11:01:00Z"}
        ])))
        .mount(&server)
        .await;

    let watcher = JobWatcher::new(client(&server), &config(&server));
    let history = watcher.load_history(11).await.unwrap();

    assert_eq!(history.len(), 2);
    let seqs: Vec<i64> = watcher.events().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(watcher.events()[1].status, Some(JobStatus::Running));
}
