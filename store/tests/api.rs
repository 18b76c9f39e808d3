use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use store::rest::{DroneListResponse, IngestResponse};
use store::{metrics, AppState, LatestStateCache, ReceiveClock};
use telemetry::{Position, StoredRecord, TelemetryRecord};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn spawn_store(log: Option<mpsc::Sender<StoredRecord>>) -> (SocketAddr, Arc<LatestStateCache>) {
    spawn_store_with(AppState::new, log).await
}

async fn spawn_store_with(
    state: impl FnOnce(Arc<LatestStateCache>, Option<mpsc::Sender<StoredRecord>>) -> AppState,
    log: Option<mpsc::Sender<StoredRecord>>,
) -> (SocketAddr, Arc<LatestStateCache>) {
    let cache = Arc::new(LatestStateCache::new());
    let app = store::app(state(cache.clone(), log));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, cache)
}

#[tokio::test]
async fn test_post_then_query_status() {
    let (addr, cache) = spawn_store(None).await;
    let client = reqwest::Client::new();
    let body = json!({
        "drone_id": "d1",
        "position": {"latitude": 10.0, "longitude": 20.0},
        "battery_level": 87
    });

    let resp = client
        .post(format!("http://{}/api/data", addr))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ingest: IngestResponse = resp.json().await.unwrap();
    assert_eq!(ingest.status, "success");
    assert!(ingest.applied);
    assert_eq!(cache.len(), 1);

    let resp = client
        .get(format!("http://{}/api/drones/d1/status", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status, body);
}

#[tokio::test]
async fn test_missing_field_is_bad_request() {
    let (addr, cache) = spawn_store(None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/data", addr))
        .json(&json!({"drone_id": "d1", "position": [1, 2]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let error: Value = resp.json().await.unwrap();
    assert_eq!(error["error"], "missing field: battery_level");
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (addr, _) = spawn_store(None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/data", addr))
        .body("drone_1 at position 10, 20")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_unknown_drone_is_not_found() {
    let (addr, _) = spawn_store(None).await;

    let resp = reqwest::get(format!("http://{}/api/drones/nobody/status", addr))
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    let error: Value = resp.json().await.unwrap();
    assert_eq!(error["error"], "drone nobody not found");
}

#[tokio::test]
async fn test_list_returns_most_recent_first() {
    let (addr, _) = spawn_store(None).await;
    let client = reqwest::Client::new();

    for (id, battery) in [("a", 10), ("b", 20), ("c", 30)] {
        let resp = client
            .post(format!("http://{}/api/data", addr))
            .json(&json!({"drone_id": id, "position": [1, 1], "battery_level": battery}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let list: DroneListResponse = reqwest::get(format!("http://{}/api/drones?limit=2", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(list.limit, 2);
    assert_eq!(list.total, 2);
    let ids: Vec<&str> = list.data.iter().map(|r| r.emitter_id()).collect();
    assert_eq!(ids, vec!["c", "b"]);
}

#[tokio::test]
async fn test_accepted_records_reach_append_log() {
    let (tx, mut rx) = mpsc::channel(8);
    let (addr, _) = spawn_store(Some(tx)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/data", addr))
        .json(&json!({"drone_id": "logged", "position": [3, 4], "battery_level": 99}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let appended = rx.recv().await.unwrap();
    assert_eq!(appended.emitter_id(), "logged");
    assert_eq!(appended.record.battery_level, 99);
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    metrics::init_metrics().unwrap();
    let (addr, _) = spawn_store(None).await;

    let health = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "ok");

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/data", addr))
        .json(&json!({"drone_id": "counted", "position": [0, 0], "battery_level": 50}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("store_records_total"), "metrics output: {}", body);
}

fn seeded(id: &str, battery: u8, received_at: DateTime<Utc>) -> StoredRecord {
    StoredRecord::new(
        TelemetryRecord {
            emitter_id: id.to_string(),
            position: Position::Grid(7, 7),
            battery_level: battery,
        },
        received_at,
    )
}

#[tokio::test]
async fn test_stale_post_is_accepted_but_not_applied() {
    let (tx, mut rx) = mpsc::channel(8);
    let (addr, cache) = spawn_store(Some(tx)).await;
    cache.put(seeded("d1", 90, Utc::now() + Duration::hours(1)));

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/data", addr))
        .json(&json!({"drone_id": "d1", "position": [1, 1], "battery_level": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ingest: IngestResponse = resp.json().await.unwrap();
    assert_eq!(ingest.status, "success");
    assert!(!ingest.applied);

    let status: Value = reqwest::get(format!("http://{}/api/drones/d1/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status, json!({"drone_id": "d1", "position": [7, 7], "battery_level": 90}));

    // Still part of the history
    let appended = rx.recv().await.unwrap();
    assert_eq!(appended.record.battery_level, 10);
}

#[tokio::test]
async fn test_restored_future_stamp_does_not_block_new_records() {
    let restored = seeded("d1", 90, Utc::now() + Duration::hours(1));
    let clock = Arc::new(ReceiveClock::new());
    clock.observe(restored.received_at);

    let (addr, cache) =
        spawn_store_with(|cache, log| AppState::new(cache, log).with_clock(clock), None).await;
    cache.put(restored.clone());

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/data", addr))
        .json(&json!({"drone_id": "d1", "position": [1, 1], "battery_level": 10}))
        .send()
        .await
        .unwrap();
    let ingest: IngestResponse = resp.json().await.unwrap();
    assert!(ingest.applied);

    let stored = cache.get("d1").unwrap();
    assert_eq!(stored.record.battery_level, 10);
    assert!(stored.received_at > restored.received_at);
}

#[tokio::test]
async fn test_list_limit_defaults_and_clamps() {
    let (addr, _) = spawn_store(None).await;
    let client = reqwest::Client::new();

    for i in 0..3 {
        let resp = client
            .post(format!("http://{}/api/data", addr))
            .json(&json!({"drone_id": format!("d{}", i), "position": [i, i], "battery_level": 50}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let list: DroneListResponse = reqwest::get(format!("http://{}/api/drones", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.limit, 100);
    assert_eq!(list.total, 3);

    let list: DroneListResponse = reqwest::get(format!("http://{}/api/drones?limit=5000", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.limit, 1000);
    assert_eq!(list.total, 3);
}
