//! Integration tests for SyncManager over SQLite storage and a mock upstream.

use std::sync::Arc;

use skycast_cache::{SetOptions, SmartCache};
use skycast_core::{CacheConfig, ResilienceConfig, SharedClock, SyncConfig, SystemClock};
use skycast_net::{ApiRequest, ResilienceManager};
use skycast_store::{SqliteStore, StoreHandle};
use skycast_sync::{
    NewTask, PlannedRequest, RequestPlanner, SyncError, SyncManager, SyncPayload, SyncResult,
    TaskStatus,
};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Maps every search onto `GET {base}/search?q=<query>`.
struct SearchPlanner {
    base: String,
}

impl RequestPlanner for SearchPlanner {
    fn plan(&self, payload: &SyncPayload) -> SyncResult<PlannedRequest> {
        let SyncPayload::SearchLocation { query } = payload else {
            return Err(SyncError::planning("only searches are supported"));
        };
        let mut url = Url::parse(&format!("{}/search", self.base))
            .map_err(|e| SyncError::planning(e.to_string()))?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(PlannedRequest {
            request: ApiRequest::get("search", url),
            cache_key: payload.key(),
            cache_options: SetOptions::default(),
        })
    }
}

async fn open(
    store: &StoreHandle,
    server: &MockServer,
) -> (SyncManager, SmartCache<serde_json::Value>) {
    let clock: SharedClock = Arc::new(SystemClock);
    let resilience = ResilienceManager::with_reqwest(
        &ResilienceConfig {
            max_retries: 0,
            ..ResilienceConfig::default()
        },
        clock.clone(),
    )
    .unwrap();
    let cache = SmartCache::new(CacheConfig::default(), clock.clone());
    let planner = Arc::new(SearchPlanner {
        base: server.uri(),
    });
    let sync = SyncManager::open(
        &SyncConfig::default(),
        store.clone(),
        resilience,
        cache.clone(),
        planner,
        clock,
    )
    .await
    .unwrap();
    (sync, cache)
}

#[tokio::test]
async fn test_pending_task_survives_restart_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreHandle::new(SqliteStore::new(dir.path().join("skycast.db")).unwrap());
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Lisbon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "Lisbon", "latitude": 38.72, "longitude": -9.14 }
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (first, _) = open(&store, &mock_server).await;
    let id = first
        .enqueue(NewTask::new(SyncPayload::SearchLocation {
            query: "Lisbon".into(),
        }))
        .await
        .unwrap();
    drop(first);

    // Simulated restart over the same database file.
    let store = StoreHandle::new(SqliteStore::new(dir.path().join("skycast.db")).unwrap());
    let (second, cache) = open(&store, &mock_server).await;
    assert_eq!(second.get_task_status(&id).unwrap().status, TaskStatus::Pending);

    let report = second.drain().await;
    assert_eq!(report.succeeded, 1);

    let cached = cache.get("search:lisbon").await.unwrap();
    assert_eq!(cached[0]["name"], "Lisbon");
}

#[tokio::test]
async fn test_unplannable_payload_fails_without_request() {
    let store = StoreHandle::new(SqliteStore::in_memory().unwrap());
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (sync, _) = open(&store, &mock_server).await;
    let id = sync
        .enqueue(NewTask::new(SyncPayload::FetchWeather {
            latitude: 1.0,
            longitude: 2.0,
        }))
        .await
        .unwrap();

    let report = sync.drain().await;

    assert_eq!(report.failed, 1);
    let task = sync.get_task_status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.last_error.unwrap().contains("only searches"));
}
