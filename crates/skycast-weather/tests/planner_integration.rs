//! End-to-end: queued weather and geocoding tasks drained against a mock
//! Open-Meteo/Nominatim server.

use std::sync::Arc;

use skycast_cache::SmartCache;
use skycast_core::{CacheConfig, ResilienceConfig, SharedClock, SyncConfig, SystemClock, WeatherConfig};
use skycast_net::ResilienceManager;
use skycast_store::{MemoryStore, StoreHandle};
use skycast_sync::{NewTask, SyncManager, TaskStatus};
use skycast_weather::{search_location, Coordinates, OpenMeteoPlanner};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup(server: &MockServer) -> (SyncManager, SmartCache<serde_json::Value>) {
    let clock: SharedClock = Arc::new(SystemClock);
    let weather = WeatherConfig {
        forecast_url: format!("{}/v1/forecast", server.uri()),
        geocoding_url: format!("{}/v1/search", server.uri()),
        reverse_geocode_url: format!("{}/reverse", server.uri()),
        ..WeatherConfig::default()
    };
    let planner = Arc::new(OpenMeteoPlanner::new(&weather).unwrap());
    let resilience = ResilienceManager::with_reqwest(
        &ResilienceConfig {
            max_retries: 0,
            ..ResilienceConfig::default()
        },
        clock.clone(),
    )
    .unwrap();
    let cache = SmartCache::new(CacheConfig::default(), clock.clone());
    let sync = SyncManager::open(
        &SyncConfig::default(),
        StoreHandle::new(MemoryStore::new()),
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
async fn test_weather_and_place_land_in_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "47.6062"))
        .and(query_param("timezone", "auto"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "current": { "temperature_2m": 11.2, "weather_code": 61 },
            "daily": { "time": ["2026-10-18"] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "address": { "city": "Seattle", "state": "Washington" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (sync, cache) = setup(&mock_server).await;
    let seattle = Coordinates::new(47.6062, -122.3321).unwrap();
    let weather_id = sync.enqueue(NewTask::new(seattle.fetch_weather())).await.unwrap();
    let place_id = sync.enqueue(NewTask::new(seattle.reverse_geocode())).await.unwrap();

    let report = sync.drain().await;
    assert_eq!(report.succeeded, 2);

    let forecast = cache.get("weather:47.61,-122.33").await.unwrap();
    assert_eq!(forecast["current"]["weather_code"], 61);

    let place = cache.get("place:47.61,-122.33").await.unwrap();
    assert_eq!(place["address"]["city"], "Seattle");

    assert_eq!(sync.get_task_status(&weather_id).unwrap().status, TaskStatus::Succeeded);
    assert_eq!(sync.get_task_status(&place_id).unwrap().status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_search_server_error_schedules_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "Reykjavik"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (sync, cache) = setup(&mock_server).await;
    let id = sync
        .enqueue(NewTask::new(search_location("Reykjavik").unwrap()))
        .await
        .unwrap();

    let report = sync.drain().await;

    assert_eq!(report.retried, 1);
    let task = sync.get_task_status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempt, 1);
    assert!(cache.get("search:reykjavik").await.is_none());
}
