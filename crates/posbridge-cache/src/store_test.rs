use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::TimeZone;
use posbridge_core::ManualClock;

use super::*;

struct FakeLoader {
    calls: AtomicUsize,
    next: Mutex<Result<Vec<StoreConfig>, LoadError>>,
}

impl FakeLoader {
    fn new(result: Result<Vec<StoreConfig>, LoadError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            next: Mutex::new(result),
        })
    }

    fn set(&self, result: Result<Vec<StoreConfig>, LoadError>) {
        *self.next.lock().unwrap() = result;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigLoader for FakeLoader {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn load_all(&self) -> Result<Vec<StoreConfig>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().unwrap().clone()
    }
}

fn store(id: &str, token: &str, state: &str) -> StoreConfig {
    StoreConfig {
        id: id.to_string(),
        location_token: token.to_string(),
        name: format!("Store {id}"),
        timezone: "America/Denver".to_string(),
        state: Some(state.to_string()),
        region: None,
        opening_hour: 10,
        closing_hour: 22,
        daily_hours: None,
        address: None,
        phone: None,
        store_url: None,
        google_maps_url: None,
        last_updated: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        is_active: true,
    }
}

fn unavailable() -> LoadError {
    LoadError::SourceUnavailable {
        loader: "fake",
        reason: "connection refused".to_string(),
    }
}

fn setup(
    result: Result<Vec<StoreConfig>, LoadError>,
) -> (CacheStore, Arc<FakeLoader>, Arc<ManualClock>) {
    let loader = FakeLoader::new(result);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let settings = CacheSettings {
        ttl: Duration::from_secs(60),
        failure_backoff: Duration::from_secs(10),
        ..CacheSettings::default()
    };
    let cache = CacheStore::new(loader.clone(), clock.clone(), settings);
    (cache, loader, clock)
}

#[tokio::test]
async fn empty_cache_is_unavailable_and_due() {
    let (cache, loader, _) = setup(Ok(vec![]));

    let health = cache.health();
    assert_eq!(health.status, HealthStatus::Unavailable);
    assert_eq!(health.age_seconds, 0);
    assert!(health.last_refresh.is_none());
    assert!(cache.refresh_due());
    assert!(cache.get("anything").is_none());
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn refresh_is_skipped_until_ttl_elapses() {
    let (cache, loader, clock) = setup(Ok(vec![store("1", "AAA==", "CO")]));

    assert_eq!(
        cache.refresh(false).await,
        RefreshOutcome::Refreshed { entities: 1 }
    );
    clock.advance(Duration::from_secs(59));
    assert_eq!(cache.refresh(false).await, RefreshOutcome::NotDue);
    assert_eq!(cache.health().status, HealthStatus::Healthy);

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.health().status, HealthStatus::Stale);
    assert_eq!(cache.health().age_seconds, 60);
    assert_eq!(
        cache.refresh(false).await,
        RefreshOutcome::Refreshed { entities: 1 }
    );
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn forced_refresh_ignores_ttl() {
    let (cache, loader, _) = setup(Ok(vec![store("1", "AAA==", "CO")]));
    cache.refresh(false).await;
    cache.refresh(true).await;
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn failure_keeps_snapshot_and_records_error() {
    let (cache, loader, clock) = setup(Ok(vec![store("1", "AAA==", "CO")]));
    cache.refresh(false).await;

    loader.set(Err(unavailable()));
    clock.advance(Duration::from_secs(120));
    assert_eq!(
        cache.refresh(false).await,
        RefreshOutcome::Failed(unavailable())
    );

    assert!(cache.get("AAA==").is_some());
    let health = cache.health();
    assert_eq!(health.status, HealthStatus::Stale);
    assert_eq!(health.total_entities, 1);
    assert!(health
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("connection refused")));
    assert!(!health.refresh_in_flight);
}

#[tokio::test]
async fn failed_loads_back_off_then_retry() {
    let (cache, loader, clock) = setup(Err(unavailable()));

    assert!(matches!(
        cache.refresh(false).await,
        RefreshOutcome::Failed(_)
    ));
    assert_eq!(cache.refresh(false).await, RefreshOutcome::NotDue);
    assert_eq!(loader.calls(), 1);

    loader.set(Ok(vec![store("1", "AAA==", "CO")]));
    clock.advance(Duration::from_secs(10));
    assert_eq!(
        cache.refresh(false).await,
        RefreshOutcome::Refreshed { entities: 1 }
    );
    assert!(cache.health().last_error.is_none());
}

#[tokio::test]
async fn forced_refresh_bypasses_backoff() {
    let (cache, loader, _) = setup(Err(unavailable()));
    cache.refresh(false).await;
    loader.set(Ok(vec![store("1", "AAA==", "CO")]));
    assert_eq!(
        cache.refresh(true).await,
        RefreshOutcome::Refreshed { entities: 1 }
    );
}

#[tokio::test]
async fn list_by_state_is_case_insensitive() {
    let (cache, _, _) = setup(Ok(vec![
        store("1", "AAA==", "CO"),
        store("2", "BBB==", "ca"),
        store("3", "CCC==", " co "),
    ]));
    cache.refresh(false).await;

    let ids: Vec<String> = cache
        .list_by_state("co")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["1", "3"]);
    assert_eq!(cache.list_active().len(), 3);
    assert!(cache.list_by_state("NY").is_empty());
}

#[tokio::test]
async fn timed_out_load_is_source_unavailable() {
    struct SlowLoader;

    #[async_trait]
    impl ConfigLoader for SlowLoader {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn load_all(&self) -> Result<Vec<StoreConfig>, LoadError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    tokio::time::pause();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = CacheStore::new(Arc::new(SlowLoader), clock, CacheSettings::default());

    let outcome = cache.refresh(true).await;
    match outcome {
        RefreshOutcome::Failed(LoadError::SourceUnavailable { loader, reason }) => {
            assert_eq!(loader, "slow");
            assert!(reason.contains("timed out"), "reason: {reason}");
        }
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert!(!cache.health().refresh_in_flight);
}

#[test]
fn health_serializes_lowercase_status_and_camel_case_fields() {
    let health = CacheHealth {
        status: HealthStatus::Stale,
        total_entities: 3,
        last_refresh: None,
        age_seconds: 901,
        last_error: None,
        refresh_in_flight: false,
    };
    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["status"], "stale");
    assert_eq!(json["totalEntities"], 3);
    assert_eq!(json["ageSeconds"], 901);
    assert_eq!(json["refreshInFlight"], false);
    assert_eq!(HealthStatus::Unavailable.as_str(), "unavailable");
}
