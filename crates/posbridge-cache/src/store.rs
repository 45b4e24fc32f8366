//! The cache proper: current snapshot, refresh policy and the single-flight gate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use posbridge_core::{AppConfig, ClockSource, StoreConfig};
use serde::Serialize;

use crate::error::{LoadError, PersistError};
use crate::loader::ConfigLoader;
use crate::persist::{read_snapshot, write_snapshot};
use crate::snapshot::{CacheSnapshot, SnapshotOrigin};

const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Snapshot age at which a non-forced refresh becomes due.
    pub ttl: Duration,
    /// Upper bound on one `load_all` call.
    pub load_timeout: Duration,
    /// After a failed load, non-forced refreshes are skipped for this long.
    pub failure_backoff: Duration,
    /// Warm-start file written after each successful refresh.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            snapshot_path: None,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            load_timeout: config.load_timeout(),
            snapshot_path: config.snapshot_path.clone(),
            ..Self::default()
        }
    }
}

/// Result of a call to [`CacheStore::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The current snapshot is fresh (or a recent failure is backing off).
    NotDue,
    /// A new snapshot was installed.
    Refreshed { entities: usize },
    /// The load failed; the previous snapshot, if any, is still served.
    Failed(LoadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Stale,
    Unavailable,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Stale => "stale",
            HealthStatus::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub total_entities: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub age_seconds: i64,
    pub last_error: Option<String>,
    pub refresh_in_flight: bool,
}

#[derive(Debug, Default)]
struct RefreshState {
    snapshot: Option<Arc<CacheSnapshot>>,
    last_error: Option<LoadError>,
    last_failure_at: Option<DateTime<Utc>>,
    last_outcome: Option<RefreshOutcome>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Holds the current [`CacheSnapshot`] and refreshes it from a [`ConfigLoader`].
///
/// Reads never wait on a load: they clone the current `Arc` and go. At most
/// one load runs at a time; callers that arrive while one is running wait for
/// it and share its outcome.
pub struct CacheStore {
    loader: Arc<dyn ConfigLoader>,
    clock: Arc<dyn ClockSource>,
    settings: CacheSettings,
    state: RwLock<RefreshState>,
    gate: tokio::sync::Mutex<()>,
    /// Bumped each time a load completes, successful or not.
    generation: AtomicU64,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("loader", &self.loader.name())
            .field("settings", &self.settings)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    #[must_use]
    pub fn new(
        loader: Arc<dyn ConfigLoader>,
        clock: Arc<dyn ClockSource>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            loader,
            clock,
            settings,
            state: RwLock::new(RefreshState::default()),
            gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RefreshState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RefreshState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The snapshot currently being served, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        self.read_state().snapshot.clone()
    }

    /// Exact-token lookup against the current snapshot.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<StoreConfig> {
        self.snapshot()?.get(token).cloned()
    }

    #[must_use]
    pub fn list_active(&self) -> Vec<StoreConfig> {
        self.snapshot()
            .map(|s| s.entities().to_vec())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list_by_state(&self, code: &str) -> Vec<StoreConfig> {
        self.snapshot()
            .map(|s| {
                s.entities()
                    .iter()
                    .filter(|c| c.in_state(code))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a non-forced refresh would load right now.
    #[must_use]
    pub fn refresh_due(&self) -> bool {
        let now = self.clock.now();
        let state = self.read_state();

        if let Some(failed_at) = state.last_failure_at {
            if now - failed_at < to_chrono(self.settings.failure_backoff) {
                return false;
            }
        }

        match &state.snapshot {
            None => true,
            Some(snapshot) => {
                snapshot.origin() == SnapshotOrigin::Disk
                    || snapshot.age(now) >= to_chrono(self.settings.ttl)
            }
        }
    }

    /// Load a new snapshot if one is due, or unconditionally when `force`.
    ///
    /// Never returns an error: failures are reported in the outcome and in
    /// [`CacheStore::health`], and the previous snapshot stays in place.
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        if !force && !self.refresh_due() {
            return RefreshOutcome::NotDue;
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _permit = self.gate.lock().await;

        // Someone else finished a load while we were queued; share it.
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(outcome) = self.read_state().last_outcome.clone() {
                return outcome;
            }
        }
        if !force && !self.refresh_due() {
            return RefreshOutcome::NotDue;
        }

        let outcome = {
            let _in_flight = InFlight::enter(&self.in_flight);
            self.load_and_install().await
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn load_and_install(&self) -> RefreshOutcome {
        let loader = self.loader.name();
        let timeout = self.settings.load_timeout;

        let loaded = match tokio::time::timeout(timeout, self.loader.load_all()).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::SourceUnavailable {
                loader,
                reason: format!("load timed out after {}ms", timeout.as_millis()),
            }),
        };
        let now = self.clock.now();
        let built = loaded
            .and_then(|entities| CacheSnapshot::build(entities, now, SnapshotOrigin::Source));

        match built {
            Ok(snapshot) => {
                let entities = snapshot.len();
                if snapshot.is_empty() {
                    tracing::warn!(loader, "cache: source returned no active store configs");
                }
                let snapshot = Arc::new(snapshot);
                let outcome = RefreshOutcome::Refreshed { entities };
                {
                    let mut state = self.write_state();
                    state.snapshot = Some(Arc::clone(&snapshot));
                    state.last_error = None;
                    state.last_failure_at = None;
                    state.last_outcome = Some(outcome.clone());
                }
                tracing::info!(loader, entities, "cache: store config snapshot refreshed");
                self.persist(&snapshot).await;
                outcome
            }
            Err(e) => {
                let serving = {
                    let mut state = self.write_state();
                    state.last_error = Some(e.clone());
                    state.last_failure_at = Some(now);
                    state.last_outcome = Some(RefreshOutcome::Failed(e.clone()));
                    state.snapshot.as_ref().map_or(0, |s| s.len())
                };
                tracing::warn!(
                    loader,
                    error = %e,
                    serving,
                    "cache: refresh failed, keeping previous snapshot"
                );
                RefreshOutcome::Failed(e)
            }
        }
    }

    async fn persist(&self, snapshot: &CacheSnapshot) {
        let Some(path) = self.settings.snapshot_path.as_deref() else {
            return;
        };
        if let Err(e) = write_snapshot(path, snapshot).await {
            tracing::warn!(error = %e, "cache: failed to persist snapshot");
        }
    }

    /// Install a snapshot from a previous run if nothing is loaded yet.
    ///
    /// Returns `Ok(false)` when a snapshot was already present. The installed
    /// snapshot is always due for refresh, so the source replaces it at the
    /// first opportunity.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the file is missing or unusable.
    pub async fn warm_start(&self, path: &Path) -> Result<bool, PersistError> {
        let snapshot = read_snapshot(path).await?;
        let entities = snapshot.len();

        let mut state = self.write_state();
        if state.snapshot.is_some() {
            return Ok(false);
        }
        state.snapshot = Some(Arc::new(snapshot));
        drop(state);

        tracing::info!(entities, path = %path.display(), "cache: warm-started from disk");
        Ok(true)
    }

    #[must_use]
    pub fn health(&self) -> CacheHealth {
        let now = self.clock.now();
        let state = self.read_state();
        let last_error = state.last_error.as_ref().map(ToString::to_string);
        let refresh_in_flight = self.in_flight.load(Ordering::Acquire);

        match &state.snapshot {
            None => CacheHealth {
                status: HealthStatus::Unavailable,
                total_entities: 0,
                last_refresh: None,
                age_seconds: 0,
                last_error,
                refresh_in_flight,
            },
            Some(snapshot) => {
                let age = snapshot.age(now);
                let status = if age < to_chrono(self.settings.ttl) {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Stale
                };
                CacheHealth {
                    status,
                    total_entities: snapshot.len(),
                    last_refresh: Some(snapshot.fetched_at()),
                    age_seconds: age.num_seconds(),
                    last_error,
                    refresh_in_flight,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
