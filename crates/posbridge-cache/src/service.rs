//! Facade the rest of the proxy talks to.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use posbridge_core::{BusinessTimestamps, ClockSource, StoreConfig, TimezoneError, TimezoneResolver};

use crate::error::PersistError;
use crate::loader::{token_fingerprint, ConfigLoader};
use crate::store::{CacheHealth, CacheSettings, CacheStore, RefreshOutcome};

/// A location's business timestamps for one instant.
#[derive(Debug, Clone)]
pub struct LocationTimestamps {
    pub store: StoreConfig,
    pub timestamps: BusinessTimestamps,
    /// First instant of the business date, at the cutoff hour local time.
    pub business_day_start: DateTime<Utc>,
    /// First instant of the next business date.
    pub business_day_end: DateTime<Utc>,
}

/// Store-config lookups that keep themselves fresh.
///
/// Every read first awaits a non-forced refresh, which is a no-op while the
/// snapshot is within its TTL and joins any load already in flight otherwise.
/// Reads never fail: when the source is down they serve the last good
/// snapshot, or nothing if there has never been one.
#[derive(Debug)]
pub struct StoreConfigService {
    store: CacheStore,
    resolver: TimezoneResolver,
}

impl StoreConfigService {
    #[must_use]
    pub fn new(
        loader: Arc<dyn ConfigLoader>,
        clock: Arc<dyn ClockSource>,
        settings: CacheSettings,
        resolver: TimezoneResolver,
    ) -> Self {
        Self {
            store: CacheStore::new(loader, clock, settings),
            resolver,
        }
    }

    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    #[must_use]
    pub fn resolver(&self) -> &TimezoneResolver {
        &self.resolver
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    pub async fn get(&self, token: &str) -> Option<StoreConfig> {
        self.store.refresh(false).await;
        let found = self.store.get(token);
        if found.is_none() {
            tracing::debug!(
                token_fingerprint = %token_fingerprint(token),
                "service: no store config for token"
            );
        }
        found
    }

    pub async fn list_active(&self) -> Vec<StoreConfig> {
        self.store.refresh(false).await;
        self.store.list_active()
    }

    pub async fn list_by_state(&self, code: &str) -> Vec<StoreConfig> {
        self.store.refresh(false).await;
        self.store.list_by_state(code)
    }

    /// Forced reload, regardless of snapshot age.
    pub async fn refresh_cache(&self) -> RefreshOutcome {
        self.store.refresh(true).await
    }

    /// Reload only if the snapshot is due. Used by the background job.
    pub async fn refresh_if_due(&self) -> RefreshOutcome {
        self.store.refresh(false).await
    }

    #[must_use]
    pub fn health(&self) -> CacheHealth {
        self.store.health()
    }

    /// # Errors
    ///
    /// Returns [`PersistError`] if the warm-start file is missing or unusable.
    pub async fn warm_start(&self, path: &Path) -> Result<bool, PersistError> {
        self.store.warm_start(path).await
    }

    /// Business date, local time, offset and business-day bounds for the
    /// location behind `token`.
    ///
    /// `Ok(None)` when the token is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidZone`] if the location's stored zone
    /// is not a valid IANA name.
    pub async fn business_timestamps(
        &self,
        token: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<LocationTimestamps>, TimezoneError> {
        let Some(store) = self.get(token).await else {
            return Ok(None);
        };
        let resolved = self
            .resolver
            .business_timestamps(&store.timezone, instant)
            .and_then(|timestamps| {
                self.resolver
                    .business_day_bounds(&store.timezone, timestamps.business_date)
                    .map(|bounds| (timestamps, bounds))
            });

        match resolved {
            Ok((timestamps, (business_day_start, business_day_end))) => {
                Ok(Some(LocationTimestamps {
                    store,
                    timestamps,
                    business_day_start,
                    business_day_end,
                }))
            }
            Err(e) => {
                tracing::warn!(
                    record_id = %store.id,
                    error = %e,
                    "service: location has an unusable timezone"
                );
                Err(e)
            }
        }
    }
}
