use std::collections::HashMap;

use chrono::{DateTime, Utc};
use posbridge_core::StoreConfig;

use crate::error::LoadError;
use crate::loader::reject_duplicate_tokens;

/// Where a snapshot's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Loaded from the authoritative config source.
    Source,
    /// Read back from the on-disk warm-start file; replaced at the next refresh.
    Disk,
}

/// Immutable, fully-indexed view of every active location.
///
/// Built off to the side and swapped in whole; readers holding an `Arc` to an
/// older snapshot keep a consistent view.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    entities: Vec<StoreConfig>,
    by_token: HashMap<String, usize>,
    fetched_at: DateTime<Utc>,
    origin: SnapshotOrigin,
}

impl CacheSnapshot {
    /// Drops inactive entities and indexes the rest by token.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DuplicateToken`] if two active entities share a token.
    pub fn build(
        entities: Vec<StoreConfig>,
        fetched_at: DateTime<Utc>,
        origin: SnapshotOrigin,
    ) -> Result<Self, LoadError> {
        let entities: Vec<StoreConfig> = entities.into_iter().filter(|c| c.is_active).collect();
        reject_duplicate_tokens(&entities)?;

        let by_token = entities
            .iter()
            .enumerate()
            .map(|(idx, config)| (config.location_token.clone(), idx))
            .collect();

        Ok(Self {
            entities,
            by_token,
            fetched_at,
            origin,
        })
    }

    /// Exact, case-sensitive token match.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&StoreConfig> {
        self.by_token.get(token).map(|&idx| &self.entities[idx])
    }

    #[must_use]
    pub fn entities(&self) -> &[StoreConfig] {
        &self.entities
    }

    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    #[must_use]
    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Time since the snapshot was fetched. Never negative.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.fetched_at).max(chrono::Duration::zero())
    }
}
