//! In-memory store-config cache with single-flight refresh from Postgres.

pub mod error;
pub mod loader;
pub mod persist;
pub mod service;
pub mod snapshot;
pub mod store;

pub use error::{LoadError, PersistError};
pub use loader::{collect_store_configs, token_fingerprint, ConfigLoader, PgConfigLoader};
pub use service::{LocationTimestamps, StoreConfigService};
pub use snapshot::{CacheSnapshot, SnapshotOrigin};
pub use store::{CacheHealth, CacheSettings, CacheStore, HealthStatus, RefreshOutcome};
