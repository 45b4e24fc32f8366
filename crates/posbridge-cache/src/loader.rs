//! Sources of store configuration for the cache.

use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use posbridge_core::StoreConfig;
use posbridge_db::{list_active_store_config_rows, StoreConfigRow};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::LoadError;

/// One-shot read of every active location.
///
/// Implementations must not return two entries with the same token; the
/// cache re-checks this and rejects the whole load if they do.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// Short name for logs and errors, e.g. `"postgres"`.
    fn name(&self) -> &'static str;

    async fn load_all(&self) -> Result<Vec<StoreConfig>, LoadError>;
}

/// Loads from the `store_configs` table.
#[derive(Debug, Clone)]
pub struct PgConfigLoader {
    pool: PgPool,
}

impl PgConfigLoader {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigLoader for PgConfigLoader {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load_all(&self) -> Result<Vec<StoreConfig>, LoadError> {
        let rows = list_active_store_config_rows(&self.pool)
            .await
            .map_err(|e| LoadError::SourceUnavailable {
                loader: self.name(),
                reason: e.to_string(),
            })?;
        collect_store_configs(rows)
    }
}

/// Decode rows, skipping malformed ones, then enforce token uniqueness.
///
/// # Errors
///
/// Returns [`LoadError::DuplicateToken`] if two decoded rows share a token.
pub fn collect_store_configs(rows: Vec<StoreConfigRow>) -> Result<Vec<StoreConfig>, LoadError> {
    let total = rows.len();
    let mut configs = Vec::with_capacity(total);

    for row in rows {
        match row.into_store_config() {
            Ok(config) => configs.push(config),
            Err(malformed) => {
                tracing::warn!(
                    record_id = %malformed.record_id,
                    reason = %malformed.reason,
                    "loader: skipping malformed store config"
                );
            }
        }
    }

    reject_duplicate_tokens(&configs)?;

    tracing::debug!(
        total,
        loaded = configs.len(),
        skipped = total - configs.len(),
        "loader: store configs decoded"
    );
    Ok(configs)
}

/// # Errors
///
/// Returns [`LoadError::DuplicateToken`] naming both records on the first collision.
pub fn reject_duplicate_tokens(configs: &[StoreConfig]) -> Result<(), LoadError> {
    let mut seen: HashMap<&str, &str> = HashMap::with_capacity(configs.len());
    for config in configs {
        if let Some(first_id) = seen.insert(config.location_token.as_str(), config.id.as_str()) {
            return Err(LoadError::DuplicateToken {
                token_fingerprint: token_fingerprint(&config.location_token),
                first_id: first_id.to_string(),
                second_id: config.id.clone(),
            });
        }
    }
    Ok(())
}

/// Short, stable, non-reversible tag for a token so it can appear in logs.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(6).fold(String::with_capacity(12), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
