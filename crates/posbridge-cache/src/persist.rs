//! On-disk copy of the snapshot, used only to warm-start the cache.
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! reader never sees a half-written document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use posbridge_core::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::snapshot::{CacheSnapshot, SnapshotOrigin};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFileRef<'a> {
    fetched_at: DateTime<Utc>,
    entities: &'a [StoreConfig],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    fetched_at: DateTime<Utc>,
    entities: Vec<StoreConfig>,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `snapshot` to `path` atomically.
///
/// # Errors
///
/// Returns [`PersistError`] if serialization, the temp write or the rename fails.
pub async fn write_snapshot(path: &Path, snapshot: &CacheSnapshot) -> Result<(), PersistError> {
    let doc = SnapshotFileRef {
        fetched_at: snapshot.fetched_at(),
        entities: snapshot.entities(),
    };
    let bytes = serde_json::to_vec_pretty(&doc).map_err(|source| PersistError::Json {
        path: display(path),
        source,
    })?;

    let io_err = |source: std::io::Error| PersistError::Io {
        path: display(path),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(())
}

/// Read a snapshot previously written by [`write_snapshot`].
///
/// Entities that fail validation are skipped with a warning, the same way a
/// malformed source row is. The result is tagged [`SnapshotOrigin::Disk`].
///
/// # Errors
///
/// Returns [`PersistError`] if the file cannot be read or parsed, or if it
/// contains duplicate active tokens.
pub async fn read_snapshot(path: &Path) -> Result<CacheSnapshot, PersistError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| PersistError::Io {
        path: display(path),
        source,
    })?;
    let doc: SnapshotFile = serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
        path: display(path),
        source,
    })?;

    let entities = doc
        .entities
        .into_iter()
        .filter(|config| match config.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    record_id = %config.id,
                    error = %e,
                    "persist: skipping invalid entity in snapshot file"
                );
                false
            }
        })
        .collect();

    CacheSnapshot::build(entities, doc.fetched_at, SnapshotOrigin::Disk).map_err(|e| {
        PersistError::InvalidSnapshot {
            path: display(path),
            reason: e.to_string(),
        }
    })
}
