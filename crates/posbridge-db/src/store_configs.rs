//! Read access to the `store_configs` table.
//!
//! The legacy schema keeps most columns nullable and stores per-day hours as
//! an opaque JSON string. Rows are decoded eagerly here so that a bad record
//! surfaces as a [`MalformedRecord`] at load time rather than at lookup time.

use chrono::{DateTime, Utc};
use posbridge_core::{validate_hour_range, DailyHours, StoreConfig};
use sqlx::PgPool;
use thiserror::Error;

/// A row from the `store_configs` table, exactly as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoreConfigRow {
    pub id: String,
    pub location_token: Option<String>,
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub state: Option<String>,
    pub region: Option<String>,
    pub opening_hour: Option<i16>,
    pub closing_hour: Option<i16>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub store_url: Option<String>,
    pub google_maps_url: Option<String>,
    /// JSON object keyed by lowercase weekday: `{"monday": {"open": "11:00", "close": "22:00"}}`.
    pub daily_hours_json: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// A row that could not be turned into a [`StoreConfig`]. Never fatal to a load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store config {record_id} is malformed: {reason}")]
pub struct MalformedRecord {
    pub record_id: String,
    pub reason: String,
}

impl StoreConfigRow {
    /// Decode and validate the row.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedRecord`] when a required column is null or blank,
    /// the hour columns are out of range, or `daily_hours_json` is invalid.
    pub fn into_store_config(self) -> Result<StoreConfig, MalformedRecord> {
        let malformed = |reason: String| MalformedRecord {
            record_id: self.id.clone(),
            reason,
        };

        let location_token = required_text(self.location_token.clone(), "location_token")
            .map_err(&malformed)?;
        let name = required_text(self.name.clone(), "name").map_err(&malformed)?;
        let timezone = required_text(self.timezone.clone(), "timezone").map_err(&malformed)?;
        let last_updated = self
            .last_updated
            .ok_or_else(|| malformed("last_updated is null".to_string()))?;

        let (Some(opening), Some(closing)) = (self.opening_hour, self.closing_hour) else {
            return Err(malformed("opening_hour/closing_hour is null".to_string()));
        };
        validate_hour_range(i64::from(opening), i64::from(closing))
            .map_err(|e| malformed(e.to_string()))?;

        let daily_hours = match non_blank(self.daily_hours_json.clone()) {
            Some(raw) => Some(DailyHours::from_json(&raw).map_err(|e| malformed(e.to_string()))?),
            None => None,
        };

        let config = StoreConfig {
            id: self.id.clone(),
            location_token,
            name,
            timezone: timezone.trim().to_string(),
            state: non_blank(self.state.clone()).map(|s| s.trim().to_string()),
            region: non_blank(self.region.clone()),
            // validate_hour_range guarantees 0..=23.
            opening_hour: u8::try_from(opening).unwrap_or_default(),
            closing_hour: u8::try_from(closing).unwrap_or_default(),
            daily_hours,
            address: non_blank(self.address.clone()),
            phone: non_blank(self.phone.clone()),
            store_url: non_blank(self.store_url.clone()),
            google_maps_url: non_blank(self.google_maps_url.clone()),
            last_updated,
            is_active: self.is_active,
        };
        config.validate().map_err(|e| malformed(e.to_string()))?;
        Ok(config)
    }
}

fn required_text(value: Option<String>, column: &str) -> Result<String, String> {
    non_blank(value).ok_or_else(|| format!("{column} is null or blank"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Fetch every active row. Inactive rows never leave the database.
///
/// Results are ordered by `id ASC` so loads are deterministic.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn list_active_store_config_rows(
    pool: &PgPool,
) -> Result<Vec<StoreConfigRow>, sqlx::Error> {
    sqlx::query_as::<_, StoreConfigRow>(
        "SELECT id, location_token, name, timezone, state, region, \
                opening_hour, closing_hour, address, phone, store_url, \
                google_maps_url, daily_hours_json, last_updated, is_active \
         FROM store_configs \
         WHERE is_active = TRUE \
         ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
}
