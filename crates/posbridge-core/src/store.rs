//! Per-location configuration as served by the store-config cache.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static HHMM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("valid HH:MM regex"));

#[derive(Debug, Error)]
pub enum StoreConfigError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("opening hour {opening} must be before closing hour {closing} (both 0-23)")]
    InvalidHourRange { opening: i64, closing: i64 },

    #[error("invalid {field} time \"{value}\" for {day}: expected HH:MM")]
    InvalidTime {
        day: DayOfWeek,
        field: &'static str,
        value: String,
    },

    #[error("overnight hours are not supported ({day}: open {open}, close {close})")]
    OvernightSpan {
        day: DayOfWeek,
        open: String,
        close: String,
    },

    #[error("daily hours JSON is malformed: {0}")]
    InvalidDailyHoursJson(#[from] serde_json::Error),
}

/// Weekday key used by [`DailyHours`]. Serialized as the lowercase English name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl std::fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        };
        f.write_str(name)
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Wall-clock opening hours for one weekday, `HH:MM` 24-hour strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: String,
    pub close: String,
}

impl DayHours {
    fn parse(day: DayOfWeek, field: &'static str, value: &str) -> Result<NaiveTime, StoreConfigError> {
        let invalid = || StoreConfigError::InvalidTime {
            day,
            field,
            value: value.to_string(),
        };
        if !HHMM.is_match(value) {
            return Err(invalid());
        }
        NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| invalid())
    }

    /// Parsed `(open, close)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreConfigError::InvalidTime`] if either side is not `HH:MM`.
    pub fn times(&self, day: DayOfWeek) -> Result<(NaiveTime, NaiveTime), StoreConfigError> {
        Ok((
            Self::parse(day, "open", &self.open)?,
            Self::parse(day, "close", &self.close)?,
        ))
    }
}

/// Per-weekday hours keyed by lowercase day name. Days may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DailyHours(pub BTreeMap<DayOfWeek, DayHours>);

impl DailyHours {
    /// Decode the JSON blob stored alongside a location row and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreConfigError`] if the JSON does not parse or any day
    /// fails [`DailyHours::validate`].
    pub fn from_json(raw: &str) -> Result<Self, StoreConfigError> {
        let hours: DailyHours = serde_json::from_str(raw)?;
        hours.validate()?;
        Ok(hours)
    }

    /// Every day must be well-formed `HH:MM` with `open <= close`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreConfigError::InvalidTime`] or
    /// [`StoreConfigError::OvernightSpan`].
    pub fn validate(&self) -> Result<(), StoreConfigError> {
        for (day, hours) in &self.0 {
            let (open, close) = hours.times(*day)?;
            if open > close {
                return Err(StoreConfigError::OvernightSpan {
                    day: *day,
                    open: hours.open.clone(),
                    close: hours.close.clone(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, day: DayOfWeek) -> Option<&DayHours> {
        self.0.get(&day)
    }
}

/// One physical location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Vendor-assigned location identifier.
    pub id: String,
    /// Opaque vendor token. Case-sensitive; may contain `+`, `/` and `=`.
    pub location_token: String,
    pub name: String,
    /// IANA zone name, e.g. `America/Denver`.
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub opening_hour: u8,
    pub closing_hour: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_hours: Option<DailyHours>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_maps_url: Option<String>,
    /// Last write to the source row, not the time it was cached.
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
}

impl StoreConfig {
    /// Check the record-level invariants.
    ///
    /// # Errors
    ///
    /// Returns [`StoreConfigError`] when a required text field is blank, the
    /// fallback hours are out of order, or `daily_hours` is invalid.
    pub fn validate(&self) -> Result<(), StoreConfigError> {
        let required = [
            ("id", &self.id),
            ("location_token", &self.location_token),
            ("name", &self.name),
            ("timezone", &self.timezone),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(StoreConfigError::MissingField(field));
            }
        }
        validate_hour_range(i64::from(self.opening_hour), i64::from(self.closing_hour))?;
        if let Some(hours) = &self.daily_hours {
            hours.validate()?;
        }
        Ok(())
    }

    /// Effective `(open, close)` for `day`, falling back to the whole-hour
    /// fields when no detailed hours exist for that day.
    #[must_use]
    pub fn hours_on(&self, day: DayOfWeek) -> (NaiveTime, NaiveTime) {
        let detailed = self
            .daily_hours
            .as_ref()
            .and_then(|hours| hours.get(day))
            .and_then(|hours| hours.times(day).ok());

        detailed.unwrap_or_else(|| (whole_hour(self.opening_hour), whole_hour(self.closing_hour)))
    }

    /// Whether the location is open at a local wall-clock instant. Opening
    /// time is inclusive, closing time exclusive.
    #[must_use]
    pub fn is_open_at(&self, local: NaiveDateTime) -> bool {
        let (open, close) = self.hours_on(local.weekday().into());
        let time = local.time();
        time >= open && time < close
    }

    /// Case-insensitive match on the free-text state field.
    #[must_use]
    pub fn in_state(&self, code: &str) -> bool {
        let code = code.trim();
        self.state
            .as_deref()
            .is_some_and(|state| state.trim().eq_ignore_ascii_case(code))
    }
}

/// Validate a raw opening/closing pair as read from storage.
///
/// # Errors
///
/// Returns [`StoreConfigError::InvalidHourRange`] unless
/// `0 <= opening < closing <= 23`.
pub fn validate_hour_range(opening: i64, closing: i64) -> Result<(), StoreConfigError> {
    let in_day = |h: i64| (0..=23).contains(&h);
    if in_day(opening) && in_day(closing) && opening < closing {
        Ok(())
    } else {
        Err(StoreConfigError::InvalidHourRange { opening, closing })
    }
}

fn whole_hour(hour: u8) -> NaiveTime {
    NaiveTime::from_hms_opt(u32::from(hour), 0, 0).unwrap_or(NaiveTime::MIN)
}
