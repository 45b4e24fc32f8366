//! Local time, UTC offset and restaurant business date for a location.
//!
//! Every caller that needs a business date or a SOAP-ready offset goes
//! through [`TimezoneResolver`]. Offsets always come from the IANA database
//! via `chrono-tz`, so DST transitions and fractional-hour zones are handled
//! without any hardcoded minute values.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Local hour at which a new business day starts unless configured otherwise.
pub const DEFAULT_CUTOFF_HOUR: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimezoneError {
    #[error("'{0}' is not a valid IANA timezone")]
    InvalidZone(String),

    #[error("business day cutoff hour {0} is outside 0-23")]
    InvalidCutoffHour(u32),
}

/// The three values a vendor SOAP request needs for a location at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessTimestamps {
    pub business_date: NaiveDate,
    #[serde(serialize_with = "serialize_wall_clock")]
    pub modified_time_local: NaiveDateTime,
    pub offset_minutes: i32,
}

impl BusinessTimestamps {
    /// `YYYY-MM-DDTHH:MM:SS±HH:MM`, for request fields that want the offset inline.
    #[must_use]
    pub fn modified_time_with_offset(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        format!(
            "{}{sign}{:02}:{:02}",
            self.modified_time_local.format("%Y-%m-%dT%H:%M:%S"),
            abs / 60,
            abs % 60
        )
    }
}

fn serialize_wall_clock<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&value.format("%Y-%m-%dT%H:%M:%S"))
}

/// Parse an IANA zone name.
///
/// # Errors
///
/// Returns [`TimezoneError::InvalidZone`] if `zone` is not in the tz database.
pub fn parse_zone(zone: &str) -> Result<Tz, TimezoneError> {
    zone.trim()
        .parse::<Tz>()
        .map_err(|_| TimezoneError::InvalidZone(zone.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneResolver {
    cutoff_hour: u32,
}

impl Default for TimezoneResolver {
    fn default() -> Self {
        Self {
            cutoff_hour: DEFAULT_CUTOFF_HOUR,
        }
    }
}

impl TimezoneResolver {
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidCutoffHour`] if `cutoff_hour > 23`.
    pub fn new(cutoff_hour: u32) -> Result<Self, TimezoneError> {
        if cutoff_hour > 23 {
            return Err(TimezoneError::InvalidCutoffHour(cutoff_hour));
        }
        Ok(Self { cutoff_hour })
    }

    #[must_use]
    pub fn cutoff_hour(&self) -> u32 {
        self.cutoff_hour
    }

    /// Wall-clock time at `instant` in `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidZone`] for an unknown zone.
    pub fn local_time(&self, zone: &str, instant: DateTime<Utc>) -> Result<NaiveDateTime, TimezoneError> {
        let tz = parse_zone(zone)?;
        Ok(instant.with_timezone(&tz).naive_local())
    }

    /// Signed offset from UTC in minutes at `instant`; west of UTC is negative.
    ///
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidZone`] for an unknown zone.
    pub fn utc_offset_minutes(&self, zone: &str, instant: DateTime<Utc>) -> Result<i32, TimezoneError> {
        let tz = parse_zone(zone)?;
        Ok(offset_minutes_at(tz, instant))
    }

    /// Business date at `instant`: before the cutoff hour, transactions still
    /// belong to the previous calendar day.
    ///
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidZone`] for an unknown zone.
    pub fn business_date(&self, zone: &str, instant: DateTime<Utc>) -> Result<NaiveDate, TimezoneError> {
        let local = self.local_time(zone, instant)?;
        Ok(self.business_date_for_local(local))
    }

    /// Business date, local wall-clock time and offset for a SOAP request.
    ///
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidZone`] for an unknown zone.
    pub fn business_timestamps(
        &self,
        zone: &str,
        instant: DateTime<Utc>,
    ) -> Result<BusinessTimestamps, TimezoneError> {
        let tz = parse_zone(zone)?;
        let local = instant.with_timezone(&tz).naive_local();
        let local = local.with_nanosecond(0).unwrap_or(local);
        Ok(BusinessTimestamps {
            business_date: self.business_date_for_local(local),
            modified_time_local: local,
            offset_minutes: offset_minutes_at(tz, instant),
        })
    }

    /// UTC instants bounding a business day: from the cutoff on `date` to the
    /// cutoff on the following day.
    ///
    /// When the cutoff falls in a DST gap the first valid local time after it
    /// is used; when it is ambiguous the earlier instant wins.
    ///
    /// # Errors
    ///
    /// Returns [`TimezoneError::InvalidZone`] for an unknown zone.
    pub fn business_day_bounds(
        &self,
        zone: &str,
        date: NaiveDate,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), TimezoneError> {
        let tz = parse_zone(zone)?;
        let start = self.cutoff_instant(tz, date);
        let next = date.succ_opt().unwrap_or(date);
        let end = self.cutoff_instant(tz, next);
        Ok((start, end))
    }

    fn business_date_for_local(&self, local: NaiveDateTime) -> NaiveDate {
        let date = local.date();
        if local.hour() < self.cutoff_hour {
            date.pred_opt().unwrap_or(date)
        } else {
            date
        }
    }

    fn cutoff_instant(&self, tz: Tz, date: NaiveDate) -> DateTime<Utc> {
        let cutoff = NaiveTime::from_hms_opt(self.cutoff_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let mut local = date.and_time(cutoff);
        // Gaps are at most a few hours; probe forward in quarter-hour steps.
        for _ in 0..16 {
            match tz.from_local_datetime(&local) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    return dt.with_timezone(&Utc)
                }
                LocalResult::None => local += Duration::minutes(15),
            }
        }
        Utc.from_utc_datetime(&local)
    }
}

fn offset_minutes_at(tz: Tz, instant: DateTime<Utc>) -> i32 {
    instant.with_timezone(&tz).offset().fix().local_minus_utc() / 60
}

#[cfg(test)]
#[path = "timezone_test.rs"]
mod tests;
