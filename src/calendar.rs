use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;

use crate::limits::SLOT_MS;
use crate::model::{Ms, Span};

/// Wall-clock rules of the deployment: one zone and one daily working window.
///
/// Every conversion between a local date/time and an instant goes through here
/// so that overlap checks, "is in the past" and slot labels agree on the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl Calendar {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Result<Self, CalendarError> {
        if open >= close {
            return Err(CalendarError::EmptyWindow { open, close });
        }
        Ok(Self { tz, open, close })
    }

    /// Build from textual settings, e.g. `("Europe/Rome", "08:00", "20:00")`.
    pub fn parse(zone: &str, open: &str, close: &str) -> Result<Self, CalendarError> {
        let tz: Tz = zone
            .parse()
            .map_err(|_| CalendarError::UnknownZone(zone.to_string()))?;
        Self::new(tz, parse_time(open)?, parse_time(close)?)
    }

    pub fn utc_default() -> Self {
        Self {
            tz: Tz::UTC,
            open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn zone_name(&self) -> &'static str {
        self.tz.name()
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }

    pub fn local(&self, ms: Ms) -> Option<DateTime<Tz>> {
        DateTime::from_timestamp_millis(ms).map(|utc| utc.with_timezone(&self.tz))
    }

    pub fn local_date(&self, ms: Ms) -> Option<NaiveDate> {
        self.local(ms).map(|dt| dt.date_naive())
    }

    /// Resolve a local date and time to an instant.
    /// Times skipped by a DST jump move forward one hour; repeated times take
    /// the earlier instant.
    pub fn instant(&self, date: NaiveDate, time: NaiveTime) -> Result<Ms, CalendarError> {
        let naive = NaiveDateTime::new(date, time);
        let resolved = self
            .tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .ok_or(CalendarError::Unrepresentable(naive))?;
        Ok(resolved.timestamp_millis())
    }

    /// Working window `[open, close)` of a local date.
    pub fn day_window(&self, date: NaiveDate) -> Result<Span, CalendarError> {
        let start = self.instant(date, self.open)?;
        let end = self.instant(date, self.close)?;
        Span::try_new(start, end).ok_or(CalendarError::EmptyWindow {
            open: self.open,
            close: self.close,
        })
    }

    /// The whole local day, midnight to midnight.
    pub fn day_bounds(&self, date: NaiveDate) -> Result<Span, CalendarError> {
        let next = date.succ_opt().ok_or(CalendarError::DateOutOfRange(date))?;
        let start = self.instant(date, NaiveTime::MIN)?;
        let end = self.instant(next, NaiveTime::MIN)?;
        Ok(Span::new(start, end))
    }

    /// Local `HH:MM` of an instant.
    pub fn label(&self, ms: Ms) -> String {
        self.local(ms)
            .map(|dt| dt.format("%H:%M").to_string())
            .unwrap_or_default()
    }

    /// Round up to the next local `:00` / `:30`. Exact boundaries are kept.
    pub fn round_up_to_slot(&self, ms: Ms) -> Ms {
        let offset = self
            .local(ms)
            .map(|dt| dt.offset().fix().local_minus_utc() as Ms * 1_000)
            .unwrap_or(0);
        let local = ms + offset;
        let rounded = local.div_euclid(SLOT_MS) * SLOT_MS;
        let rounded = if rounded < local { rounded + SLOT_MS } else { rounded };
        rounded - offset
    }

    /// Start and end must sit inside the working window of the start's local day.
    pub fn is_within_working_hours(&self, start: Ms, end: Ms) -> bool {
        let Some(date) = self.local_date(start) else {
            return false;
        };
        match self.day_window(date) {
            Ok(window) => start >= window.start && end <= window.end,
            Err(_) => false,
        }
    }
}

/// 0 = Sunday … 6 = Saturday.
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn parse_time(s: &str) -> Result<NaiveTime, CalendarError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| CalendarError::BadTime(s.to_string()))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, CalendarError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| CalendarError::BadDate(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    UnknownZone(String),
    BadTime(String),
    BadDate(String),
    EmptyWindow { open: NaiveTime, close: NaiveTime },
    Unrepresentable(NaiveDateTime),
    DateOutOfRange(NaiveDate),
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::UnknownZone(z) => write!(f, "unknown time zone: {z}"),
            CalendarError::BadTime(t) => write!(f, "invalid time (expected HH:MM): {t}"),
            CalendarError::BadDate(d) => write!(f, "invalid date (expected YYYY-MM-DD): {d}"),
            CalendarError::EmptyWindow { open, close } => {
                write!(f, "working window is empty: {open} >= {close}")
            }
            CalendarError::Unrepresentable(dt) => write!(f, "local time {dt} cannot be resolved"),
            CalendarError::DateOutOfRange(d) => write!(f, "date out of range: {d}"),
        }
    }
}

impl std::error::Error for CalendarError {}
