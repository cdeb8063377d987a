use chrono::{Duration, NaiveDate, NaiveTime};

use crate::calendar::Calendar;
use crate::limits::*;
use crate::model::*;

use super::error::ValidationFailure;

/// `end > start`, whole minutes, a positive multiple of the slot size, at most
/// the maximum duration.
pub fn is_duration_valid(start: Ms, end: Ms) -> bool {
    let span_ms = end - start;
    if span_ms <= 0 || span_ms % MINUTE_MS != 0 {
        return false;
    }
    let minutes = span_ms / MINUTE_MS;
    minutes <= MAX_DURATION_MINUTES && minutes % SLOT_MINUTES == 0
}

pub fn is_within_working_hours(calendar: &Calendar, start: Ms, end: Ms) -> bool {
    calendar.is_within_working_hours(start, end)
}

/// Interval starting at local `date` `time` and lasting `minutes`.
pub fn local_span(
    calendar: &Calendar,
    date: NaiveDate,
    time: NaiveTime,
    minutes: i64,
) -> Result<Span, ValidationFailure> {
    let start = calendar.instant(date, time)?;
    minutes
        .checked_mul(MINUTE_MS)
        .and_then(|d| start.checked_add(d))
        .and_then(|end| Span::try_new(start, end))
        .ok_or(ValidationFailure::Duration { minutes })
}

/// Local end time of an occurrence starting at `start` and lasting `minutes`.
/// The length must be a valid booking length and the end may not pass
/// midnight.
pub fn daily_end(start: NaiveTime, minutes: i64) -> Result<NaiveTime, ValidationFailure> {
    validate_duration_minutes(minutes)?;
    let (end, wrapped) = Duration::try_minutes(minutes)
        .map(|d| start.overflowing_add_signed(d))
        .ok_or(ValidationFailure::Duration { minutes })?;
    if wrapped != 0 {
        return Err(ValidationFailure::OutsideWorkingHours);
    }
    Ok(end)
}

/// Duration and window checks shared by creation, reschedule and every
/// recurring occurrence.
pub(crate) fn validate_interval(calendar: &Calendar, span: &Span) -> Result<(), ValidationFailure> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(ValidationFailure::TimestampOutOfRange);
    }
    if !is_duration_valid(span.start, span.end) {
        return Err(ValidationFailure::Duration {
            minutes: span.duration_minutes(),
        });
    }
    if !is_within_working_hours(calendar, span.start, span.end) {
        return Err(ValidationFailure::OutsideWorkingHours);
    }
    Ok(())
}

/// Requested duration in minutes, as accepted by the slot generator.
pub(crate) fn validate_duration_minutes(minutes: i64) -> Result<(), ValidationFailure> {
    if minutes <= 0 || minutes > MAX_DURATION_MINUTES || minutes % SLOT_MINUTES != 0 {
        return Err(ValidationFailure::Duration { minutes });
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), ValidationFailure> {
    if name.trim().is_empty() {
        return Err(ValidationFailure::BadField("name", "must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationFailure::BadField(
            "name",
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}
