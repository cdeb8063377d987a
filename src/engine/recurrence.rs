use chrono::{NaiveDate, NaiveTime};
use tracing::info;
use ulid::Ulid;

use crate::calendar::{weekday_number, Calendar, CalendarError};
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_batch_disjoint, check_no_conflict};
use super::error::ValidationFailure;
use super::validate::validate_interval;
use super::{share_token, Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewRecurringReservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    pub recurrence_type: RecurrenceType,
    /// 0 = Sunday … 6 = Saturday. Out-of-range values are dropped.
    pub weekdays: Vec<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub daily_start: NaiveTime,
    pub daily_end: NaiveTime,
}

/// Sorted, de-duplicated weekdays in `0..=6`.
pub fn normalize_weekdays(weekdays: &[i64]) -> Vec<u8> {
    let mut days: Vec<u8> = weekdays
        .iter()
        .filter(|d| (0..=6).contains(*d))
        .map(|d| *d as u8)
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

/// Expand a weekly pattern into `(start, end)` instants, walking
/// `start_date..=end_date` and stopping at `MAX_OCCURRENCES`.
///
/// Pairs are returned as computed; an end at or before its start is left for
/// the caller's validation to reject.
pub fn build_occurrences(
    calendar: &Calendar,
    weekdays: &[i64],
    start_date: NaiveDate,
    end_date: NaiveDate,
    daily_start: NaiveTime,
    daily_end: NaiveTime,
) -> Result<Vec<(Ms, Ms)>, CalendarError> {
    let days = normalize_weekdays(weekdays);
    let mut occurrences = Vec::new();
    if days.is_empty() {
        return Ok(occurrences);
    }

    for day in start_date.iter_days().take_while(|d| *d <= end_date) {
        if !days.contains(&weekday_number(day)) {
            continue;
        }
        let start = calendar.instant(day, daily_start)?;
        let end = calendar.instant(day, daily_end)?;
        occurrences.push((start, end));
        if occurrences.len() >= MAX_OCCURRENCES {
            break;
        }
    }
    Ok(occurrences)
}

impl Engine {
    /// Create the reservation header and one booking per occurrence, all or
    /// nothing. Every occurrence is validated before the room lock is taken;
    /// conflicts are detected under it. Header and bookings go to the log as
    /// a single record. Returns the header with its occurrence bookings in
    /// start order.
    pub async fn create_recurring_reservation(
        &self,
        req: NewRecurringReservation,
    ) -> Result<(RecurringReservation, Vec<Booking>), EngineError> {
        if req.end_date < req.start_date {
            return Err(ValidationFailure::BadField(
                "end_date",
                "must be on or after start_date".into(),
            )
            .into());
        }
        if (req.end_date - req.start_date).num_days() > MAX_RECURRENCE_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("recurrence date range too wide"));
        }

        let now = self.now_ms();
        let today = self
            .calendar
            .local_date(now)
            .ok_or(EngineError::LimitExceeded("clock out of range"))?;
        if req.start_date < today {
            return Err(ValidationFailure::PastDate.into());
        }

        let occurrences = build_occurrences(
            &self.calendar,
            &req.weekdays,
            req.start_date,
            req.end_date,
            req.daily_start,
            req.daily_end,
        )?;
        if occurrences.is_empty() {
            return Err(EngineError::InvalidPattern(
                "no occurrences generated for the selected pattern".into(),
            ));
        }

        let mut spans = Vec::with_capacity(occurrences.len());
        for (start, end) in occurrences {
            let span = Span::try_new(start, end).ok_or(ValidationFailure::EndBeforeStart)?;
            validate_interval(&self.calendar, &span)?;
            spans.push(span);
        }
        if spans.iter().any(|s| s.start <= now) {
            return Err(ValidationFailure::InPast.into());
        }
        check_batch_disjoint(&spans)?;

        let mut txn = self.lock_room(req.room_id).await?;
        if txn.room.is_deleted() {
            return Err(EngineError::NotFound(req.room_id));
        }
        if !txn.room.is_bookable() {
            return Err(EngineError::RoomUnavailable(req.room_id));
        }
        if txn.bookings.len() + spans.len() > MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        for span in &spans {
            check_no_conflict(&txn, span, None)?;
        }

        let reservation = RecurringReservation {
            id: req.id,
            user_id: req.user_id,
            room_id: req.room_id,
            recurrence_type: req.recurrence_type,
            weekdays: normalize_weekdays(&req.weekdays),
            start_date: req.start_date,
            end_date: req.end_date,
            daily_start: req.daily_start,
            daily_end: req.daily_end,
            timezone: self.calendar.zone_name().to_string(),
            status: ReservationStatus::Active,
            share_token: share_token(20),
        };
        let bookings: Vec<Booking> = spans
            .iter()
            .map(|span| Booking {
                id: Ulid::new(),
                user_id: req.user_id,
                room_id: req.room_id,
                span: *span,
                recurring_reservation_id: Some(req.id),
                share_token: share_token(16),
            })
            .collect();
        let count = bookings.len();

        let event = Event::RecurringReservationCreated {
            reservation: reservation.clone(),
            bookings: bookings.clone(),
        };
        self.persist_new_entity(&mut txn, reservation.id, &event).await?;

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "kind" => "recurring")
            .increment(count as u64);
        info!(
            "recurring reservation {} created on room {} with {count} occurrences",
            reservation.id, reservation.room_id
        );
        Ok((reservation, bookings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn weekdays_normalized() {
        assert_eq!(normalize_weekdays(&[3, 1, 3, 7, -1, 0]), vec![0, 1, 3]);
        assert!(normalize_weekdays(&[9]).is_empty());
    }

    #[test]
    fn monday_wednesday_occurrences() {
        let cal = Calendar::utc_default();
        let occ = build_occurrences(
            &cal,
            &[1, 3],
            date(2026, 1, 10),
            date(2026, 1, 20),
            time(9, 0),
            time(10, 0),
        )
        .unwrap();
        // Mon 12, Wed 14, Mon 19.
        assert_eq!(occ.len(), 3);
        for (start, end) in &occ {
            let day = cal.local_date(*start).unwrap();
            assert!(matches!(weekday_number(day), 1 | 3));
            assert_eq!(cal.label(*start), "09:00");
            assert_eq!(cal.label(*end), "10:00");
            assert_eq!(end - start, HOUR_MS);
        }
        assert_eq!(cal.local_date(occ[0].0), Some(date(2026, 1, 12)));
        assert_eq!(cal.local_date(occ[2].0), Some(date(2026, 1, 19)));
    }

    #[test]
    fn range_is_inclusive() {
        let cal = Calendar::utc_default();
        // Both ends are Saturdays.
        let occ = build_occurrences(
            &cal,
            &[6],
            date(2026, 1, 10),
            date(2026, 1, 17),
            time(10, 0),
            time(11, 0),
        )
        .unwrap();
        assert_eq!(occ.len(), 2);
    }

    #[test]
    fn capped_at_max_occurrences() {
        let cal = Calendar::utc_default();
        let occ = build_occurrences(
            &cal,
            &[0, 1, 2, 3, 4, 5, 6],
            date(2026, 1, 1),
            date(2026, 12, 31),
            time(9, 0),
            time(10, 0),
        )
        .unwrap();
        assert_eq!(occ.len(), MAX_OCCURRENCES);
    }

    #[test]
    fn no_matching_weekday_is_empty() {
        let cal = Calendar::utc_default();
        // Tue 13 .. Thu 15 never hits a Saturday.
        let occ = build_occurrences(
            &cal,
            &[6],
            date(2026, 1, 13),
            date(2026, 1, 15),
            time(9, 0),
            time(10, 0),
        )
        .unwrap();
        assert!(occ.is_empty());
        let none = build_occurrences(
            &cal,
            &[],
            date(2026, 1, 1),
            date(2026, 2, 1),
            time(9, 0),
            time(10, 0),
        )
        .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn occurrences_follow_local_zone_across_dst() {
        let cal = Calendar::parse("Europe/Rome", "08:00", "20:00").unwrap();
        // Saturdays either side of the 2026-03-29 switch.
        let occ = build_occurrences(
            &cal,
            &[6],
            date(2026, 3, 21),
            date(2026, 4, 4),
            time(9, 0),
            time(10, 0),
        )
        .unwrap();
        assert_eq!(occ.len(), 3);
        for (start, _) in &occ {
            assert_eq!(cal.label(*start), "09:00");
        }
        // 09:00 CET is 08:00Z, 09:00 CEST is 07:00Z.
        assert_eq!(occ[1].0 - occ[0].0, 7 * 24 * HOUR_MS);
        assert_eq!(occ[2].0 - occ[1].0, 7 * 24 * HOUR_MS - HOUR_MS);
    }
}
