use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::limits::SLOT_MS;
use crate::model::*;

use super::queries::open_for_booking;
use super::validate::validate_duration_minutes;
use super::{Engine, EngineError};

/// Free start positions of `duration_ms` inside `window`, stepping one slot at
/// a time from `earliest`. A candidate is emitted only if it overlaps none of
/// `busy`.
pub fn generate_slots(
    calendar: &Calendar,
    window: Span,
    earliest: Ms,
    duration_ms: Ms,
    busy: &[Span],
) -> Vec<Slot> {
    let mut slots = Vec::new();
    if duration_ms <= 0 {
        return slots;
    }
    let mut cursor = earliest.max(window.start);
    while cursor + duration_ms <= window.end {
        let end = cursor + duration_ms;
        let free = !busy.iter().any(|b| overlaps(cursor, end, b.start, b.end));
        if free {
            slots.push(Slot {
                start: cursor,
                end,
                label: calendar.label(cursor),
            });
        }
        cursor += SLOT_MS;
    }
    slots
}

impl Engine {
    /// Slots of `duration_minutes` still bookable in `room_id` on local `date`.
    ///
    /// Past days yield nothing. On the current day the first candidate is now
    /// rounded up to the next slot boundary. `exclude_booking` is ignored as an
    /// obstacle so an edited booking does not block itself.
    pub async fn available_slots(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        duration_minutes: i64,
        exclude_booking: Option<Ulid>,
    ) -> Result<Vec<Slot>, EngineError> {
        validate_duration_minutes(duration_minutes)?;

        let now = self.now_ms();
        let today = self
            .calendar
            .local_date(now)
            .ok_or(EngineError::LimitExceeded("clock out of range"))?;

        let guard = self.read_room(room_id).await?;
        open_for_booking(&guard.room)?;
        if date < today {
            return Ok(Vec::new());
        }

        let window = self.calendar.day_window(date)?;
        let earliest = if date == today {
            self.calendar.round_up_to_slot(now).max(window.start)
        } else {
            window.start
        };

        let day = self.calendar.day_bounds(date)?;
        let scan = Span::new(day.start.min(window.start), day.end.max(window.end));
        let busy: Vec<Span> = guard
            .overlapping(&scan)
            .filter(|b| Some(b.id) != exclude_booking)
            .map(|b| b.span)
            .collect();
        drop(guard);

        Ok(generate_slots(
            &self.calendar,
            window,
            earliest,
            duration_minutes * MINUTE_MS,
            &busy,
        ))
    }
}
