use ulid::Ulid;

use crate::model::*;

use super::conflict::first_overlap;
use super::validate::is_duration_valid;
use super::{Engine, EngineError, ValidationFailure};

/// Soft-deleted rooms are `NotFound`; live rooms that are not `available`
/// are `RoomUnavailable`.
pub(super) fn open_for_booking(room: &Room) -> Result<(), EngineError> {
    if room.is_deleted() {
        return Err(EngineError::NotFound(room.id));
    }
    if !room.is_bookable() {
        return Err(EngineError::RoomUnavailable(room.id));
    }
    Ok(())
}

fn name_matches(room: &Room, needle: Option<&str>) -> bool {
    match needle {
        Some(q) if !q.is_empty() => room.name.to_lowercase().contains(&q.to_lowercase()),
        _ => true,
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    /// Live room by id. Soft-deleted rooms are `NotFound`.
    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let guard = self.read_room(id).await?;
        if guard.room.is_deleted() {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard.room.clone())
    }

    /// Every live room, optionally filtered by a case-insensitive name
    /// substring, ordered by name.
    pub async fn list_rooms(&self, name_filter: Option<&str>) -> Result<Vec<Room>, EngineError> {
        let mut rooms = Vec::new();
        for id in self.store.room_ids() {
            let guard = self.read_room(id).await?;
            if !guard.room.is_deleted() && name_matches(&guard.room, name_filter) {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    /// Live rooms open for booking.
    pub async fn list_public_rooms(&self, name_filter: Option<&str>) -> Result<Vec<Room>, EngineError> {
        let mut rooms = self.list_rooms(name_filter).await?;
        rooms.retain(|r| r.status == RoomStatus::Available);
        Ok(rooms)
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = self.read_room(room_id).await?;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Bookings of a room in start order, including soft-deleted rooms.
    pub async fn bookings_for_room(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let guard = self.read_room(room_id).await?;
        Ok(guard.bookings.clone())
    }

    pub async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let mut out = Vec::new();
        for room_id in self.store.room_ids() {
            let guard = self.read_room(room_id).await?;
            out.extend(guard.bookings.iter().filter(|b| b.user_id == user_id).cloned());
        }
        out.sort_by_key(|b| (b.span.start, b.id));
        Ok(out)
    }

    pub async fn bookings_for_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        let room_id = self
            .store
            .room_for_entity(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = self.read_room(room_id).await?;
        Ok(guard
            .bookings
            .iter()
            .filter(|b| b.recurring_reservation_id == Some(reservation_id))
            .cloned()
            .collect())
    }

    /// Overlap test against current state, no lock held afterwards. Refuses
    /// the same rooms and lengths the slot generator refuses.
    pub async fn is_available(
        &self,
        room_id: Ulid,
        span: Span,
        ignore_booking: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        if !is_duration_valid(span.start, span.end) {
            return Err(ValidationFailure::Duration {
                minutes: span.duration_minutes(),
            }
            .into());
        }
        let guard = self.read_room(room_id).await?;
        open_for_booking(&guard.room)?;
        Ok(first_overlap(&guard, &span, ignore_booking).is_none())
    }

    // ── Recurring reservations ───────────────────────────────

    pub async fn get_recurring_reservation(
        &self,
        id: Ulid,
    ) -> Result<RecurringReservation, EngineError> {
        let room_id = self
            .store
            .room_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = self.read_room(room_id).await?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn recurring_reservations_for_room(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<RecurringReservation>, EngineError> {
        let guard = self.read_room(room_id).await?;
        Ok(guard.reservations.clone())
    }

    // ── Cancellation policies ────────────────────────────────

    pub async fn cancellation_policies(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<CancellationPolicy>, EngineError> {
        let guard = self.read_room(room_id).await?;
        Ok(guard.policies.clone())
    }

    pub async fn active_cancellation_policy(
        &self,
        room_id: Ulid,
    ) -> Result<Option<CancellationPolicy>, EngineError> {
        let guard = self.read_room(room_id).await?;
        Ok(guard.active_policy().cloned())
    }
}
