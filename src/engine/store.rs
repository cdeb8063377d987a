use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::SharedRoomState;

/// In-memory tables: one lockable state per room plus a reverse index from
/// every booking, reservation and policy id to the room that owns it.
pub struct Store {
    rooms: DashMap<Ulid, SharedRoomState>,
    entity_to_room: DashMap<Ulid, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            entity_to_room: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    /// Includes soft-deleted rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn insert_room(&self, id: Ulid, state: SharedRoomState) {
        self.rooms.insert(id, state);
    }

    /// Insert only if `id` is unused. Returns false when the id is taken.
    pub fn claim_room(&self, id: Ulid, state: SharedRoomState) -> bool {
        match self.rooms.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    pub fn remove_room(&self, id: &Ulid) {
        self.rooms.remove(id);
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    pub fn contains_entity(&self, entity_id: &Ulid) -> bool {
        self.entity_to_room.contains_key(entity_id)
    }

    /// Reserve a booking, reservation or policy id for `room_id` ahead of its
    /// WAL append. Returns false when the id is already in use.
    pub fn claim_entity(&self, entity_id: Ulid, room_id: Ulid) -> bool {
        match self.entity_to_room.entry(entity_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                true
            }
        }
    }

    pub fn release_entity(&self, entity_id: &Ulid) {
        self.entity_to_room.remove(entity_id);
    }

    fn map_entity(&self, entity_id: Ulid, room_id: Ulid) {
        self.entity_to_room.insert(entity_id, room_id);
    }

    fn unmap_entity(&self, entity_id: &Ulid) {
        self.entity_to_room.remove(entity_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event to its room. Caller holds the room's write lock.
    /// `RoomCreated` is handled by the engine since it creates the lock itself.
    pub fn apply_event(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated {
                name,
                capacity,
                status,
                ..
            } => {
                rs.room.name = name.clone();
                rs.room.capacity = *capacity;
                rs.room.status = *status;
            }
            Event::RoomDeleted { .. } => {
                rs.room.record_status = RecordStatus::Deleted;
            }
            Event::BookingCreated { booking } => {
                self.map_entity(booking.id, booking.room_id);
                rs.insert_booking(booking.clone());
            }
            Event::BookingRescheduled { id, span, .. } => {
                if let Some(mut booking) = rs.remove_booking(*id) {
                    booking.span = *span;
                    rs.insert_booking(booking);
                }
            }
            Event::BookingCancelled { id, .. } => {
                rs.remove_booking(*id);
                self.unmap_entity(id);
            }
            Event::RecurringReservationCreated {
                reservation,
                bookings,
            } => {
                self.map_entity(reservation.id, reservation.room_id);
                rs.reservations.push(reservation.clone());
                for booking in bookings {
                    self.map_entity(booking.id, booking.room_id);
                    rs.insert_booking(booking.clone());
                }
            }
            Event::RecurringReservationEnded { id, .. } => {
                if let Some(r) = rs.reservations.iter_mut().find(|r| r.id == *id) {
                    r.status = ReservationStatus::Ended;
                }
            }
            Event::PolicyPut { policy } => {
                self.map_entity(policy.id, policy.room_id);
                rs.put_policy(policy.clone());
            }
            Event::PolicyRemoved { id, .. } => {
                rs.remove_policy(*id);
                self.unmap_entity(id);
            }
            Event::RoomCreated { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            name: "Aula 1".into(),
            capacity: 10,
            status: RoomStatus::Available,
            record_status: RecordStatus::Active,
        })
    }

    fn booking_for(rs: &RoomState, start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            room_id: rs.room.id,
            span: Span::new(start, end),
            recurring_reservation_id: None,
            share_token: "t".into(),
        }
    }

    #[test]
    fn booking_lifecycle_updates_index() {
        let store = Store::new();
        let mut rs = room_state();
        let room_id = rs.room.id;
        let b = booking_for(&rs, 100, 200);
        let id = b.id;

        store.apply_event(&mut rs, &Event::BookingCreated { booking: b });
        assert_eq!(store.room_for_entity(&id), Some(room_id));

        store.apply_event(
            &mut rs,
            &Event::BookingRescheduled {
                id,
                room_id,
                span: Span::new(300, 400),
            },
        );
        assert_eq!(rs.booking(id).map(|b| b.span), Some(Span::new(300, 400)));

        store.apply_event(&mut rs, &Event::BookingCancelled { id, room_id });
        assert!(rs.bookings.is_empty());
        assert!(!store.contains_entity(&id));
    }

    #[test]
    fn soft_delete_keeps_bookings() {
        let store = Store::new();
        let mut rs = room_state();
        let room_id = rs.room.id;
        let b = booking_for(&rs, 100, 200);
        store.apply_event(&mut rs, &Event::BookingCreated { booking: b });
        store.apply_event(&mut rs, &Event::RoomDeleted { id: room_id });
        assert!(rs.room.is_deleted());
        assert_eq!(rs.bookings.len(), 1);
    }

    #[test]
    fn claims_are_exclusive() {
        let store = Store::new();
        let room_id = Ulid::new();
        let id = Ulid::new();
        assert!(store.claim_entity(id, room_id));
        assert!(!store.claim_entity(id, Ulid::new()));
        assert_eq!(store.room_for_entity(&id), Some(room_id));
        store.release_entity(&id);
        assert!(store.claim_entity(id, room_id));

        let state = |rs: RoomState| std::sync::Arc::new(tokio::sync::RwLock::new(rs));
        assert!(store.claim_room(room_id, state(room_state())));
        assert!(!store.claim_room(room_id, state(room_state())));
        store.remove_room(&room_id);
        assert!(!store.contains_room(&room_id));
    }
}
