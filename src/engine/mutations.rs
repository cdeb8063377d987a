use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::check_no_conflict;
use super::error::ValidationFailure;
use super::validate::{validate_interval, validate_name};
use super::{share_token, Engine, EngineError, RoomTxn, WalCommand};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub recurring_reservation_id: Option<Ulid>,
}

/// Partial room update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomChanges {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub status: Option<RoomStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPolicy {
    pub id: Ulid,
    pub room_id: Ulid,
    pub name: String,
    pub lead_time_hours: u32,
    pub penalty: Penalty,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyChanges {
    pub name: Option<String>,
    pub lead_time_hours: Option<u32>,
    pub penalty: Option<Penalty>,
    pub active: Option<bool>,
}

fn validate_capacity(capacity: u32) -> Result<(), ValidationFailure> {
    if capacity == 0 || capacity > MAX_CAPACITY {
        return Err(ValidationFailure::BadField(
            "capacity",
            format!("must be between 1 and {MAX_CAPACITY}"),
        ));
    }
    Ok(())
}

fn validate_policy_terms(name: &str, lead_time_hours: u32, penalty: &Penalty) -> Result<(), ValidationFailure> {
    validate_name(name)?;
    if lead_time_hours > MAX_LEAD_TIME_HOURS {
        return Err(ValidationFailure::BadField(
            "lead_time_hours",
            format!("must be at most {MAX_LEAD_TIME_HOURS}"),
        ));
    }
    if let Penalty::Percent(v) = penalty
        && *v > MAX_PERCENT_PENALTY
    {
        return Err(ValidationFailure::BadField(
            "penalty_value",
            "percent penalty above 100".into(),
        ));
    }
    Ok(())
}

/// Live room or `NotFound`; soft-deleted rooms are invisible to writers.
fn live_room(txn: &RoomTxn) -> Result<(), EngineError> {
    if txn.room.is_deleted() {
        return Err(EngineError::NotFound(txn.room.id));
    }
    Ok(())
}

fn bookable_room(txn: &RoomTxn) -> Result<(), EngineError> {
    live_room(txn)?;
    if !txn.room.is_bookable() {
        return Err(EngineError::RoomUnavailable(txn.room.id));
    }
    Ok(())
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        status: RoomStatus,
    ) -> Result<Room, EngineError> {
        validate_name(&name)?;
        validate_capacity(capacity)?;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let _commit = self.commit_gate.read().await;

        let room = Room {
            id,
            name,
            capacity,
            status,
            record_status: RecordStatus::Active,
        };
        // Published locked: readers wait until the record is durable.
        let state = Arc::new(RwLock::new(RoomState::new(room.clone())));
        let mut guard = state.clone().write_owned().await;
        if !self.store.claim_room(id, state) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            guard.room.record_status = RecordStatus::Deleted;
            self.store.remove_room(&id);
            return Err(e);
        }
        drop(guard);
        info!("room {id} created");
        Ok(room)
    }

    pub async fn update_room(&self, id: Ulid, changes: RoomChanges) -> Result<Room, EngineError> {
        if let Some(name) = &changes.name {
            validate_name(name)?;
        }
        if let Some(capacity) = changes.capacity {
            validate_capacity(capacity)?;
        }
        let mut txn = self.lock_room(id).await?;
        live_room(&txn)?;

        let event = Event::RoomUpdated {
            id,
            name: changes.name.unwrap_or_else(|| txn.room.name.clone()),
            capacity: changes.capacity.unwrap_or(txn.room.capacity),
            status: changes.status.unwrap_or(txn.room.status),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        Ok(txn.room.clone())
    }

    /// Soft delete. Bookings stay on record; the room stops accepting work.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let mut txn = self.lock_room(id).await?;
        live_room(&txn)?;
        let event = Event::RoomDeleted { id };
        self.persist_and_apply(&mut txn, &event).await?;
        info!("room {id} deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Validate, then lock the room, re-check and insert.
    pub async fn create_one_time_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        validate_interval(&self.calendar, &req.span)?;
        if req.span.start <= self.now_ms() {
            return Err(ValidationFailure::InPast.into());
        }

        let mut txn = self.lock_room(req.room_id).await?;
        bookable_room(&txn)?;
        if let Some(rid) = req.recurring_reservation_id
            && txn.reservation(rid).is_none()
        {
            return Err(EngineError::NotFound(rid));
        }
        if txn.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        check_no_conflict(&txn, &req.span, None)?;

        let booking = Booking {
            id: req.id,
            user_id: req.user_id,
            room_id: req.room_id,
            span: req.span,
            recurring_reservation_id: req.recurring_reservation_id,
            share_token: share_token(16),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_new_entity(&mut txn, booking.id, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "kind" => "one_time")
            .increment(1);
        debug!("booking {} created on room {}", booking.id, booking.room_id);
        Ok(booking)
    }

    /// Move a future booking to a new interval, validated like a creation and
    /// checked against every booking but itself.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        user_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        validate_interval(&self.calendar, &span)?;
        let now = self.now_ms();
        if span.start <= now {
            return Err(ValidationFailure::InPast.into());
        }

        let mut txn = self.lock_entity_room(id).await?;
        let current = txn.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.user_id != user_id {
            return Err(EngineError::NotOwner(id));
        }
        if current.span.start <= now {
            return Err(EngineError::NotInFuture(id));
        }
        bookable_room(&txn)?;
        check_no_conflict(&txn, &span, Some(id))?;

        let event = Event::BookingRescheduled {
            id,
            room_id: current.room_id,
            span,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        Ok(Booking { span, ..current })
    }

    /// Owner-only cancellation of a future booking, honoring the room's
    /// active cancellation policy.
    pub async fn cancel_booking(&self, id: Ulid, user_id: Ulid) -> Result<Booking, EngineError> {
        let mut txn = self.lock_entity_room(id).await?;
        let booking = txn.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if booking.user_id != user_id {
            return Err(EngineError::NotOwner(id));
        }
        let now = self.now_ms();
        if booking.span.start <= now {
            return Err(EngineError::NotInFuture(id));
        }
        if let Some(policy) = txn.active_policy()
            && booking.span.start - now < policy.lead_time_hours as Ms * HOUR_MS
        {
            return Err(EngineError::CancellationWindowClosed {
                lead_time_hours: policy.lead_time_hours,
            });
        }

        let event = Event::BookingCancelled {
            id,
            room_id: booking.room_id,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        debug!("booking {id} cancelled");
        Ok(booking)
    }

    // ── Cancellation policies ────────────────────────────────

    pub async fn add_cancellation_policy(
        &self,
        req: NewPolicy,
    ) -> Result<CancellationPolicy, EngineError> {
        validate_policy_terms(&req.name, req.lead_time_hours, &req.penalty)?;
        let mut txn = self.lock_room(req.room_id).await?;
        live_room(&txn)?;
        if txn.policies.len() >= MAX_POLICIES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many policies on room"));
        }

        let policy = CancellationPolicy {
            id: req.id,
            room_id: req.room_id,
            name: req.name,
            lead_time_hours: req.lead_time_hours,
            penalty: req.penalty,
            active: req.active,
        };
        let event = Event::PolicyPut {
            policy: policy.clone(),
        };
        self.persist_new_entity(&mut txn, policy.id, &event).await?;
        Ok(policy)
    }

    /// Activating a policy deactivates the room's other policies in the same record.
    pub async fn update_cancellation_policy(
        &self,
        id: Ulid,
        changes: PolicyChanges,
    ) -> Result<CancellationPolicy, EngineError> {
        let mut txn = self.lock_entity_room(id).await?;
        let current = txn
            .policies
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let policy = CancellationPolicy {
            name: changes.name.unwrap_or(current.name),
            lead_time_hours: changes.lead_time_hours.unwrap_or(current.lead_time_hours),
            penalty: changes.penalty.unwrap_or(current.penalty),
            active: changes.active.unwrap_or(current.active),
            ..current
        };
        validate_policy_terms(&policy.name, policy.lead_time_hours, &policy.penalty)?;

        let event = Event::PolicyPut {
            policy: policy.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        Ok(policy)
    }

    pub async fn remove_cancellation_policy(&self, id: Ulid) -> Result<(), EngineError> {
        let mut txn = self.lock_entity_room(id).await?;
        if !txn.policies.iter().any(|p| p.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::PolicyRemoved {
            id,
            room_id: txn.room.id,
        };
        self.persist_and_apply(&mut txn, &event).await
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Mark active reservations whose last day is before today as ended.
    /// Returns how many were marked.
    pub async fn end_finished_reservations(&self) -> Result<usize, EngineError> {
        let Some(today) = self.calendar.local_date(self.now_ms()) else {
            return Ok(0);
        };
        let finished = |r: &RecurringReservation| {
            r.status == ReservationStatus::Active && r.end_date < today
        };

        let mut ended = 0;
        for room_id in self.store.room_ids() {
            let candidates = {
                let guard = self.read_room(room_id).await?;
                guard.reservations.iter().any(&finished)
            };
            if !candidates {
                continue;
            }
            let mut txn = self.lock_room(room_id).await?;
            let ids: Vec<Ulid> = txn
                .reservations
                .iter()
                .filter(|r| finished(r))
                .map(|r| r.id)
                .collect();
            for id in ids {
                let event = Event::RecurringReservationEnded { id, room_id };
                self.persist_and_apply(&mut txn, &event).await?;
                ended += 1;
            }
        }
        Ok(ended)
    }

    /// Rewrite the WAL with the minimal events that rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no writer sits between append and apply.
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for room_id in self.store.room_ids() {
            let guard = self.read_room(room_id).await?;
            emit_room(&guard, &mut events);
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Events that recreate one room exactly as it is now.
fn emit_room(rs: &RoomState, events: &mut Vec<Event>) {
    let mut room = rs.room.clone();
    let deleted = room.is_deleted();
    room.record_status = RecordStatus::Active;
    events.push(Event::RoomCreated { room });

    for policy in &rs.policies {
        events.push(Event::PolicyPut {
            policy: policy.clone(),
        });
    }

    for reservation in &rs.reservations {
        let bookings = rs
            .bookings
            .iter()
            .filter(|b| b.recurring_reservation_id == Some(reservation.id))
            .cloned()
            .collect();
        events.push(Event::RecurringReservationCreated {
            reservation: reservation.clone(),
            bookings,
        });
    }

    for booking in &rs.bookings {
        let owned_by_header = booking
            .recurring_reservation_id
            .is_some_and(|rid| rs.reservation(rid).is_some());
        if !owned_by_header {
            events.push(Event::BookingCreated {
                booking: booking.clone(),
            });
        }
    }

    if deleted {
        events.push(Event::RoomDeleted { id: rs.room.id });
    }
}
