use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open overlap test: `[a_start, a_end)` and `[b_start, b_end)` share an instant.
/// Touching endpoints do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for user-supplied bounds.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_ms() / MINUTE_MS
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Unavailable,
    ComingSoon,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Unavailable => "unavailable",
            RoomStatus::ComingSoon => "coming_soon",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Some(RoomStatus::Available),
            "unavailable" => Some(RoomStatus::Unavailable),
            "coming_soon" | "coming-soon" => Some(RoomStatus::ComingSoon),
            _ => None,
        }
    }
}

/// Soft-delete marker. Rooms are never removed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub status: RoomStatus,
    pub record_status: RecordStatus,
}

impl Room {
    pub fn is_deleted(&self) -> bool {
        self.record_status == RecordStatus::Deleted
    }

    /// Only live, available rooms take bookings and slot queries.
    pub fn is_bookable(&self) -> bool {
        !self.is_deleted() && self.status == RoomStatus::Available
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub recurring_reservation_id: Option<Ulid>,
    pub share_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceType {
    Weekly,
    CustomDays,
}

impl RecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceType::Weekly => "weekly",
            RecurrenceType::CustomDays => "custom_days",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "weekly" => Some(RecurrenceType::Weekly),
            "custom_days" | "custom" => Some(RecurrenceType::CustomDays),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Ended,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Ended => "ended",
        }
    }
}

/// Header of a weekly pattern. Weekdays use 0 = Sunday … 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringReservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    pub recurrence_type: RecurrenceType,
    pub weekdays: Vec<u8>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub daily_start: NaiveTime,
    pub daily_end: NaiveTime,
    pub timezone: String,
    pub status: ReservationStatus,
    pub share_token: String,
}

// ── Cancellation policies ────────────────────────────────────────

/// Penalty amounts are fixed-point hundredths (`1250` = 12.50).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Penalty {
    None,
    Percent(u32),
    Flat(u32),
}

impl Penalty {
    pub fn kind(&self) -> &'static str {
        match self {
            Penalty::None => "none",
            Penalty::Percent(_) => "percent",
            Penalty::Flat(_) => "flat",
        }
    }

    pub fn value(&self) -> Option<u32> {
        match self {
            Penalty::None => None,
            Penalty::Percent(v) | Penalty::Flat(v) => Some(*v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub id: Ulid,
    pub room_id: Ulid,
    pub name: String,
    pub lead_time_hours: u32,
    pub penalty: Penalty,
    pub active: bool,
}

// ── Per-room state ───────────────────────────────────────────────

/// Everything the store keeps for one room. A room write lock guards
/// all of its bookings, reservations and policies together.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Live bookings, sorted by `span.start`.
    pub bookings: Vec<Booking>,
    pub reservations: Vec<RecurringReservation>,
    /// Insertion order; the last active entry is the room's policy.
    pub policies: Vec<CancellationPolicy>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            reservations: Vec::new(),
            policies: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose span intersects the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn reservation(&self, id: Ulid) -> Option<&RecurringReservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn active_policy(&self) -> Option<&CancellationPolicy> {
        self.policies.iter().rev().find(|p| p.active)
    }

    /// Insert or replace a policy. An active policy deactivates its siblings.
    pub fn put_policy(&mut self, policy: CancellationPolicy) {
        if policy.active {
            for p in self.policies.iter_mut() {
                p.active = false;
            }
        }
        match self.policies.iter_mut().find(|p| p.id == policy.id) {
            Some(slot) => *slot = policy,
            None => self.policies.push(policy),
        }
    }

    pub fn remove_policy(&mut self, id: Ulid) -> Option<CancellationPolicy> {
        let pos = self.policies.iter().position(|p| p.id == id)?;
        Some(self.policies.remove(pos))
    }
}

/// WAL record format. One event = one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        status: RoomStatus,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    /// The header and every occurrence commit together or not at all.
    RecurringReservationCreated {
        reservation: RecurringReservation,
        bookings: Vec<Booking>,
    },
    RecurringReservationEnded {
        id: Ulid,
        room_id: Ulid,
    },
    PolicyPut {
        policy: CancellationPolicy,
    },
    PolicyRemoved {
        id: Ulid,
        room_id: Ulid,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::RoomUpdated { id, .. } | Event::RoomDeleted { id } => *id,
            Event::BookingCreated { booking } => booking.room_id,
            Event::RecurringReservationCreated { reservation, .. } => reservation.room_id,
            Event::PolicyPut { policy } => policy.room_id,
            Event::BookingRescheduled { room_id, .. }
            | Event::BookingCancelled { room_id, .. }
            | Event::RecurringReservationEnded { room_id, .. }
            | Event::PolicyRemoved { room_id, .. } => *room_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A free start position returned by the slot generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start: Ms,
    pub end: Ms,
    /// Local `HH:MM` of `start`.
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room {
            id: Ulid::new(),
            name: "Sala A".into(),
            capacity: 4,
            status: RoomStatus::Available,
            record_status: RecordStatus::Active,
        }
    }

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            room_id: Ulid::new(),
            span: Span::new(start, end),
            recurring_reservation_id: None,
            share_token: String::new(),
        }
    }

    fn policy(room_id: Ulid, active: bool) -> CancellationPolicy {
        CancellationPolicy {
            id: Ulid::new(),
            room_id,
            name: "24h".into(),
            lead_time_hours: 24,
            penalty: Penalty::None,
            active,
        }
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(overlaps(100, 200, 150, 250));
        assert!(!overlaps(100, 200, 200, 300)); // touching
        assert!(!overlaps(200, 300, 100, 200));
        assert!(overlaps(100, 300, 150, 200)); // containment
    }

    #[test]
    fn overlap_is_symmetric() {
        let cases = [
            (0, 10, 5, 15),
            (0, 10, 10, 20),
            (0, 10, 20, 30),
            (0, 30, 10, 20),
            (5, 6, 0, 100),
        ];
        for (a0, a1, b0, b1) in cases {
            assert_eq!(overlaps(a0, a1, b0, b1), overlaps(b0, b1, a0, a1));
        }
    }

    #[test]
    fn non_empty_span_overlaps_itself() {
        let s = Span::new(100, 101);
        assert!(s.overlaps(&s));
    }

    #[test]
    fn try_new_rejects_empty_and_reversed() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 200), Some(Span::new(100, 200)));
    }

    #[test]
    fn span_minutes() {
        let s = Span::new(0, 90 * MINUTE_MS);
        assert_eq!(s.duration_minutes(), 90);
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(300, 400));
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(200, 300));
        let starts: Vec<Ms> = rs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_far() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(450, 600));
        rs.insert_booking(booking(1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(200, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_long_booking_spanning_query() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(0, 10_000));
        assert_eq!(rs.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn remove_missing_booking_is_none() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(100, 200));
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 1);
    }

    #[test]
    fn activating_policy_deactivates_siblings() {
        let mut rs = RoomState::new(room());
        let rid = rs.room.id;
        let first = policy(rid, true);
        let first_id = first.id;
        rs.put_policy(first);
        let second = policy(rid, true);
        let second_id = second.id;
        rs.put_policy(second);

        assert_eq!(rs.policies.iter().filter(|p| p.active).count(), 1);
        assert_eq!(rs.active_policy().map(|p| p.id), Some(second_id));

        // Reactivating the first one flips it back.
        let mut again = rs.policies[0].clone();
        assert_eq!(again.id, first_id);
        again.active = true;
        rs.put_policy(again);
        assert_eq!(rs.active_policy().map(|p| p.id), Some(first_id));
        assert_eq!(rs.policies.len(), 2);
    }

    #[test]
    fn inactive_policy_leaves_siblings_alone() {
        let mut rs = RoomState::new(room());
        let rid = rs.room.id;
        let active = policy(rid, true);
        let active_id = active.id;
        rs.put_policy(active);
        rs.put_policy(policy(rid, false));
        assert_eq!(rs.active_policy().map(|p| p.id), Some(active_id));
    }

    #[test]
    fn bookable_requires_available_and_live() {
        let mut r = room();
        assert!(r.is_bookable());
        r.status = RoomStatus::ComingSoon;
        assert!(!r.is_bookable());
        r.status = RoomStatus::Available;
        r.record_status = RecordStatus::Deleted;
        assert!(!r.is_bookable());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let r = room();
        let event = Event::RecurringReservationCreated {
            reservation: RecurringReservation {
                id: Ulid::new(),
                user_id: Ulid::new(),
                room_id: r.id,
                recurrence_type: RecurrenceType::Weekly,
                weekdays: vec![1, 3],
                start_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
                daily_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                daily_end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                timezone: "UTC".into(),
                status: ReservationStatus::Active,
                share_token: "abc".into(),
            },
            bookings: vec![booking(100, 200)],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.room_id(), r.id);
    }

    #[test]
    fn status_names_parse_back() {
        for s in [RoomStatus::Available, RoomStatus::Unavailable, RoomStatus::ComingSoon] {
            assert_eq!(RoomStatus::parse(s.as_str()), Some(s));
        }
        for t in [RecurrenceType::Weekly, RecurrenceType::CustomDays] {
            assert_eq!(RecurrenceType::parse(t.as_str()), Some(t));
        }
        assert_eq!(RoomStatus::parse("closed"), None);
        assert_eq!(ReservationStatus::Active.as_str(), "active");
        assert_eq!(ReservationStatus::Ended.as_str(), "ended");
    }
}
