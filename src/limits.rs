use crate::model::{Ms, MINUTE_MS};

/// Base quantum for durations and slot starts.
pub const SLOT_MINUTES: i64 = 30;
pub const SLOT_MS: Ms = SLOT_MINUTES * MINUTE_MS;

/// Longest bookable interval.
pub const MAX_DURATION_MINUTES: i64 = 120;

/// Upper bound on occurrences produced by one recurring pattern.
pub const MAX_OCCURRENCES: usize = 90;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
pub const MAX_POLICIES_PER_ROOM: usize = 64;

pub const MAX_NAME_LEN: usize = 191;
pub const MAX_CAPACITY: u32 = 10_000;
pub const MAX_LEAD_TIME_HOURS: u32 = 8_760;

/// Percent penalties are hundredths of a percent, capped at 100.00.
pub const MAX_PERCENT_PENALTY: u32 = 10_000;

/// 2000-01-01T00:00:00Z and 2100-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest `start_date..end_date` accepted for a recurring pattern.
pub const MAX_RECURRENCE_RANGE_DAYS: i64 = 3_660;
