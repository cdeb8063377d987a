use ulid::Ulid;

use crate::calendar::CalendarError;

/// Why a candidate interval or pattern was refused before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Not a positive multiple of the slot size, or longer than the maximum.
    Duration { minutes: i64 },
    OutsideWorkingHours,
    /// Start (or first occurrence) is at or before now.
    InPast,
    /// Requested day lies before today.
    PastDate,
    EndBeforeStart,
    TimestampOutOfRange,
    BadField(&'static str, String),
    Calendar(CalendarError),
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::Duration { minutes } => write!(
                f,
                "duration {minutes} min must be a positive multiple of {} up to {}",
                crate::limits::SLOT_MINUTES,
                crate::limits::MAX_DURATION_MINUTES
            ),
            ValidationFailure::OutsideWorkingHours => write!(f, "outside working hours"),
            ValidationFailure::InPast => write!(f, "start is in the past"),
            ValidationFailure::PastDate => write!(f, "date is in the past"),
            ValidationFailure::EndBeforeStart => write!(f, "end must be after start"),
            ValidationFailure::TimestampOutOfRange => write!(f, "timestamp out of range"),
            ValidationFailure::BadField(field, msg) => write!(f, "{field}: {msg}"),
            ValidationFailure::Calendar(e) => write!(f, "{e}"),
        }
    }
}

impl From<CalendarError> for ValidationFailure {
    fn from(e: CalendarError) -> Self {
        ValidationFailure::Calendar(e)
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Room exists but is not `available` (or is soft-deleted for writes).
    RoomUnavailable(Ulid),
    Validation(ValidationFailure),
    /// A recurring pattern that expands to zero occurrences.
    InvalidPattern(String),
    /// Slot taken; carries the id of the first booking in the way, if any.
    Conflict(Option<Ulid>),
    NotOwner(Ulid),
    /// Edit or cancel attempted on a booking whose start has passed.
    NotInFuture(Ulid),
    CancellationWindowClosed { lead_time_hours: u32 },
    /// Room lock not obtained within the configured wait.
    LockTimeout(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Retryable by the caller. The engine itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::LockTimeout(_) | EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::RoomUnavailable(id) => write!(f, "room unavailable: {id}"),
            EngineError::Validation(v) => write!(f, "validation failed: {v}"),
            EngineError::InvalidPattern(msg) => write!(f, "invalid recurrence pattern: {msg}"),
            EngineError::Conflict(Some(id)) => {
                write!(f, "slot no longer available: conflicts with booking {id}")
            }
            EngineError::Conflict(None) => write!(f, "slot no longer available"),
            EngineError::NotOwner(id) => write!(f, "booking {id} belongs to another user"),
            EngineError::NotInFuture(id) => {
                write!(f, "booking {id} has already started")
            }
            EngineError::CancellationWindowClosed { lead_time_hours } => write!(
                f,
                "cancellation window closed: must cancel {lead_time_hours} hours before start"
            ),
            EngineError::LockTimeout(id) => write!(f, "lock wait timeout on room {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationFailure> for EngineError {
    fn from(v: ValidationFailure) -> Self {
        EngineError::Validation(v)
    }
}

impl From<CalendarError> for EngineError {
    fn from(e: CalendarError) -> Self {
        EngineError::Validation(ValidationFailure::Calendar(e))
    }
}
