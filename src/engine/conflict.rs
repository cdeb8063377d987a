use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// First live booking overlapping `span`, skipping `exclude`.
pub(crate) fn first_overlap(rs: &RoomState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    rs.overlapping(span)
        .filter(|b| Some(b.id) != exclude)
        .find(|b| overlaps(b.span.start, b.span.end, span.start, span.end))
        .map(|b| b.id)
}

/// Re-check run under the room's write lock before any booking is written.
///
/// The overlap scan is the guarantee. The exact-slot lookup mirrors the
/// uniqueness constraint on `(room, start, end)` and can only fire if the
/// scan were bypassed.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if let Some(id) = first_overlap(rs, span, exclude) {
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(Some(id)));
    }
    if let Some(dup) = exact_duplicate(rs, span, exclude) {
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(Some(dup)));
    }
    Ok(())
}

fn exact_duplicate(rs: &RoomState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    let from = rs.bookings.partition_point(|b| b.span.start < span.start);
    rs.bookings[from..]
        .iter()
        .take_while(|b| b.span.start == span.start)
        .find(|b| b.span.end == span.end && Some(b.id) != exclude)
        .map(|b| b.id)
}

/// Spans within one batch must not overlap each other either.
pub(crate) fn check_batch_disjoint(spans: &[Span]) -> Result<(), EngineError> {
    let mut sorted: Vec<Span> = spans.to_vec();
    sorted.sort_by_key(|s| s.start);
    for pair in sorted.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(EngineError::Conflict(None));
        }
    }
    Ok(())
}
