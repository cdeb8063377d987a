use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomslot_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomslot_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomslot_wal_flush_batch_size";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: bookings written. Labels: kind (one_time, recurring).
pub const BOOKINGS_CREATED_TOTAL: &str = "roomslot_bookings_created_total";

/// Counter: writes refused because the slot was taken.
pub const CONFLICTS_TOTAL: &str = "roomslot_conflicts_total";

/// Counter: room lock waits that hit the timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "roomslot_lock_timeouts_total";

/// Counter: recurring reservations marked ended by the sweeper.
pub const RESERVATIONS_ENDED_TOTAL: &str = "roomslot_reservations_ended_total";

/// Counter: audit lines that could not be written.
pub const AUDIT_FAILURES_TOTAL: &str = "roomslot_audit_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertRecurringReservation { .. } => "insert_recurring_reservation",
        Command::InsertPolicy { .. } => "insert_policy",
        Command::UpdatePolicy { .. } => "update_policy",
        Command::DeletePolicy { .. } => "delete_policy",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectRecurringReservations { .. } => "select_recurring_reservations",
        Command::SelectPolicies { .. } => "select_policies",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookingExport { .. } => "select_booking_export",
    }
}
