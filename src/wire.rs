use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use serde::Serialize;
use serde_json::Value as Json;
use tokio::net::TcpStream;

use crate::audit::{AuditEntry, AuditLog};
use crate::auth::RoomslotAuthSource;
use crate::engine::{daily_end, local_span, Engine, EngineError, NewBooking, NewRecurringReservation};
use crate::export;
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command, ExportFormat, ReservationFilter, RoomFilter};

const DEFAULT_EXPORT_HOST: &str = "roomslot.local";

/// Who sent the statement, as far as the audit trail cares.
struct Caller {
    ip: Option<IpAddr>,
    application: Option<String>,
}

impl Caller {
    fn from_client<C: ClientInfo>(client: &C) -> Self {
        Self {
            ip: Some(client.socket_addr().ip()),
            application: client.metadata().get("application_name").cloned(),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Json {
    serde_json::to_value(value).unwrap_or_default()
}

fn executed(tag: &str) -> Vec<Response> {
    vec![Response::Execution(Tag::new(tag).with_rows(1))]
}

pub struct RoomslotHandler {
    engine: Arc<Engine>,
    audit: Arc<AuditLog>,
    query_parser: Arc<RoomslotQueryParser>,
}

impl RoomslotHandler {
    pub fn new(engine: Arc<Engine>, audit: Arc<AuditLog>) -> Self {
        Self {
            engine,
            audit,
            query_parser: Arc::new(RoomslotQueryParser),
        }
    }

    fn record(&self, caller: &Caller, entry: AuditEntry) {
        self.audit
            .record(entry.client(caller.ip, caller.application.clone()));
    }

    fn entry(&self, action: &'static str, subject_type: &'static str, id: impl ToString) -> AuditEntry {
        AuditEntry::new(self.engine.now_ms(), action, subject_type, id.to_string())
    }

    /// Parse, run and time one statement.
    async fn run(&self, caller: &Caller, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "parse", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, caller: &Caller, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            // ── Rooms ────────────────────────────────────────
            Command::InsertRoom {
                id,
                name,
                capacity,
                status,
            } => {
                let room = engine
                    .create_room(id, name, capacity, status)
                    .await
                    .map_err(engine_err)?;
                self.record(caller, self.entry("room.created", "room", id).after(to_json(&room)));
                Ok(executed("INSERT"))
            }
            Command::UpdateRoom { id, changes } => {
                let before = engine.get_room(id).await.map_err(engine_err)?;
                let after = engine.update_room(id, changes).await.map_err(engine_err)?;
                self.record(
                    caller,
                    self.entry("room.updated", "room", id)
                        .before(to_json(&before))
                        .after(to_json(&after)),
                );
                Ok(executed("UPDATE"))
            }
            Command::DeleteRoom { id } => {
                let before = engine.get_room(id).await.map_err(engine_err)?;
                engine.delete_room(id).await.map_err(engine_err)?;
                self.record(caller, self.entry("room.deleted", "room", id).before(to_json(&before)));
                Ok(executed("DELETE"))
            }

            // ── Bookings ─────────────────────────────────────
            Command::InsertBooking {
                id,
                user_id,
                room_id,
                date,
                time,
                duration,
            } => {
                let span = local_span(engine.calendar(), date, time, duration)
                    .map_err(|v| engine_err(v.into()))?;
                let booking = engine
                    .create_one_time_booking(NewBooking {
                        id,
                        user_id,
                        room_id,
                        span,
                        recurring_reservation_id: None,
                    })
                    .await
                    .map_err(engine_err)?;
                self.record(
                    caller,
                    self.entry("booking.created", "booking", id)
                        .user(user_id)
                        .after(to_json(&booking)),
                );
                Ok(executed("INSERT"))
            }
            Command::UpdateBooking {
                id,
                user_id,
                date,
                time,
                duration,
            } => {
                let span = local_span(engine.calendar(), date, time, duration)
                    .map_err(|v| engine_err(v.into()))?;
                let before = engine.get_booking(id).await.map_err(engine_err)?;
                let after = engine
                    .reschedule_booking(id, user_id, span)
                    .await
                    .map_err(engine_err)?;
                self.record(
                    caller,
                    self.entry("booking.updated", "booking", id)
                        .user(user_id)
                        .before(to_json(&before))
                        .after(to_json(&after)),
                );
                Ok(executed("UPDATE"))
            }
            Command::DeleteBooking { id, user_id } => {
                let before = engine.cancel_booking(id, user_id).await.map_err(engine_err)?;
                self.record(
                    caller,
                    self.entry("booking.deleted", "booking", id)
                        .user(user_id)
                        .before(to_json(&before)),
                );
                Ok(executed("DELETE"))
            }
            Command::InsertRecurringReservation {
                id,
                user_id,
                room_id,
                recurrence_type,
                weekdays,
                start_date,
                end_date,
                start_time,
                duration,
            } => {
                let end_time =
                    daily_end(start_time, duration).map_err(|v| engine_err(v.into()))?;
                let (reservation, bookings) = engine
                    .create_recurring_reservation(NewRecurringReservation {
                        id,
                        user_id,
                        room_id,
                        recurrence_type,
                        weekdays,
                        start_date,
                        end_date,
                        daily_start: start_time,
                        daily_end: end_time,
                    })
                    .await
                    .map_err(engine_err)?;
                let count = bookings.len();
                self.record(
                    caller,
                    self.entry("booking.recurring_created", "recurring_reservation", id)
                        .user(user_id)
                        .after(serde_json::json!({
                            "reservation": to_json(&reservation),
                            "occurrences": count,
                        })),
                );
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }

            // ── Cancellation policies ────────────────────────
            Command::InsertPolicy { policy } => {
                let policy = engine
                    .add_cancellation_policy(policy)
                    .await
                    .map_err(engine_err)?;
                self.record(
                    caller,
                    self.entry("policy.created", "cancellation_policy", policy.id)
                        .after(to_json(&policy)),
                );
                Ok(executed("INSERT"))
            }
            Command::UpdatePolicy { id, changes } => {
                let policy = engine
                    .update_cancellation_policy(id, changes)
                    .await
                    .map_err(engine_err)?;
                self.record(
                    caller,
                    self.entry("policy.updated", "cancellation_policy", id).after(to_json(&policy)),
                );
                Ok(executed("UPDATE"))
            }
            Command::DeletePolicy { id } => {
                engine
                    .remove_cancellation_policy(id)
                    .await
                    .map_err(engine_err)?;
                self.record(caller, self.entry("policy.deleted", "cancellation_policy", id));
                Ok(executed("DELETE"))
            }

            // ── Reads ────────────────────────────────────────
            Command::SelectRooms {
                public_only,
                filter,
            } => {
                let rooms = match filter {
                    RoomFilter::Id(id) => {
                        let room = engine.get_room(id).await.map_err(engine_err)?;
                        if public_only && room.status != RoomStatus::Available {
                            Vec::new()
                        } else {
                            vec![room]
                        }
                    }
                    RoomFilter::Name(name) if public_only => engine
                        .list_public_rooms(name.as_deref())
                        .await
                        .map_err(engine_err)?,
                    RoomFilter::Name(name) => engine
                        .list_rooms(name.as_deref())
                        .await
                        .map_err(engine_err)?,
                };
                rows_response(room_schema(), rooms, |enc, room| {
                    enc.encode_field(&room.id.to_string())?;
                    enc.encode_field(&room.name)?;
                    enc.encode_field(&(room.capacity as i64))?;
                    enc.encode_field(&room.status.as_str().to_string())
                })
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::Id(id) => vec![engine.get_booking(id).await.map_err(engine_err)?],
                    BookingFilter::Room(id) => {
                        engine.bookings_for_room(id).await.map_err(engine_err)?
                    }
                    BookingFilter::User(id) => {
                        engine.bookings_for_user(id).await.map_err(engine_err)?
                    }
                    BookingFilter::Reservation(id) => engine
                        .bookings_for_reservation(id)
                        .await
                        .map_err(engine_err)?,
                };
                let cal = *engine.calendar();
                rows_response(booking_schema(), bookings, move |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.user_id.to_string())?;
                    enc.encode_field(&b.room_id.to_string())?;
                    enc.encode_field(&local_timestamp(&cal, b.span.start))?;
                    enc.encode_field(&local_timestamp(&cal, b.span.end))?;
                    enc.encode_field(&b.recurring_reservation_id.map(|r| r.to_string()))?;
                    enc.encode_field(&b.share_token)
                })
            }
            Command::SelectRecurringReservations { filter } => {
                let reservations = match filter {
                    ReservationFilter::Id(id) => vec![
                        engine
                            .get_recurring_reservation(id)
                            .await
                            .map_err(engine_err)?,
                    ],
                    ReservationFilter::Room(id) => engine
                        .recurring_reservations_for_room(id)
                        .await
                        .map_err(engine_err)?,
                };
                rows_response(reservation_schema(), reservations, |enc, r| {
                    let days: Vec<String> = r.weekdays.iter().map(|d| d.to_string()).collect();
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.user_id.to_string())?;
                    enc.encode_field(&r.room_id.to_string())?;
                    enc.encode_field(&r.recurrence_type.as_str().to_string())?;
                    enc.encode_field(&days.join(","))?;
                    enc.encode_field(&r.start_date.to_string())?;
                    enc.encode_field(&r.end_date.to_string())?;
                    enc.encode_field(&r.daily_start.format("%H:%M").to_string())?;
                    enc.encode_field(&r.daily_end.format("%H:%M").to_string())?;
                    enc.encode_field(&r.timezone)?;
                    enc.encode_field(&r.status.as_str().to_string())?;
                    enc.encode_field(&r.share_token)
                })
            }
            Command::SelectPolicies {
                room_id,
                active_only,
            } => {
                let policies = if active_only {
                    engine
                        .active_cancellation_policy(room_id)
                        .await
                        .map_err(engine_err)?
                        .into_iter()
                        .collect()
                } else {
                    engine
                        .cancellation_policies(room_id)
                        .await
                        .map_err(engine_err)?
                };
                rows_response(policy_schema(), policies, |enc, p| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&p.room_id.to_string())?;
                    enc.encode_field(&p.name)?;
                    enc.encode_field(&(p.lead_time_hours as i64))?;
                    enc.encode_field(&p.penalty.kind().to_string())?;
                    enc.encode_field(&p.penalty.value().map(|v| v as i64))?;
                    enc.encode_field(&p.active)
                })
            }
            Command::SelectAvailableSlots {
                room_id,
                date,
                duration,
                exclude_booking_id,
            } => {
                let slots = engine
                    .available_slots(room_id, date, duration, exclude_booking_id)
                    .await
                    .map_err(engine_err)?;
                let cal = *engine.calendar();
                rows_response(slot_schema(), slots, move |enc, slot| {
                    enc.encode_field(&local_timestamp(&cal, slot.start))?;
                    enc.encode_field(&local_timestamp(&cal, slot.end))?;
                    enc.encode_field(&slot.label)
                })
            }
            Command::SelectAvailability {
                room_id,
                date,
                time,
                duration,
                exclude_booking_id,
            } => {
                let span = local_span(engine.calendar(), date, time, duration)
                    .map_err(|v| engine_err(v.into()))?;
                let available = engine
                    .is_available(room_id, span, exclude_booking_id)
                    .await
                    .map_err(engine_err)?;
                rows_response(availability_schema(), vec![available], |enc, a| {
                    enc.encode_field(&a)
                })
            }
            Command::SelectBookingExport {
                booking_id,
                format,
                host,
            } => {
                let booking = engine.get_booking(booking_id).await.map_err(engine_err)?;
                let room_name = engine
                    .get_room(booking.room_id)
                    .await
                    .map(|r| r.name)
                    .unwrap_or_default();
                let (format_name, content) = match format {
                    ExportFormat::Ics => (
                        "ics",
                        export::booking_ics(
                            &booking,
                            &room_name,
                            host.as_deref().unwrap_or(DEFAULT_EXPORT_HOST),
                        ),
                    ),
                    ExportFormat::Google => {
                        ("google", export::google_calendar_url(&booking, &room_name))
                    }
                };
                rows_response(export_schema(), vec![content], move |enc, content| {
                    enc.encode_field(&booking_id.to_string())?;
                    enc.encode_field(&format_name.to_string())?;
                    enc.encode_field(&content)
                })
            }
        }
    }
}

/// RFC 3339 in the configured zone.
fn local_timestamp(cal: &crate::calendar::Calendar, ms: Ms) -> String {
    cal.local(ms).map(|dt| dt.to_rfc3339()).unwrap_or_default()
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), typed("capacity", Type::INT8), text("status")]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("user_id"),
        text("room_id"),
        text("start"),
        text("end"),
        text("recurring_reservation_id"),
        text("share_token"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("user_id"),
        text("room_id"),
        text("recurrence_type"),
        text("days_of_week"),
        text("start_date"),
        text("end_date"),
        text("start_time"),
        text("end_time"),
        text("timezone"),
        text("status"),
        text("share_token"),
    ]
}

fn policy_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("room_id"),
        text("name"),
        typed("lead_time_hours", Type::INT8),
        text("penalty_type"),
        typed("penalty_value", Type::INT8),
        typed("active", Type::BOOL),
    ]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![text("start"), text("end"), text("label")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![typed("available", Type::BOOL)]
}

fn export_schema() -> Vec<FieldInfo> {
    vec![text("booking_id"), text("format"), text("content")]
}

/// Columns a SELECT on `sql` will return, for Describe messages.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("rooms" | "public_rooms") => room_schema(),
        Some("bookings") => booking_schema(),
        Some("recurring_reservations") => reservation_schema(),
        Some("cancellation_policies") => policy_schema(),
        Some("available_slots") => slot_schema(),
        Some("availability") => availability_schema(),
        Some("booking_exports") => export_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomslotHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = Caller::from_client(&*client);
        self.run(&caller, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomslotQueryParser;

#[async_trait]
impl QueryParser for RoomslotQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomslotHandler {
    type Statement = String;
    type QueryParser = RoomslotQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = Caller::from_client(&*client);
        let sql = substitute_params(portal);
        let mut responses = self.run(&caller, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomslotFactory {
    handler: Arc<RoomslotHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomslotAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomslotFactory {
    pub fn new(engine: Arc<Engine>, audit: Arc<AuditLog>, password: String) -> Self {
        let auth_source = RoomslotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomslotHandler::new(engine, audit)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomslotFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    audit: Arc<AuditLog>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = RoomslotFactory::new(engine, audit, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) | EngineError::InvalidPattern(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::RoomUnavailable(_)
        | EngineError::NotOwner(_)
        | EngineError::NotInFuture(_)
        | EngineError::CancellationWindowClosed { .. } => "42501",
        EngineError::NotFound(_) => "02000",
        EngineError::LockTimeout(_) => "55P03",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ValidationFailure;
    use ulid::Ulid;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM bookings WHERE id = $2 AND user_id = $1"), 2);
        assert_eq!(count_params("VALUES ($10)"), 10);
    }

    #[test]
    fn schemas_follow_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names("SELECT * FROM available_slots WHERE room_id = $1"),
            vec!["start", "end", "label"]
        );
        assert_eq!(names("SELECT * FROM availability"), vec!["available"]);
        assert!(names("DELETE FROM rooms WHERE id = $1").is_empty());
    }

    #[test]
    fn error_codes() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::Conflict(Some(id))), "23P01");
        assert_eq!(sqlstate(&EngineError::LockTimeout(id)), "55P03");
        assert_eq!(sqlstate(&EngineError::NotOwner(id)), "42501");
        assert_eq!(
            sqlstate(&EngineError::CancellationWindowClosed { lead_time_hours: 24 }),
            "42501"
        );
        assert_eq!(sqlstate(&ValidationFailure::InPast.into()), "22023");
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "02000");
    }
}
