use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{parse_date, parse_time};
use crate::engine::{NewPolicy, PolicyChanges, RoomChanges};
use crate::model::*;

const ROOM_COLUMNS: &[&str] = &["id", "name", "capacity", "status"];
const BOOKING_COLUMNS: &[&str] = &["id", "user_id", "room_id", "date", "time", "duration"];
const RECURRING_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "room_id",
    "recurrence_type",
    "days_of_week",
    "start_date",
    "end_date",
    "start_time",
    "duration",
];
const POLICY_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "name",
    "lead_time_hours",
    "penalty_type",
    "penalty_value",
    "active",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RoomFilter {
    Id(Ulid),
    /// Case-insensitive name substring; `None` lists everything.
    Name(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BookingFilter {
    Id(Ulid),
    Room(Ulid),
    User(Ulid),
    Reservation(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReservationFilter {
    Id(Ulid),
    Room(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Ics,
    Google,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
        capacity: u32,
        status: RoomStatus,
    },
    UpdateRoom {
        id: Ulid,
        changes: RoomChanges,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        user_id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        duration: i64,
    },
    UpdateBooking {
        id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        duration: i64,
    },
    DeleteBooking {
        id: Ulid,
        user_id: Ulid,
    },
    InsertRecurringReservation {
        id: Ulid,
        user_id: Ulid,
        room_id: Ulid,
        recurrence_type: RecurrenceType,
        weekdays: Vec<i64>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_time: NaiveTime,
        duration: i64,
    },
    InsertPolicy {
        policy: NewPolicy,
    },
    UpdatePolicy {
        id: Ulid,
        changes: PolicyChanges,
    },
    DeletePolicy {
        id: Ulid,
    },
    SelectRooms {
        public_only: bool,
        filter: RoomFilter,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectRecurringReservations {
        filter: ReservationFilter,
    },
    SelectPolicies {
        room_id: Ulid,
        active_only: bool,
    },
    SelectAvailableSlots {
        room_id: Ulid,
        date: NaiveDate,
        duration: i64,
        exclude_booking_id: Option<Ulid>,
    },
    SelectAvailability {
        room_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        duration: i64,
        exclude_booking_id: Option<Ulid>,
    },
    SelectBookingExport {
        booking_id: Ulid,
        format: ExportFormat,
        host: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, without resolving its filters. Bound
/// parameters may still be placeholders here.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let from = select.from.first()?;
    table_factor_name(&from.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name. Without a column list the table's
/// default column order applies.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        defaults: &[&str],
        insert: &ast::Insert,
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let columns: Vec<String> = if insert.columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() < columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        Ok(Self {
            table,
            columns,
            values,
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx).filter(|e| !is_null(e))
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let values = &rows[0];

    match table.as_str() {
        "rooms" => {
            let row = Row::new("rooms", ROOM_COLUMNS, insert, values)?;
            let status = match row.get("status") {
                Some(e) => parse_room_status(e)?,
                None => RoomStatus::Available,
            };
            Ok(Command::InsertRoom {
                id: parse_ulid(row.require("id")?)?,
                name: parse_string(row.require("name")?)?,
                capacity: parse_u32(row.require("capacity")?)?,
                status,
            })
        }
        "bookings" => {
            let row = Row::new("bookings", BOOKING_COLUMNS, insert, values)?;
            Ok(Command::InsertBooking {
                id: parse_ulid(row.require("id")?)?,
                user_id: parse_ulid(row.require("user_id")?)?,
                room_id: parse_ulid(row.require("room_id")?)?,
                date: parse_date_expr(row.require("date")?)?,
                time: parse_time_expr(row.require("time")?)?,
                duration: parse_i64(row.require("duration")?)?,
            })
        }
        "recurring_reservations" => {
            let row = Row::new("recurring_reservations", RECURRING_COLUMNS, insert, values)?;
            let recurrence_type = match row.get("recurrence_type") {
                Some(e) => {
                    let s = parse_string(e)?;
                    RecurrenceType::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("bad recurrence_type: {s}")))?
                }
                None => RecurrenceType::Weekly,
            };
            Ok(Command::InsertRecurringReservation {
                id: parse_ulid(row.require("id")?)?,
                user_id: parse_ulid(row.require("user_id")?)?,
                room_id: parse_ulid(row.require("room_id")?)?,
                recurrence_type,
                weekdays: parse_weekdays(row.require("days_of_week")?)?,
                start_date: parse_date_expr(row.require("start_date")?)?,
                end_date: parse_date_expr(row.require("end_date")?)?,
                start_time: parse_time_expr(row.require("start_time")?)?,
                duration: parse_i64(row.require("duration")?)?,
            })
        }
        "cancellation_policies" => {
            let row = Row::new("cancellation_policies", POLICY_COLUMNS, insert, values)?;
            let penalty = parse_penalty(
                row.get("penalty_type").map(parse_string).transpose()?,
                row.get("penalty_value").map(parse_u32).transpose()?,
            )?;
            let active = match row.get("active") {
                Some(e) => parse_bool(e)?,
                None => true,
            };
            Ok(Command::InsertPolicy {
                policy: NewPolicy {
                    id: parse_ulid(row.require("id")?)?,
                    room_id: parse_ulid(row.require("room_id")?)?,
                    name: parse_string(row.require("name")?)?,
                    lead_time_hours: parse_u32(row.require("lead_time_hours")?)?,
                    penalty,
                    active,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    let filters = Filters::from_selection(selection.as_ref())?;
    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let AssignmentTarget::ColumnName(name) = &a.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column =
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?;
        set.push((column, &a.value));
    }
    let assigned = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "rooms" => Ok(Command::UpdateRoom {
            id: filters.ulid("id")?,
            changes: RoomChanges {
                name: assigned("name").map(parse_string).transpose()?,
                capacity: assigned("capacity").map(parse_u32).transpose()?,
                status: assigned("status").map(parse_room_status).transpose()?,
            },
        }),
        "bookings" => Ok(Command::UpdateBooking {
            id: filters.ulid("id")?,
            user_id: filters.ulid("user_id")?,
            date: parse_date_expr(assigned("date").ok_or(SqlError::MissingColumn("bookings", "date"))?)?,
            time: parse_time_expr(assigned("time").ok_or(SqlError::MissingColumn("bookings", "time"))?)?,
            duration: parse_i64(
                assigned("duration").ok_or(SqlError::MissingColumn("bookings", "duration"))?,
            )?,
        }),
        "cancellation_policies" => {
            let kind = assigned("penalty_type").map(parse_string).transpose()?;
            let value = assigned("penalty_value").map(parse_u32).transpose()?;
            let penalty = match (kind, value) {
                (None, None) => None,
                (kind, value) => Some(parse_penalty(kind, value)?),
            };
            Ok(Command::UpdatePolicy {
                id: filters.ulid("id")?,
                changes: PolicyChanges {
                    name: assigned("name").map(parse_string).transpose()?,
                    lead_time_hours: assigned("lead_time_hours").map(parse_u32).transpose()?,
                    penalty,
                    active: assigned("active").map(parse_bool).transpose()?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: filters.ulid("id")?,
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: filters.ulid("id")?,
            user_id: filters.ulid("user_id")?,
        }),
        "cancellation_policies" => Ok(Command::DeletePolicy {
            id: filters.ulid("id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "rooms" | "public_rooms" => {
            let filter = match filters.opt_ulid("id")? {
                Some(id) => RoomFilter::Id(id),
                None => RoomFilter::Name(filters.like.clone()),
            };
            Ok(Command::SelectRooms {
                public_only: table == "public_rooms",
                filter,
            })
        }
        "bookings" => {
            let filter = if let Some(id) = filters.opt_ulid("id")? {
                BookingFilter::Id(id)
            } else if let Some(id) = filters.opt_ulid("room_id")? {
                BookingFilter::Room(id)
            } else if let Some(id) = filters.opt_ulid("user_id")? {
                BookingFilter::User(id)
            } else if let Some(id) = filters.opt_ulid("recurring_reservation_id")? {
                BookingFilter::Reservation(id)
            } else {
                return Err(SqlError::MissingFilter("room_id, user_id or recurring_reservation_id"));
            };
            Ok(Command::SelectBookings { filter })
        }
        "recurring_reservations" => {
            let filter = match filters.opt_ulid("id")? {
                Some(id) => ReservationFilter::Id(id),
                None => ReservationFilter::Room(filters.ulid("room_id")?),
            };
            Ok(Command::SelectRecurringReservations { filter })
        }
        "cancellation_policies" => Ok(Command::SelectPolicies {
            room_id: filters.ulid("room_id")?,
            active_only: filters.get("active").map(parse_bool).transpose()?.unwrap_or(false),
        }),
        "available_slots" => Ok(Command::SelectAvailableSlots {
            room_id: filters.ulid("room_id")?,
            date: parse_date_expr(filters.require("date")?)?,
            duration: parse_i64(filters.require("duration")?)?,
            exclude_booking_id: filters.opt_ulid("exclude_booking_id")?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.ulid("room_id")?,
            date: parse_date_expr(filters.require("date")?)?,
            time: parse_time_expr(filters.require("time")?)?,
            duration: parse_i64(filters.require("duration")?)?,
            exclude_booking_id: filters.opt_ulid("exclude_booking_id")?,
        }),
        "booking_exports" => {
            let format = match filters.get("format").map(parse_string).transpose()? {
                None => ExportFormat::Ics,
                Some(f) => match f.to_ascii_lowercase().as_str() {
                    "ics" | "ical" => ExportFormat::Ics,
                    "google" => ExportFormat::Google,
                    _ => return Err(SqlError::Parse(format!("unknown export format: {f}"))),
                },
            };
            Ok(Command::SelectBookingExport {
                booking_id: filters.ulid("booking_id")?,
                format,
                host: filters.get("host").map(parse_string).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality conjuncts of a WHERE clause, plus at most one LIKE pattern.
#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    like: Option<String>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                self.collect(left)?;
                self.collect(right)?;
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                if let Some(col) = expr_column_name(left) {
                    self.eq.push((col, right.as_ref().clone()));
                }
            }
            Expr::Like {
                negated: false,
                pattern,
                ..
            }
            | Expr::ILike {
                negated: false,
                pattern,
                ..
            } => {
                let raw = parse_string(pattern)?;
                self.like = Some(raw.trim_matches('%').to_string());
            }
            Expr::Nested(inner) => self.collect(inner)?,
            _ => {}
        }
        Ok(())
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.eq
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| e)
            .filter(|e| !is_null(e))
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.require(column)?)
    }

    fn opt_ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(column).map(parse_ulid).transpose()
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::DoubleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    parse_date(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    parse_time(&s).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_string(expr)?;
    RoomStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad room status: {s}")))
}

fn parse_penalty(kind: Option<String>, value: Option<u32>) -> Result<Penalty, SqlError> {
    match (kind.as_deref().map(str::to_ascii_lowercase).as_deref(), value) {
        (None | Some("none"), None) => Ok(Penalty::None),
        (Some("none"), Some(_)) => Err(SqlError::Parse("penalty 'none' takes no value".into())),
        (Some("percent"), Some(v)) => Ok(Penalty::Percent(v)),
        (Some("flat"), Some(v)) => Ok(Penalty::Flat(v)),
        (Some(k @ ("percent" | "flat")), None) => {
            Err(SqlError::Parse(format!("penalty '{k}' needs penalty_value")))
        }
        (None, Some(_)) => Err(SqlError::Parse("penalty_value without penalty_type".into())),
        (Some(other), _) => Err(SqlError::Parse(format!("bad penalty_type: {other}"))),
    }
}

/// `ARRAY[1, 3]`, `'{1,3}'` or `'1,3'`.
fn parse_weekdays(expr: &Expr) -> Result<Vec<i64>, SqlError> {
    if let Expr::Array(array) = expr {
        return array.elem.iter().map(parse_i64).collect();
    }
    let s = parse_string(expr)?;
    s.trim_matches(|c| c == '{' || c == '}')
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse()
                .map_err(|e| SqlError::Parse(format!("bad weekday {p:?}: {e}")))
        })
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const USER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn user() -> Ulid {
        Ulid::from_string(USER).unwrap()
    }

    #[test]
    fn parse_insert_room() {
        let sql = format!(
            "INSERT INTO rooms (id, name, capacity, status) VALUES ('{ID}', 'Sala A', 8, 'coming_soon')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRoom {
                id: id(),
                name: "Sala A".into(),
                capacity: 8,
                status: RoomStatus::ComingSoon,
            }
        );
    }

    #[test]
    fn insert_room_positional_defaults_status() {
        let sql = format!("INSERT INTO rooms VALUES ('{ID}', 'Sala A', 8, NULL)");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { status, .. } => assert_eq!(status, RoomStatus::Available),
            other => panic!("expected InsertRoom, got {other:?}"),
        }
    }

    #[test]
    fn insert_room_columns_in_any_order() {
        let sql = format!("INSERT INTO rooms (capacity, name, id) VALUES (3, 'Box', '{ID}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { id: got, name, capacity, .. } => {
                assert_eq!(got, id());
                assert_eq!(name, "Box");
                assert_eq!(capacity, 3);
            }
            other => panic!("expected InsertRoom, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_room_partial() {
        let sql = format!("UPDATE rooms SET status = 'unavailable' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoom {
                id: id(),
                changes: RoomChanges {
                    name: None,
                    capacity: None,
                    status: Some(RoomStatus::Unavailable),
                },
            }
        );
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, user_id, room_id, date, time, duration) \
             VALUES ('{ID}', '{USER}', '{ID}', '2026-01-10', '09:30', 60)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                id: id(),
                user_id: user(),
                room_id: id(),
                date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
                time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                duration: 60,
            }
        );
    }

    #[test]
    fn insert_booking_missing_column() {
        let sql = format!("INSERT INTO bookings (id, user_id, room_id) VALUES ('{ID}', '{USER}', '{ID}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("bookings", "date"))
        ));
    }

    #[test]
    fn parse_update_and_delete_booking() {
        let sql = format!(
            "UPDATE bookings SET date = '2026-01-11', time = '10:00', duration = 30 \
             WHERE id = '{ID}' AND user_id = '{USER}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { id: got, user_id, duration, .. } => {
                assert_eq!(got, id());
                assert_eq!(user_id, user());
                assert_eq!(duration, 30);
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }

        let sql = format!("DELETE FROM bookings WHERE id = '{ID}' AND user_id = '{USER}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteBooking {
                id: id(),
                user_id: user()
            }
        );
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("user_id"))));
    }

    #[test]
    fn parse_recurring_with_array_and_text_days() {
        for days in ["ARRAY[3, 1]", "'{3,1}'", "'3, 1'"] {
            let sql = format!(
                "INSERT INTO recurring_reservations \
                 (id, user_id, room_id, recurrence_type, days_of_week, start_date, end_date, start_time, duration) \
                 VALUES ('{ID}', '{USER}', '{ID}', 'custom_days', {days}, '2026-01-10', '2026-01-20', '09:00', 60)"
            );
            match parse_sql(&sql).unwrap() {
                Command::InsertRecurringReservation {
                    recurrence_type,
                    weekdays,
                    start_time,
                    ..
                } => {
                    assert_eq!(recurrence_type, RecurrenceType::CustomDays);
                    assert_eq!(weekdays, vec![3, 1]);
                    assert_eq!(start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
                }
                other => panic!("expected InsertRecurringReservation, got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_policy_statements() {
        let sql = format!(
            "INSERT INTO cancellation_policies (id, room_id, name, lead_time_hours, penalty_type, penalty_value, active) \
             VALUES ('{ID}', '{ID}', '24h', 24, 'percent', 5000, true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPolicy { policy } => {
                assert_eq!(policy.lead_time_hours, 24);
                assert_eq!(policy.penalty, Penalty::Percent(5000));
                assert!(policy.active);
            }
            other => panic!("expected InsertPolicy, got {other:?}"),
        }

        let sql = format!("UPDATE cancellation_policies SET active = false WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdatePolicy { changes, .. } => {
                assert_eq!(changes.active, Some(false));
                assert_eq!(changes.penalty, None);
            }
            other => panic!("expected UpdatePolicy, got {other:?}"),
        }

        let sql = format!("DELETE FROM cancellation_policies WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeletePolicy { id: id() });
    }

    #[test]
    fn penalty_none_rejects_value() {
        assert_eq!(parse_penalty(None, None).unwrap(), Penalty::None);
        assert!(parse_penalty(Some("none".into()), Some(10)).is_err());
        assert!(parse_penalty(Some("flat".into()), None).is_err());
        assert!(parse_penalty(Some("bribe".into()), Some(1)).is_err());
        assert_eq!(parse_penalty(Some("FLAT".into()), Some(250)).unwrap(), Penalty::Flat(250));
    }

    #[test]
    fn parse_select_available_slots() {
        let sql = format!(
            "SELECT * FROM available_slots WHERE room_id = '{ID}' AND date = '2026-01-10' AND duration = 60"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailableSlots {
                room_id: id(),
                date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
                duration: 60,
                exclude_booking_id: None,
            }
        );

        let sql = format!(
            "SELECT start, label FROM available_slots WHERE room_id = '{ID}' AND date = '2026-01-10' \
             AND duration = 30 AND exclude_booking_id = '{USER}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailableSlots { exclude_booking_id, .. } => {
                assert_eq!(exclude_booking_id, Some(user()))
            }
            other => panic!("expected SelectAvailableSlots, got {other:?}"),
        }
    }

    #[test]
    fn available_slots_requires_date() {
        let sql = format!("SELECT * FROM available_slots WHERE room_id = '{ID}' AND duration = 60");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT available FROM availability WHERE room_id = '{ID}' AND date = '2026-01-10' \
             AND time = '09:00' AND duration = 90"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { duration, time, .. } => {
                assert_eq!(duration, 90);
                assert_eq!(time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
            }
            other => panic!("expected SelectAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(
            parse_sql("SELECT * FROM rooms").unwrap(),
            Command::SelectRooms {
                public_only: false,
                filter: RoomFilter::Name(None)
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM public_rooms WHERE name ILIKE '%sala%'").unwrap(),
            Command::SelectRooms {
                public_only: true,
                filter: RoomFilter::Name(Some("sala".into()))
            }
        );
        let sql = format!("SELECT * FROM rooms WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectRooms {
                public_only: false,
                filter: RoomFilter::Id(id())
            }
        );
    }

    #[test]
    fn parse_select_bookings_filters() {
        let cases = [
            ("id", BookingFilter::Id(id())),
            ("room_id", BookingFilter::Room(id())),
            ("user_id", BookingFilter::User(id())),
            ("recurring_reservation_id", BookingFilter::Reservation(id())),
        ];
        for (col, expected) in cases {
            let sql = format!("SELECT * FROM bookings WHERE {col} = '{ID}'");
            assert_eq!(
                parse_sql(&sql).unwrap(),
                Command::SelectBookings { filter: expected }
            );
        }
        assert!(parse_sql("SELECT * FROM bookings").is_err());
    }

    #[test]
    fn parse_select_export() {
        let sql = format!("SELECT * FROM booking_exports WHERE booking_id = '{ID}' AND format = 'google'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookingExport {
                booking_id: id(),
                format: ExportFormat::Google,
                host: None,
            }
        );
        let sql = format!("SELECT * FROM booking_exports WHERE booking_id = '{ID}' AND format = 'pdf'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn select_table_ignores_placeholders() {
        assert_eq!(
            select_table("SELECT * FROM available_slots WHERE room_id = $1 AND date = $2").as_deref(),
            Some("available_slots")
        );
        assert_eq!(select_table("DELETE FROM rooms WHERE id = $1"), None);
    }

    #[test]
    fn bad_values_error() {
        let sql = "INSERT INTO rooms (id, name, capacity) VALUES ('nope', 'A', 1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = format!(
            "INSERT INTO bookings VALUES ('{ID}', '{USER}', '{ID}', '2026-13-40', '09:00', 60)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
