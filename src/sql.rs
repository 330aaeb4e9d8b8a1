use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTemplate {
        id: Ulid,
        tutor_id: Ulid,
        weekday: u8,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    },
    UpdateTemplate {
        id: Ulid,
        weekday: u8,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    },
    DeactivateTemplate {
        id: Ulid,
    },
    /// `INSERT INTO expansions (template_id, from_date, weeks|until)` —
    /// a numeric third value is a week count, a date string an inclusive
    /// end date, absent means the default window.
    Expand {
        template_id: Ulid,
        from: NaiveDate,
        weeks: Option<u32>,
        until: Option<NaiveDate>,
    },
    InsertSlot {
        id: Ulid,
        tutor_id: Ulid,
        date: NaiveDate,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    },
    DisableSlot {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        student_id: Ulid,
        tutor_id: Ulid,
        subject: String,
        start: Ms,
        end: Ms,
        hourly_cents: i64,
        currency: String,
        request_key: Option<String>,
        notes: Option<String>,
    },
    CancelAppointment {
        id: Ulid,
    },
    UpdateAppointment {
        id: Ulid,
        status: AppointmentStatus,
        actual_start: Option<Ms>,
        actual_end: Option<Ms>,
    },
    InsertSession {
        student_id: Ulid,
        tutor_id: Ulid,
        subject: String,
        hours: f64,
        date: NaiveDate,
    },
    InsertPayment {
        id: Ulid,
        ledger_id: Ulid,
        hours: f64,
        amount_cents: i64,
        currency: String,
        method: Option<String>,
        status: Option<PaymentStatus>,
        due_date: Option<NaiveDate>,
    },
    UpdatePayment {
        id: Ulid,
        status: PaymentStatus,
    },
    SetPaymentInterval {
        ledger_id: Ulid,
        hours: f64,
    },
    SelectTemplates {
        tutor_id: Ulid,
    },
    SelectSlots {
        tutor_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    SelectAppointments {
        tutor_id: Ulid,
    },
    SelectLedgers {
        tutor_id: Option<Ulid>,
        id: Option<Ulid>,
    },
    SelectSessions {
        ledger_id: Ulid,
    },
    SelectPayments {
        ledger_id: Ulid,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "templates" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("templates", 5, values.len()));
            }
            Ok(Command::InsertTemplate {
                id: parse_ulid(&values[0])?,
                tutor_id: parse_ulid(&values[1])?,
                weekday: parse_u8(&values[2])?,
                start_min: parse_u16(&values[3])?,
                end_min: parse_u16(&values[4])?,
            })
        }
        "expansions" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("expansions", 2, values.len()));
            }
            let template_id = parse_ulid(&values[0])?;
            let from = parse_date(&values[1])?;
            let (mut weeks, mut until) = (None, None);
            if values.len() >= 3 {
                // Number → week count, date string → inclusive end date.
                match parse_u32(&values[2]) {
                    Ok(w) => weeks = Some(w),
                    Err(_) => until = Some(parse_date(&values[2])?),
                }
            }
            Ok(Command::Expand {
                template_id,
                from,
                weeks,
                until,
            })
        }
        "slots" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("slots", 5, values.len()));
            }
            Ok(Command::InsertSlot {
                id: parse_ulid(&values[0])?,
                tutor_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start_min: parse_u16(&values[3])?,
                end_min: parse_u16(&values[4])?,
            })
        }
        "appointments" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("appointments", 6, values.len()));
            }
            Ok(Command::InsertAppointment {
                id: parse_ulid(&values[0])?,
                student_id: parse_ulid(&values[1])?,
                tutor_id: parse_ulid(&values[2])?,
                subject: parse_string(&values[3])?,
                start: parse_i64(&values[4])?,
                end: parse_i64(&values[5])?,
                hourly_cents: if values.len() >= 7 {
                    parse_i64(&values[6])?
                } else {
                    0
                },
                currency: if values.len() >= 8 {
                    parse_string(&values[7])?
                } else {
                    "USD".to_string()
                },
                request_key: if values.len() >= 9 {
                    parse_string_or_null(&values[8])?
                } else {
                    None
                },
                notes: if values.len() >= 10 {
                    parse_string_or_null(&values[9])?
                } else {
                    None
                },
            })
        }
        "sessions" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("sessions", 5, values.len()));
            }
            Ok(Command::InsertSession {
                student_id: parse_ulid(&values[0])?,
                tutor_id: parse_ulid(&values[1])?,
                subject: parse_string(&values[2])?,
                hours: parse_f64(&values[3])?,
                date: parse_date(&values[4])?,
            })
        }
        "payments" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("payments", 5, values.len()));
            }
            Ok(Command::InsertPayment {
                id: parse_ulid(&values[0])?,
                ledger_id: parse_ulid(&values[1])?,
                hours: parse_f64(&values[2])?,
                amount_cents: parse_i64(&values[3])?,
                currency: parse_string(&values[4])?,
                method: if values.len() >= 6 {
                    parse_string_or_null(&values[5])?
                } else {
                    None
                },
                status: if values.len() >= 7 {
                    match parse_string_or_null(&values[6])? {
                        Some(s) => Some(
                            PaymentStatus::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                        ),
                        None => None,
                    }
                } else {
                    None
                },
                due_date: if values.len() >= 8 {
                    parse_date_or_null(&values[7])?
                } else {
                    None
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "templates" => Ok(Command::DeactivateTemplate { id }),
        "slots" => Ok(Command::DisableSlot { id }),
        "appointments" => Ok(Command::CancelAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "templates" => {
            let (mut weekday, mut start_min, mut end_min) = (None, None, None);
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "weekday" => weekday = Some(parse_u8(&a.value)?),
                    "start_min" => start_min = Some(parse_u16(&a.value)?),
                    "end_min" => end_min = Some(parse_u16(&a.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateTemplate {
                id,
                weekday: weekday.ok_or(SqlError::MissingFilter("weekday"))?,
                start_min: start_min.ok_or(SqlError::MissingFilter("start_min"))?,
                end_min: end_min.ok_or(SqlError::MissingFilter("end_min"))?,
            })
        }
        "appointments" => {
            let (mut status, mut actual_start, mut actual_end) = (None, None, None);
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "status" => {
                        let s = parse_string(&a.value)?;
                        status = Some(
                            AppointmentStatus::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                        );
                    }
                    "actual_start" => actual_start = Some(parse_i64(&a.value)?),
                    "actual_end" => actual_end = Some(parse_i64(&a.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateAppointment {
                id,
                status: status.ok_or(SqlError::MissingFilter("status"))?,
                actual_start,
                actual_end,
            })
        }
        "payments" => {
            let mut status = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "status" => {
                        let s = parse_string(&a.value)?;
                        status = Some(
                            PaymentStatus::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                        );
                    }
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdatePayment {
                id,
                status: status.ok_or(SqlError::MissingFilter("status"))?,
            })
        }
        "ledgers" => {
            let mut hours = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "payment_interval" => hours = Some(parse_f64(&a.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::SetPaymentInterval {
                ledger_id: id,
                hours: hours.ok_or(SqlError::MissingFilter("payment_interval"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "templates" => Ok(Command::SelectTemplates {
            tutor_id: filters
                .eq_ulid("tutor_id")?
                .ok_or(SqlError::MissingFilter("tutor_id"))?,
        }),
        "slots" => Ok(Command::SelectSlots {
            tutor_id: filters
                .eq_ulid("tutor_id")?
                .ok_or(SqlError::MissingFilter("tutor_id"))?,
            from: filters.gte_date("date")?,
            to: filters.lte_date("date")?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            tutor_id: filters
                .eq_ulid("tutor_id")?
                .ok_or(SqlError::MissingFilter("tutor_id"))?,
        }),
        "ledgers" => {
            let tutor_id = filters.eq_ulid("tutor_id")?;
            let id = filters.eq_ulid("id")?;
            if tutor_id.is_none() && id.is_none() {
                return Err(SqlError::MissingFilter("tutor_id or id"));
            }
            Ok(Command::SelectLedgers { tutor_id, id })
        }
        "sessions" => Ok(Command::SelectSessions {
            ledger_id: filters
                .eq_ulid("ledger_id")?
                .ok_or(SqlError::MissingFilter("ledger_id"))?,
        }),
        "payments" => Ok(Command::SelectPayments {
            ledger_id: filters
                .eq_ulid("ledger_id")?
                .ok_or(SqlError::MissingFilter("ledger_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause filters ──────────────────────────────────────

#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    gte: Vec<(String, Expr)>,
    lte: Vec<(String, Expr)>,
}

impl Filters {
    fn eq_ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.eq
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| parse_ulid(e))
            .transpose()
    }

    fn gte_date(&self, column: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.gte
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| parse_date(e))
            .transpose()
    }

    fn lte_date(&self, column: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.lte
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| parse_date(e))
            .transpose()
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    filters.eq.push((col, (**right).clone()));
                }
            }
            ast::BinaryOperator::GtEq => {
                if let Some(col) = expr_column_name(left) {
                    filters.gte.push((col, (**right).clone()));
                }
            }
            ast::BinaryOperator::LtEq => {
                if let Some(col) = expr_column_name(left) {
                    filters.lte.push((col, (**right).clone()));
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
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

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
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
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
