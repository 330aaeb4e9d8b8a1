use std::fmt::Debug;
use std::io;
use std::sync::Arc;

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
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::LecternAuthSource;
use crate::engine::{
    Actor, BookOutcome, Engine, EngineError, Expansion, ExpansionWindow,
};
use crate::limits::DEFAULT_EXPANSION_WEEKS;
use crate::model::*;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct LecternHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<LecternQueryParser>,
}

impl LecternHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(LecternQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The startup `user` is the authenticated actor supplied by the identity
    /// collaborator: a ULID is an end user subject to ownership checks, any
    /// other name is a backend service account.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Actor {
        client
            .metadata()
            .get("user")
            .and_then(|u| Ulid::from_string(u).ok())
            .map(Actor::User)
            .unwrap_or(Actor::Service)
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertTemplate {
                id,
                tutor_id,
                weekday,
                start_min,
                end_min,
            } => {
                engine
                    .add_template(actor, id, tutor_id, weekday, start_min, end_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateTemplate {
                id,
                weekday,
                start_min,
                end_min,
            } => {
                engine
                    .update_template(actor, id, weekday, start_min, end_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeactivateTemplate { id } => {
                engine
                    .deactivate_template(actor, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::Expand {
                template_id,
                from,
                weeks,
                until,
            } => {
                let window = match (weeks, until) {
                    (Some(w), _) => ExpansionWindow::Weeks(w),
                    (None, Some(d)) => ExpansionWindow::Until(d),
                    (None, None) => ExpansionWindow::Weeks(DEFAULT_EXPANSION_WEEKS),
                };
                let outcome = engine
                    .expand_template(actor, template_id, from, window)
                    .await
                    .map_err(engine_err)?;
                // EXPAND 0 is "nothing to create" — already populated or an
                // empty window — and is deliberately distinct from an error.
                let rows = match outcome {
                    Expansion::Created(n) => n,
                    Expansion::NothingToCreate(_) => 0,
                };
                Ok(vec![Response::Execution(Tag::new("EXPAND").with_rows(rows))])
            }
            Command::InsertSlot {
                id,
                tutor_id,
                date,
                start_min,
                end_min,
            } => {
                engine
                    .add_slot(actor, id, tutor_id, date, start_min, end_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DisableSlot { id } => {
                engine.disable_slot(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                student_id,
                tutor_id,
                subject,
                start,
                end,
                hourly_cents,
                currency,
                request_key,
                notes,
            } => {
                let outcome = engine
                    .book_appointment(
                        actor,
                        crate::engine::BookingRequest {
                            id,
                            student_id,
                            tutor_id,
                            subject,
                            span: Span { start, end },
                            hourly_cents,
                            currency,
                            notes,
                            request_key,
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                // A detected duplicate retry completes with INSERT 0: the
                // prior appointment stands, no new row.
                let rows = match outcome {
                    BookOutcome::Created(_) => 1,
                    BookOutcome::Duplicate(_) => 0,
                };
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(rows))])
            }
            Command::CancelAppointment { id } => {
                engine
                    .cancel_appointment(actor, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::UpdateAppointment {
                id,
                status,
                actual_start,
                actual_end,
            } => {
                let actual_span = match (actual_start, actual_end) {
                    (Some(s), Some(e)) => Some(Span { start: s, end: e }),
                    (None, None) => None,
                    _ => {
                        return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "22023".into(),
                            "actual_start and actual_end must be set together".into(),
                        ))));
                    }
                };
                engine
                    .transition_appointment(actor, id, status, actual_span)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertSession {
                student_id,
                tutor_id,
                subject,
                hours,
                date,
            } => {
                engine
                    .record_session(actor, student_id, tutor_id, subject, hours, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertPayment {
                id,
                ledger_id,
                hours,
                amount_cents,
                currency,
                method,
                status,
                due_date,
            } => {
                engine
                    .record_payment(
                        actor,
                        id,
                        ledger_id,
                        hours,
                        amount_cents,
                        currency,
                        method,
                        status.unwrap_or(PaymentStatus::Paid),
                        due_date,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdatePayment { id, status } => {
                engine
                    .update_payment_status(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetPaymentInterval { ledger_id, hours } => {
                engine
                    .set_payment_interval(actor, ledger_id, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectTemplates { tutor_id } => {
                let templates = engine.list_templates(tutor_id).await;
                let schema = Arc::new(template_schema());
                let rows: Vec<PgWireResult<_>> = templates
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.tutor_id.to_string())?;
                        encoder.encode_field(&(t.weekday as i64))?;
                        encoder.encode_field(&(t.start_min as i64))?;
                        encoder.encode_field(&(t.end_min as i64))?;
                        encoder.encode_field(&t.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSlots { tutor_id, from, to } => {
                let slots = engine.list_slots(tutor_id, from, to).await;
                let schema = Arc::new(slot_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|s| {
                        let origin = match s.origin {
                            SlotOrigin::Expanded { template_id } => template_id.to_string(),
                            SlotOrigin::OneOff => "one_off".to_string(),
                        };
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.tutor_id.to_string())?;
                        encoder.encode_field(&s.date.to_string())?;
                        encoder.encode_field(&(s.start_min as i64))?;
                        encoder.encode_field(&(s.end_min as i64))?;
                        encoder.encode_field(&s.available)?;
                        encoder.encode_field(&origin)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAppointments { tutor_id } => {
                let appointments = engine.list_appointments(tutor_id).await;
                let schema = Arc::new(appointment_schema());
                let rows: Vec<PgWireResult<_>> = appointments
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.student_id.to_string())?;
                        encoder.encode_field(&a.tutor_id.to_string())?;
                        encoder.encode_field(&a.subject)?;
                        encoder.encode_field(&a.span.start)?;
                        encoder.encode_field(&a.span.end)?;
                        encoder.encode_field(&a.status.as_str())?;
                        encoder.encode_field(&a.rate.cost_cents)?;
                        encoder.encode_field(&a.rate.currency)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectLedgers { tutor_id, id } => {
                let ledgers = match (id, tutor_id) {
                    (Some(id), _) => engine.ledger_info(id).await.into_iter().collect(),
                    (None, Some(tutor_id)) => engine.list_ledgers_for_tutor(tutor_id).await,
                    (None, None) => Vec::new(),
                };
                let schema = Arc::new(ledger_schema());
                let rows: Vec<PgWireResult<_>> = ledgers
                    .into_iter()
                    .map(|l| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&l.id.to_string())?;
                        encoder.encode_field(&l.student_id.to_string())?;
                        encoder.encode_field(&l.tutor_id.to_string())?;
                        encoder.encode_field(&l.subject)?;
                        encoder.encode_field(&l.total_hours)?;
                        encoder.encode_field(&l.unpaid_hours)?;
                        encoder.encode_field(&l.payment_interval)?;
                        encoder.encode_field(&l.last_session_date.map(|d| d.to_string()))?;
                        encoder.encode_field(&l.reminder_sent)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSessions { ledger_id } => {
                let sessions = engine.list_sessions(ledger_id).await;
                let schema = Arc::new(session_schema());
                let rows: Vec<PgWireResult<_>> = sessions
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.appointment_id.map(|a| a.to_string()))?;
                        encoder.encode_field(&s.hours)?;
                        encoder.encode_field(&s.date.to_string())?;
                        encoder.encode_field(&s.paid)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectPayments { ledger_id } => {
                let payments = engine.list_payments(ledger_id).await;
                let schema = Arc::new(payment_schema());
                let rows: Vec<PgWireResult<_>> = payments
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&p.hours_included)?;
                        encoder.encode_field(&p.amount_cents)?;
                        encoder.encode_field(&p.currency)?;
                        encoder.encode_field(&p.status.as_str())?;
                        encoder.encode_field(&p.due_date.map(|d| d.to_string()))?;
                        encoder.encode_field(&p.paid_date.map(|d| d.to_string()))?;
                        encoder.encode_field(&p.method)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let user_id_str = channel.strip_prefix("user_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected user_{{id}})"),
                    )))
                })?;
                let _user_id = Ulid::from_string(user_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn template_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("tutor_id"),
        int8("weekday"),
        int8("start_min"),
        int8("end_min"),
        boolean("active"),
    ]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("tutor_id"),
        varchar("date"),
        int8("start_min"),
        int8("end_min"),
        boolean("available"),
        varchar("origin"),
    ]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("student_id"),
        varchar("tutor_id"),
        varchar("subject"),
        int8("start"),
        int8("end"),
        varchar("status"),
        int8("cost_cents"),
        varchar("currency"),
    ]
}

fn ledger_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("student_id"),
        varchar("tutor_id"),
        varchar("subject"),
        float8("total_hours"),
        float8("unpaid_hours"),
        float8("payment_interval"),
        varchar("last_session_date"),
        boolean("reminder_sent"),
    ]
}

fn session_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("appointment_id"),
        float8("hours"),
        varchar("date"),
        boolean("paid"),
    ]
}

fn payment_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        float8("hours"),
        int8("amount_cents"),
        varchar("currency"),
        varchar("status"),
        varchar("due_date"),
        varchar("paid_date"),
        varchar("method"),
    ]
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn float8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::FLOAT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

/// Result schema for a SELECT statement, used by both describe paths.
fn select_schema(sql_upper: &str) -> Vec<FieldInfo> {
    if !sql_upper.contains("SELECT") {
        return vec![];
    }
    if sql_upper.contains("TEMPLATES") {
        template_schema()
    } else if sql_upper.contains("SLOTS") {
        slot_schema()
    } else if sql_upper.contains("APPOINTMENTS") {
        appointment_schema()
    } else if sql_upper.contains("LEDGERS") {
        ledger_schema()
    } else if sql_upper.contains("SESSIONS") {
        session_schema()
    } else if sql_upper.contains("PAYMENTS") {
        payment_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for LecternHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = crate::observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(&engine, actor, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LecternQueryParser;

#[async_trait]
impl QueryParser for LecternQueryParser {
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
        Ok(select_schema(&stmt.to_uppercase()))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LecternHandler {
    type Statement = String;
    type QueryParser = LecternQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, actor, cmd).await?;
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
            select_schema(&target.statement.to_uppercase()),
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
        Ok(DescribePortalResponse::new(select_schema(
            &target.statement.statement.to_uppercase(),
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
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

pub struct LecternFactory {
    handler: Arc<LecternHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LecternAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LecternFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = LecternAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LecternHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LecternFactory {
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

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), io::Error> {
    let factory = LecternFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::DuplicateRequest => "23505",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::NotFound(_) => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidTransition { .. } => "23514",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
