use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use tokio::net::TcpStream;

use crate::auth::{self, MemberAuthSource};
use crate::directory::Directory;
use crate::ledger::{Ledger, LedgerError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, BookingFilter, Command, SqlError};
use crate::tenant::TenantManager;

pub struct RoombookHandler {
    tenant_manager: Arc<TenantManager>,
    directory: Arc<dyn Directory>,
    query_parser: Arc<RoombookQueryParser>,
}

impl RoombookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, directory: Arc<dyn Directory>) -> Self {
        Self {
            tenant_manager,
            directory,
            query_parser: Arc::new(RoombookQueryParser),
        }
    }

    fn resolve_ledger<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Ledger>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            user_error("3D000", format!("tenant error: {e}"))
        })
    }

    /// The login user, re-resolved per statement so directory changes apply.
    fn resolve_requester<C: ClientInfo>(&self, client: &C) -> PgWireResult<Requester> {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or_default();
        self.directory
            .lookup(user)
            .ok_or_else(|| auth::unknown_member(user))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let ledger = self.resolve_ledger(client)?;
        let requester = self.resolve_requester(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&ledger, &requester, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(
        &self,
        ledger: &Ledger,
        requester: &Requester,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::SelectPlaces => {
                let schema = Arc::new(places_schema());
                let rows: Vec<PgWireResult<_>> = ledger
                    .list_places()
                    .iter()
                    .map(|place| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&place.id.to_string())?;
                        encoder.encode_field(&place.name)?;
                        encoder.encode_field(&place.description)?;
                        encoder.encode_field(&format_schedule(&place.schedule))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertPlace {
                id,
                name,
                description,
                schedule,
            } => {
                require_admin(requester)?;
                ledger
                    .create_place(id, name, description, schedule)
                    .await
                    .map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeletePlace { id } => {
                require_admin(requester)?;
                ledger.retire_place(id).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSlots { place_id, date } => {
                let view = ledger
                    .list_slots(place_id, date, &requester.group.id)
                    .await
                    .map_err(ledger_err)?;

                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = view
                    .iter()
                    .map(|slot| {
                        let holder = slot.holder.as_ref();
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.place_id.to_string())?;
                        encoder.encode_field(&slot.date.to_string())?;
                        encoder.encode_field(&slot.time.to_string())?;
                        encoder.encode_field(&slot.status.to_string())?;
                        encoder.encode_field(&holder.map(|h| h.booking_id.to_string()))?;
                        encoder.encode_field(&holder.map(|h| h.reserved_by.clone()))?;
                        encoder.encode_field(&holder.map(|h| h.group.name.clone()))?;
                        encoder.encode_field(&holder.and_then(|h| h.group.parish.clone()))?;
                        encoder.encode_field(&holder.map(|h| h.reason.clone()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectQuotaStatus { date } => {
                let status = ledger.quota_status(requester, date);
                let schema = Arc::new(quota_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&status.date.to_string())?;
                encoder.encode_field(&(status.count as i64))?;
                encoder.encode_field(&(status.ceiling as i64))?;
                encoder.encode_field(&status.exempt)?;
                encoder.encode_field(&status.remaining().map(i64::from))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertBooking(request) => {
                let booking = ledger
                    .create_booking(requester, request)
                    .await
                    .map_err(ledger_err)?;
                bookings_response(ledger, &[booking])
            }
            Command::DeleteBooking { id } => {
                ledger
                    .cancel_booking(id, &requester.identity)
                    .await
                    .map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectMyBookings { filter } => {
                let identity = &requester.identity;
                let bookings = match filter {
                    BookingFilter::FromToday => {
                        ledger.list_for_requester(identity, ledger.clock().today()).await
                    }
                    BookingFilter::From(from) => ledger.list_for_requester(identity, from).await,
                    BookingFilter::On(date) => ledger.bookings_on_date(identity, date).await,
                };
                bookings_response(ledger, &bookings)
            }
        }
    }
}

fn bookings_response(ledger: &Ledger, bookings: &[Booking]) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|booking| {
            let place_name = ledger.get_place(&booking.place_id).map(|p| p.name);
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&booking.id.to_string())?;
            encoder.encode_field(&booking.place_id.to_string())?;
            encoder.encode_field(&place_name)?;
            encoder.encode_field(&booking.date.to_string())?;
            encoder.encode_field(&booking.time.to_string())?;
            encoder.encode_field(&booking.reason)?;
            encoder.encode_field(&booking.group.display_name())?;
            encoder.encode_field(&booking.requester)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn format_schedule(schedule: &[TimeOfDay]) -> String {
    schedule
        .iter()
        .map(TimeOfDay::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn require_admin(requester: &Requester) -> PgWireResult<()> {
    if requester.role == Role::ADMIN {
        Ok(())
    } else {
        Err(user_error(
            "42501",
            format!("{} may not manage places", requester.identity),
        ))
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn places_schema() -> Vec<FieldInfo> {
    ["id", "name", "description", "schedule"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn slots_schema() -> Vec<FieldInfo> {
    [
        "place_id",
        "date",
        "time",
        "status",
        "booking_id",
        "reserved_by",
        "group_name",
        "parish",
        "reason",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

fn quota_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        FieldInfo::new("count".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("ceiling".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("exempt".into(), None, None, Type::BOOL, FieldFormat::Text),
        FieldInfo::new("remaining".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    [
        "id",
        "place_id",
        "place_name",
        "date",
        "time",
        "reason",
        "group_name",
        "requester",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

/// Row shape of a statement whose parameters are not bound yet.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.trim_start().to_uppercase();
    let is_select = upper.starts_with("SELECT");
    if upper.contains("MY_BOOKINGS") || (upper.starts_with("INSERT") && upper.contains("BOOKINGS")) {
        bookings_schema()
    } else if is_select && upper.contains("QUOTA_STATUS") {
        quota_schema()
    } else if is_select && upper.contains("SLOTS") {
        slots_schema()
    } else if is_select && upper.contains("PLACES") {
        places_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoombookHandler {
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
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoombookQueryParser;

#[async_trait]
impl QueryParser for RoombookQueryParser {
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
impl ExtendedQueryHandler for RoombookHandler {
    type Statement = String;
    type QueryParser = RoombookQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql).await
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
    let mut max = 0;
    scan_placeholders(sql, |n| {
        max = max.max(n);
        None
    });
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

/// Inline bound text values as quoted literals in one left-to-right pass.
/// Bound text is never rescanned, so a `$2` inside a reason stays literal.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    scan_placeholders(sql, |n| {
        let value = match params.get(n.checked_sub(1)?)? {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        Some(value)
    })
}

/// Walk `sql` outside quoted literals and identifiers, handing every `$N` to
/// `replace`. Placeholders it returns `None` for are kept as written.
fn scan_placeholders(sql: &str, mut replace: impl FnMut(usize) -> Option<String>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    // A doubled quote is an escaped quote, not the end.
                    if chars.peek().map(|&(_, next)| next) == Some(q) {
                        if let Some((_, next)) = chars.next() {
                            out.push(next);
                        }
                    } else {
                        quote = None;
                    }
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '$' => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let placeholder = &sql[i..end];
                match sql[start..end].parse::<usize>().ok().and_then(&mut replace) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(placeholder),
                }
            }
            None => out.push(c),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoombookFactory {
    handler: Arc<RoombookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MemberAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoombookFactory {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        directory: Arc<dyn Directory>,
        password: String,
    ) -> Self {
        let auth_source = MemberAuthSource::new(password, directory.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoombookHandler::new(tenant_manager, directory)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoombookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    directory: Arc<dyn Directory>,
    password: String,
) -> std::io::Result<()> {
    let factory = RoombookFactory::new(tenant_manager, directory, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each ledger failure kind.
pub fn sqlstate(e: &LedgerError) -> &'static str {
    match e {
        LedgerError::InvalidInput(_) => "22023",
        LedgerError::PastDate(_) => "22008",
        LedgerError::Conflict { .. } => "23505",
        LedgerError::QuotaExceeded { .. } => "54000",
        LedgerError::NotFound(_) => "P0002",
        LedgerError::NotOwner(_) => "42501",
        LedgerError::AlreadyExists(_) => "42710",
        LedgerError::LimitExceeded(_) => "54000",
        LedgerError::WalError(_) => "58030",
    }
}

fn ledger_err(e: LedgerError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::Input(_) | SqlError::BadId(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
