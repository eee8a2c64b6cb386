use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use serde::Serialize;
use tracing::warn;

use crate::catalog::{to_iso, Page, Pagination};
use crate::error::{AppError, AppResult};
use crate::models::{NewAuditLog, NewDownloadLog};
use crate::schema::{audit_logs, download_logs};

pub const LOGIN: &str = "login";
pub const DOCUMENT_UPLOAD: &str = "document_upload";
pub const DOCUMENT_BULK_UPLOAD: &str = "document_bulk_upload";
pub const DOCUMENT_UPDATE: &str = "document_update";
pub const DOCUMENT_DELETE: &str = "document_delete";
pub const USER_CREATE: &str = "user_create";
pub const USER_UPDATE: &str = "user_update";
pub const USER_PASSWORD_RESET: &str = "user_password_reset";
pub const USER_ACTIVATE: &str = "user_activate";
pub const USER_DEACTIVATE: &str = "user_deactivate";
pub const USER_DELETE_ATTEMPT: &str = "user_delete_attempt";
pub const ADD_DEPARTMENT: &str = "add_department";
pub const DELETE_DEPARTMENT: &str = "delete_department";
pub const ADD_DOCUMENT_TYPE: &str = "add_document_type";
pub const DELETE_DOCUMENT_TYPE: &str = "delete_document_type";
pub const NEW_DOCUMENT_REQUEST: &str = "new_document_request";
pub const DOCUMENT_FORMAT_REQUEST: &str = "document_format_request";
pub const DOCUMENT_REQUEST_UPDATE: &str = "document_request_update";
pub const DOCUMENT_REQUEST_DELETE: &str = "document_request_delete";
pub const ADMIN_NOTIFICATION_DELETE: &str = "admin_notification_delete";

/// Action tag under which download log rows surface in the merged view.
pub const DOWNLOAD_ACTION: &str = "document_download";

pub const DEFAULT_LOGS_PER_PAGE: i64 = 20;

pub fn record(
    conn: &mut PgConnection,
    user_id: Option<i32>,
    action: &str,
    details: impl Into<String>,
) -> QueryResult<()> {
    diesel::insert_into(audit_logs::table)
        .values(&NewAuditLog {
            user_id,
            action: action.to_string(),
            details: Some(details.into()),
        })
        .execute(conn)?;
    Ok(())
}

/// Like [`record`], but a failure only produces a warning.
pub fn record_best_effort(
    conn: &mut PgConnection,
    user_id: Option<i32>,
    action: &str,
    details: impl Into<String>,
) {
    if let Err(err) = record(conn, user_id, action, details) {
        warn!(error = %err, action, "failed to write audit log");
    }
}

pub fn record_download(conn: &mut PgConnection, document_id: i32, user_id: i32) -> QueryResult<()> {
    diesel::insert_into(download_logs::table)
        .values(&NewDownloadLog {
            document_id,
            user_id,
        })
        .execute(conn)?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActionFilter {
    #[default]
    All,
    Downloads,
    Audit(String),
}

impl ActionFilter {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some("all") => ActionFilter::All,
            Some(DOWNLOAD_ACTION) => ActionFilter::Downloads,
            Some(tag) => ActionFilter::Audit(tag.to_string()),
        }
    }

    fn includes_downloads(&self) -> bool {
        matches!(self, ActionFilter::All | ActionFilter::Downloads)
    }

    fn includes_audit(&self) -> bool {
        matches!(self, ActionFilter::All | ActionFilter::Audit(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub user_id: Option<i32>,
    pub action: ActionFilter,
    pub document_id: Option<i32>,
    pub start: Option<NaiveDateTime>,
    /// Exclusive upper bound.
    pub end_before: Option<NaiveDateTime>,
}

impl LogQuery {
    pub fn with_bounds(mut self, start: Option<&str>, end: Option<&str>) -> AppResult<Self> {
        if let Some(raw) = start.filter(|raw| !raw.trim().is_empty()) {
            let (instant, _) = parse_bound(raw)?;
            self.start = Some(instant);
        }
        if let Some(raw) = end.filter(|raw| !raw.trim().is_empty()) {
            let (instant, date_only) = parse_bound(raw)?;
            let step = if date_only {
                Duration::days(1)
            } else {
                Duration::microseconds(1)
            };
            let end_before = instant
                .checked_add_signed(step)
                .ok_or_else(|| AppError::bad_request(format!("invalid date '{}'", raw.trim())))?;
            self.end_before = Some(end_before);
        }
        Ok(self)
    }

    fn includes_audit(&self) -> bool {
        // audit rows carry no document reference
        self.action.includes_audit() && self.document_id.is_none()
    }

    fn includes_downloads(&self) -> bool {
        self.action.includes_downloads()
    }
}

/// Parses `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS]` (UTC) or RFC 3339. The flag is
/// set for date-only input.
fn parse_bound(raw: &str) -> AppResult<(NaiveDateTime, bool)> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok((midnight, true));
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok((parsed.naive_utc(), false));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok((parsed, false));
        }
    }
    Err(AppError::bad_request(format!("invalid date '{raw}'")))
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i32,
    pub occurred_at: String,
    pub action: String,
    pub username: Option<String>,
    pub details: Option<String>,
    pub document_id: Option<i32>,
    pub document_title: Option<String>,
    pub source: String,
}

#[derive(QueryableByName)]
struct LogRow {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = Timestamptz)]
    occurred_at: NaiveDateTime,
    #[diesel(sql_type = Text)]
    action: String,
    #[diesel(sql_type = Nullable<Text>)]
    username: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    details: Option<String>,
    #[diesel(sql_type = Nullable<Integer>)]
    document_id: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    document_title: Option<String>,
    #[diesel(sql_type = Text)]
    source: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        Self {
            id: row.id,
            occurred_at: to_iso(row.occurred_at),
            action: row.action,
            username: row.username,
            details: row.details,
            document_id: row.document_id,
            document_title: row.document_title,
            source: row.source,
        }
    }
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Int(i32),
    Text(String),
    Timestamp(NaiveDateTime),
    BigInt(i64),
}

/// Raw SQL with `$n` placeholders numbered in push order.
#[derive(Debug, Default)]
struct SqlBuilder {
    sql: String,
    binds: Vec<Bind>,
}

impl SqlBuilder {
    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn push_bind(&mut self, bind: Bind) -> &mut Self {
        self.binds.push(bind);
        self.sql.push_str(&format!("${}", self.binds.len()));
        self
    }

    fn push_where(&mut self, clauses: Vec<(&str, Bind)>) {
        for (index, (clause, bind)) in clauses.into_iter().enumerate() {
            self.push(if index == 0 { " WHERE " } else { " AND " });
            self.push(clause);
            self.push_bind(bind);
        }
    }

    fn into_query(self) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
        let mut query = diesel::sql_query(self.sql).into_boxed::<Pg>();
        for bind in self.binds {
            query = match bind {
                Bind::Int(value) => query.bind::<Integer, _>(value),
                Bind::Text(value) => query.bind::<Text, _>(value),
                Bind::Timestamp(value) => query.bind::<Timestamptz, _>(value),
                Bind::BigInt(value) => query.bind::<BigInt, _>(value),
            };
        }
        query
    }
}

const AUDIT_SELECT: &str = "SELECT al.id, al.created_at AS occurred_at, al.action::text AS action, \
     u.username::text AS username, al.details, NULL::integer AS document_id, \
     NULL::text AS document_title, 'audit'::text AS source \
     FROM audit_logs al LEFT JOIN users u ON al.user_id = u.id";

const DOWNLOAD_SELECT: &str = "SELECT dl.id, dl.downloaded_at AS occurred_at, \
     'document_download'::text AS action, u.username::text AS username, \
     d.title::text AS details, d.id AS document_id, d.title::text AS document_title, \
     'download'::text AS source \
     FROM download_logs dl JOIN users u ON dl.user_id = u.id \
     JOIN documents d ON dl.document_id = d.id";

/// Appends the `UNION ALL` of the sources `query` selects. Returns false when
/// no source can match.
fn push_union(builder: &mut SqlBuilder, query: &LogQuery) -> bool {
    let mut parts = 0;

    if query.includes_downloads() {
        let mut clauses = Vec::new();
        if let Some(user_id) = query.user_id {
            clauses.push(("dl.user_id = ", Bind::Int(user_id)));
        }
        if let Some(document_id) = query.document_id {
            clauses.push(("dl.document_id = ", Bind::Int(document_id)));
        }
        if let Some(start) = query.start {
            clauses.push(("dl.downloaded_at >= ", Bind::Timestamp(start)));
        }
        if let Some(end) = query.end_before {
            clauses.push(("dl.downloaded_at < ", Bind::Timestamp(end)));
        }
        builder.push(DOWNLOAD_SELECT);
        builder.push_where(clauses);
        parts += 1;
    }

    if query.includes_audit() {
        let mut clauses = Vec::new();
        if let Some(user_id) = query.user_id {
            clauses.push(("al.user_id = ", Bind::Int(user_id)));
        }
        if let ActionFilter::Audit(tag) = &query.action {
            clauses.push(("al.action = ", Bind::Text(tag.clone())));
        }
        if let Some(start) = query.start {
            clauses.push(("al.created_at >= ", Bind::Timestamp(start)));
        }
        if let Some(end) = query.end_before {
            clauses.push(("al.created_at < ", Bind::Timestamp(end)));
        }
        if parts > 0 {
            builder.push(" UNION ALL ");
        }
        builder.push(AUDIT_SELECT);
        builder.push_where(clauses);
        parts += 1;
    }

    parts > 0
}

/// Merged, newest-first page of audit and download records.
pub fn query_logs(
    conn: &mut PgConnection,
    query: &LogQuery,
    window: Pagination,
) -> QueryResult<Page<LogEntry>> {
    let mut count = SqlBuilder::default();
    count.push("SELECT COUNT(*) AS count FROM (");
    if !push_union(&mut count, query) {
        return Ok(window.envelope(Vec::new(), 0));
    }
    count.push(") AS merged");
    let total: CountRow = count.into_query().get_result(conn)?;

    let mut page = SqlBuilder::default();
    page.push("SELECT * FROM (");
    push_union(&mut page, query);
    page.push(") AS merged ORDER BY occurred_at DESC, source ASC, id DESC LIMIT ")
        .push_bind(Bind::BigInt(window.per_page))
        .push(" OFFSET ")
        .push_bind(Bind::BigInt(window.offset()));
    let rows: Vec<LogRow> = page.into_query().load(conn)?;

    Ok(window.envelope(rows.into_iter().map(LogEntry::from).collect(), total.count))
}
