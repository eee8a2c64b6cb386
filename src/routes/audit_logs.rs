use axum::extract::{Json, Query, State};
use serde::Deserialize;
use tracing::debug;

use crate::{
    audit::{self, ActionFilter, LogEntry, LogQuery},
    auth::AdminSession,
    catalog::{Page, Pagination},
    error::AppResult,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogParams {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub document_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

impl AuditLogParams {
    fn to_query(&self) -> AppResult<LogQuery> {
        let id = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse().ok());
        LogQuery {
            user_id: id(&self.user_id),
            action: ActionFilter::parse(self.action.as_deref()),
            document_id: id(&self.document_id),
            ..Default::default()
        }
        .with_bounds(self.start_date.as_deref(), self.end_date.as_deref())
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    _admin: AdminSession,
    Query(params): Query<AuditLogParams>,
) -> AppResult<Json<Page<LogEntry>>> {
    let query = params.to_query()?;
    let window = Pagination::parse(
        params.page.as_deref(),
        params.per_page.as_deref(),
        audit::DEFAULT_LOGS_PER_PAGE,
    );
    debug!(?query, page = window.page, per_page = window.per_page, "querying logs");

    let mut conn = state.db()?;
    let page = audit::query_logs(&mut conn, &query, window)?;
    Ok(Json(page))
}
