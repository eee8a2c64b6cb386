use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::{
    audit,
    auth::{AdminSession, SessionContext},
    catalog::{ensure_max_len, ensure_references_exist, to_iso},
    error::{AppError, AppResult},
    models::{AdminNotification, DocumentRequest, NewAdminNotification, NewDocumentRequest},
    schema::{admin_notifications, document_requests, document_types, documents, users},
    scope::AccessScope,
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Fulfilled,
    Rejected,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("status must be 'fulfilled' or 'rejected'")]
pub struct InvalidStatus;

impl From<InvalidStatus> for AppError {
    fn from(err: InvalidStatus) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl RequestStatus {
    /// Only terminal states can be set by an administrator.
    pub fn parse(value: &str) -> Result<Self, InvalidStatus> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fulfilled" => Ok(RequestStatus::Fulfilled),
            "rejected" => Ok(RequestStatus::Rejected),
            _ => Err(InvalidStatus),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Rejected => "rejected",
        }
    }
}

pub const MAX_FORMAT_LEN: usize = 50;

fn requested_format(value: Option<String>) -> AppResult<String> {
    let format = required(value, "requested_format")?;
    ensure_max_len(&format, MAX_FORMAT_LEN, "requested_format")?;
    Ok(format)
}

fn required(value: Option<String>, field: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{field} is required")))
}

#[derive(Deserialize)]
pub struct NewDocumentRequestBody {
    pub document_description: Option<String>,
    pub document_type_id: Option<i32>,
    pub requested_format: Option<String>,
}

pub async fn request_new_document(
    State(state): State<AppState>,
    session: SessionContext,
    Json(payload): Json<NewDocumentRequestBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let description = required(payload.document_description, "document_description")?;
    let requested_format = requested_format(payload.requested_format)?;
    let document_type_id = payload
        .document_type_id
        .ok_or_else(|| AppError::bad_request("document_type_id is required"))?;

    let mut conn = state.db()?;
    ensure_references_exist(&mut conn, &[], &[], Some(document_type_id))?;
    let type_name: String = document_types::table
        .find(document_type_id)
        .select(document_types::name)
        .first(&mut conn)?;

    let request_id = conn.transaction::<_, AppError, _>(|conn| {
        let request_id: i32 = diesel::insert_into(document_requests::table)
            .values(&NewDocumentRequest {
                user_id: session.user_id,
                document_id: None,
                requested_document_description: Some(description.clone()),
                document_type_id: Some(document_type_id),
                requested_format: requested_format.clone(),
            })
            .returning(document_requests::id)
            .get_result(conn)?;

        diesel::insert_into(admin_notifications::table)
            .values(&NewAdminNotification {
                user_id: session.user_id,
                document_id: None,
                requested_document_description: Some(description.clone()),
                message: format!(
                    "User {} requested a new document: '{}' (Type: {}) in format '{}'.",
                    session.username, description, type_name, requested_format
                ),
            })
            .execute(conn)?;

        audit::record(
            conn,
            Some(session.user_id),
            audit::NEW_DOCUMENT_REQUEST,
            format!(
                "Requested new document '{description}' (type: {type_name}, format: {requested_format})"
            ),
        )?;
        Ok(request_id)
    })?;

    info!(
        request_id,
        user_id = session.user_id,
        document_type_id,
        "new document requested"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "document request submitted", "id": request_id })),
    ))
}

#[derive(Deserialize)]
pub struct FormatRequestBody {
    pub requested_format: Option<String>,
}

pub async fn request_document_format(
    State(state): State<AppState>,
    session: SessionContext,
    Path(document_id): Path<i32>,
    Json(payload): Json<FormatRequestBody>,
) -> AppResult<Json<Value>> {
    let requested_format = requested_format(payload.requested_format)?;
    let scope = AccessScope::for_session(&session)?;

    let mut conn = state.db()?;
    if !scope.document_visible(&mut conn, document_id)? {
        info!(document_id, user_id = session.user_id, "format request outside scope");
        return Err(AppError::missing("document"));
    }

    let request_id = conn.transaction::<_, AppError, _>(|conn| {
        let request_id: i32 = diesel::insert_into(document_requests::table)
            .values(&NewDocumentRequest {
                user_id: session.user_id,
                document_id: Some(document_id),
                requested_document_description: None,
                document_type_id: None,
                requested_format: requested_format.clone(),
            })
            .returning(document_requests::id)
            .get_result(conn)?;

        diesel::insert_into(admin_notifications::table)
            .values(&NewAdminNotification {
                user_id: session.user_id,
                document_id: Some(document_id),
                requested_document_description: None,
                message: format!(
                    "User {} requested format '{}' for document ID: {}.",
                    session.username, requested_format, document_id
                ),
            })
            .execute(conn)?;

        audit::record(
            conn,
            Some(session.user_id),
            audit::DOCUMENT_FORMAT_REQUEST,
            format!("Requested format '{requested_format}' for document ID {document_id}"),
        )?;
        Ok(request_id)
    })?;

    info!(request_id, document_id, user_id = session.user_id, "format requested");
    Ok(Json(json!({ "message": "format request submitted", "id": request_id })))
}

#[derive(Serialize)]
pub struct RequestView {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub document_id: Option<i32>,
    pub document_title: Option<String>,
    pub requested_document_description: Option<String>,
    pub document_type_id: Option<i32>,
    pub document_type: Option<String>,
    pub requested_format: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct NotificationView {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub document_id: Option<i32>,
    pub document_title: Option<String>,
    pub requested_document_description: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct RequestsOverview {
    pub requests: Vec<RequestView>,
    pub notifications: Vec<NotificationView>,
}

pub async fn list_requests(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> AppResult<Json<RequestsOverview>> {
    let mut conn = state.db()?;

    let request_rows: Vec<(DocumentRequest, String, Option<String>)> = document_requests::table
        .inner_join(users::table)
        .left_join(documents::table)
        .order((document_requests::created_at.desc(), document_requests::id.desc()))
        .select((
            document_requests::all_columns,
            users::username,
            documents::title.nullable(),
        ))
        .load(&mut conn)?;

    let type_ids: Vec<i32> = request_rows
        .iter()
        .filter_map(|(request, _, _)| request.document_type_id)
        .collect();
    let type_names: HashMap<i32, String> = if type_ids.is_empty() {
        HashMap::new()
    } else {
        document_types::table
            .filter(document_types::id.eq_any(&type_ids))
            .select((document_types::id, document_types::name))
            .load::<(i32, String)>(&mut conn)?
            .into_iter()
            .collect()
    };

    let notification_rows: Vec<(AdminNotification, String, Option<String>)> =
        admin_notifications::table
            .inner_join(users::table)
            .left_join(documents::table)
            .order((
                admin_notifications::created_at.desc(),
                admin_notifications::id.desc(),
            ))
            .select((
                admin_notifications::all_columns,
                users::username,
                documents::title.nullable(),
            ))
            .load(&mut conn)?;

    let requests = request_rows
        .into_iter()
        .map(|(request, username, document_title)| RequestView {
            id: request.id,
            user_id: request.user_id,
            username,
            document_id: request.document_id,
            document_title,
            document_type: request
                .document_type_id
                .and_then(|id| type_names.get(&id).cloned()),
            requested_document_description: request.requested_document_description,
            document_type_id: request.document_type_id,
            requested_format: request.requested_format,
            status: request.status,
            created_at: to_iso(request.created_at),
        })
        .collect();

    let notifications = notification_rows
        .into_iter()
        .map(|(notification, username, document_title)| NotificationView {
            id: notification.id,
            user_id: notification.user_id,
            username,
            document_id: notification.document_id,
            document_title,
            requested_document_description: notification.requested_document_description,
            message: notification.message,
            is_read: notification.is_read,
            created_at: to_iso(notification.created_at),
        })
        .collect();

    Ok(Json(RequestsOverview {
        requests,
        notifications,
    }))
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: String,
}

pub async fn update_request_status(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(request_id): Path<i32>,
    Json(payload): Json<StatusUpdate>,
) -> AppResult<Json<Value>> {
    let status = RequestStatus::parse(&payload.status)?;
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let updated = diesel::update(document_requests::table.find(request_id))
            .set(document_requests::status.eq(status.as_str()))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::missing("document request"));
        }
        audit::record(
            conn,
            Some(admin.user_id),
            audit::DOCUMENT_REQUEST_UPDATE,
            format!("Document request ID {request_id} marked {}", status.as_str()),
        )?;
        Ok(())
    })?;

    info!(request_id, status = status.as_str(), "document request updated");
    Ok(Json(json!({
        "message": format!("request marked {}", status.as_str()),
    })))
}

pub async fn delete_request(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(request_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let deleted =
            diesel::delete(document_requests::table.find(request_id)).execute(conn)?;
        if deleted == 0 {
            return Err(AppError::missing("document request"));
        }
        audit::record(
            conn,
            Some(admin.user_id),
            audit::DOCUMENT_REQUEST_DELETE,
            format!("Document request ID {request_id} deleted"),
        )?;
        Ok(())
    })?;

    info!(request_id, "document request deleted");
    Ok(Json(json!({ "message": "request deleted" })))
}

/// Dismissing a notification removes it.
pub async fn dismiss_notification(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(notification_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let deleted = diesel::delete(admin_notifications::table.find(notification_id))
            .execute(conn)?;
        if deleted == 0 {
            return Err(AppError::missing("notification"));
        }
        audit::record(
            conn,
            Some(admin.user_id),
            audit::ADMIN_NOTIFICATION_DELETE,
            format!("Notification ID {notification_id} dismissed"),
        )?;
        Ok(())
    })?;

    info!(notification_id, "notification dismissed");
    Ok(Json(json!({ "message": "notification dismissed" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminal_statuses_are_accepted() {
        assert_eq!(RequestStatus::parse("fulfilled"), Ok(RequestStatus::Fulfilled));
        assert_eq!(RequestStatus::parse(" Rejected "), Ok(RequestStatus::Rejected));
        assert_eq!(RequestStatus::parse("pending"), Err(InvalidStatus));
        assert_eq!(RequestStatus::parse(""), Err(InvalidStatus));
    }

    #[test]
    fn invalid_status_is_a_bad_request() {
        let err: AppError = InvalidStatus.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn overlong_formats_are_rejected() {
        assert_eq!(requested_format(Some("dwg".into())).unwrap(), "dwg");
        let err = requested_format(Some("x".repeat(MAX_FORMAT_LEN + 1))).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(required(Some("  ".into()), "requested_format").is_err());
        assert!(required(None, "requested_format").is_err());
        assert_eq!(required(Some(" pdf ".into()), "requested_format").unwrap(), "pdf");
    }
}
