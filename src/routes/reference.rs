use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    audit,
    auth::{AdminSession, SessionContext},
    catalog::{ensure_max_len, NamedRef},
    error::{AppError, AppResult},
    schema::{departments, document_types, plants},
    state::AppState,
};

pub async fn list_plants(
    State(state): State<AppState>,
    _session: SessionContext,
) -> AppResult<Json<Vec<NamedRef>>> {
    let mut conn = state.db()?;
    let rows: Vec<(i32, String)> = plants::table
        .order(plants::name.asc())
        .select((plants::id, plants::name))
        .load(&mut conn)?;
    Ok(Json(to_refs(rows)))
}

pub async fn list_departments(
    State(state): State<AppState>,
    _session: SessionContext,
) -> AppResult<Json<Vec<NamedRef>>> {
    let mut conn = state.db()?;
    let rows: Vec<(i32, String)> = departments::table
        .order(departments::name.asc())
        .select((departments::id, departments::name))
        .load(&mut conn)?;
    Ok(Json(to_refs(rows)))
}

pub async fn list_document_types(
    State(state): State<AppState>,
    _session: SessionContext,
) -> AppResult<Json<Vec<NamedRef>>> {
    let mut conn = state.db()?;
    let rows: Vec<(i32, String)> = document_types::table
        .order(document_types::name.asc())
        .select((document_types::id, document_types::name))
        .load(&mut conn)?;
    Ok(Json(to_refs(rows)))
}

fn to_refs(rows: Vec<(i32, String)>) -> Vec<NamedRef> {
    rows.into_iter()
        .map(|(id, name)| NamedRef { id, name })
        .collect()
}

#[derive(Deserialize)]
pub struct NameRequest {
    #[serde(default)]
    pub name: String,
}

const MAX_NAME_LEN: usize = 100;

fn required_name(payload: &NameRequest, entity: &str) -> AppResult<String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request(format!("{entity} name is required")));
    }
    ensure_max_len(name, MAX_NAME_LEN, "name")?;
    Ok(name.to_string())
}

fn duplicate_as_conflict(entity: &str, name: &str) -> impl FnOnce(DieselError) -> AppError {
    let message = format!("{entity} '{name}' already exists");
    move |err| match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::conflict(message)
        }
        other => AppError::from(other),
    }
}

fn referenced_as_conflict(entity: &str) -> impl FnOnce(DieselError) -> AppError {
    let message = format!(
        "{entity} is still referenced by documents or users; reassign them before deleting"
    );
    move |err| match err {
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
            AppError::conflict(message)
        }
        other => AppError::from(other),
    }
}

pub async fn add_department(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Json(payload): Json<NameRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let name = required_name(&payload, "department")?;
    let mut conn = state.db()?;

    let id = conn.transaction::<_, AppError, _>(|conn| {
        let id: i32 = diesel::insert_into(departments::table)
            .values(departments::name.eq(&name))
            .returning(departments::id)
            .get_result(conn)
            .map_err(duplicate_as_conflict("department", &name))?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::ADD_DEPARTMENT,
            format!("Department \"{name}\" (ID: {id}) added"),
        )?;
        Ok(id)
    })?;

    info!(department_id = id, name = %name, "department added");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "department added", "id": id })),
    ))
}

pub async fn delete_department(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(department_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let name: String = departments::table
            .find(department_id)
            .select(departments::name)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::missing("department"))?;
        diesel::delete(departments::table.find(department_id))
            .execute(conn)
            .map_err(referenced_as_conflict("department"))?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::DELETE_DEPARTMENT,
            format!("Department \"{name}\" (ID: {department_id}) deleted"),
        )?;
        Ok(())
    })?;

    info!(department_id, "department deleted");
    Ok(Json(json!({ "message": "department deleted" })))
}

pub async fn add_document_type(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Json(payload): Json<NameRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let name = required_name(&payload, "document type")?;
    let mut conn = state.db()?;

    let id = conn.transaction::<_, AppError, _>(|conn| {
        let id: i32 = diesel::insert_into(document_types::table)
            .values(document_types::name.eq(&name))
            .returning(document_types::id)
            .get_result(conn)
            .map_err(duplicate_as_conflict("document type", &name))?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::ADD_DOCUMENT_TYPE,
            format!("Document type \"{name}\" (ID: {id}) added"),
        )?;
        Ok(id)
    })?;

    info!(document_type_id = id, name = %name, "document type added");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "document type added", "id": id })),
    ))
}

pub async fn delete_document_type(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(document_type_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let name: String = document_types::table
            .find(document_type_id)
            .select(document_types::name)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::missing("document type"))?;
        diesel::delete(document_types::table.find(document_type_id))
            .execute(conn)
            .map_err(referenced_as_conflict("document type"))?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::DELETE_DOCUMENT_TYPE,
            format!("Document type \"{name}\" (ID: {document_type_id}) deleted"),
        )?;
        Ok(())
    })?;

    info!(document_type_id, "document type deleted");
    Ok(Json(json!({ "message": "document type deleted" })))
}
