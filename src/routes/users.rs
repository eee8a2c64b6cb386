use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::id_list;
use crate::{
    audit,
    auth::{password, AdminSession, Role},
    catalog::{dedup, ensure_max_len, ensure_references_exist, to_iso, NamedRef},
    error::{AppError, AppResult},
    models::{Department, NewUser, NewUserDepartment, NewUserPlant, Plant, User},
    schema::{departments, plants, user_departments, user_plants, users},
    state::AppState,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentNames {
    pub plants: Vec<NamedRef>,
    pub departments: Vec<NamedRef>,
}

/// Plant and department ids a user is assigned to.
pub(crate) fn load_scope_ids(
    conn: &mut PgConnection,
    user_id: i32,
) -> QueryResult<(Vec<i32>, Vec<i32>)> {
    let plant_ids: Vec<i32> = user_plants::table
        .filter(user_plants::user_id.eq(user_id))
        .select(user_plants::plant_id)
        .order(user_plants::plant_id.asc())
        .load(conn)?;
    let department_ids: Vec<i32> = user_departments::table
        .filter(user_departments::user_id.eq(user_id))
        .select(user_departments::department_id)
        .order(user_departments::department_id.asc())
        .load(conn)?;
    Ok((plant_ids, department_ids))
}

pub(crate) fn load_assignments(
    conn: &mut PgConnection,
    user_ids: &[i32],
) -> QueryResult<HashMap<i32, AssignmentNames>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let plant_rows: Vec<(i32, Plant)> = user_plants::table
        .inner_join(plants::table)
        .filter(user_plants::user_id.eq_any(user_ids))
        .order(plants::name.asc())
        .select((user_plants::user_id, plants::all_columns))
        .load(conn)?;
    let department_rows: Vec<(i32, Department)> = user_departments::table
        .inner_join(departments::table)
        .filter(user_departments::user_id.eq_any(user_ids))
        .order(departments::name.asc())
        .select((user_departments::user_id, departments::all_columns))
        .load(conn)?;

    let mut map: HashMap<i32, AssignmentNames> = HashMap::new();
    for (user_id, plant) in plant_rows {
        map.entry(user_id).or_default().plants.push(plant.into());
    }
    for (user_id, department) in department_rows {
        map.entry(user_id)
            .or_default()
            .departments
            .push(department.into());
    }
    Ok(map)
}

const MAX_USERNAME_LEN: usize = 80;
const MAX_EMAIL_LEN: usize = 120;

/// Checks role and assignment rules shared by create and update.
pub(crate) fn validate_user_fields(
    username: &str,
    role: Option<&str>,
    plant_ids: &[i32],
    department_ids: &[i32],
) -> AppResult<Role> {
    if username.trim().is_empty() {
        return Err(AppError::bad_request("username is required"));
    }
    ensure_max_len(username.trim(), MAX_USERNAME_LEN, "username")?;
    let role = match role.map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Role::parse(raw)
            .ok_or_else(|| AppError::bad_request("role must be 'admin' or 'user'"))?,
        None => Role::User,
    };
    if role != Role::Admin && (plant_ids.is_empty() || department_ids.is_empty()) {
        return Err(AppError::bad_request(
            "users must have at least one plant and one department",
        ));
    }
    Ok(role)
}

fn normalize_email(email: Option<String>) -> AppResult<Option<String>> {
    let email = email
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(email) = &email {
        ensure_max_len(email, MAX_EMAIL_LEN, "email")?;
    }
    Ok(email)
}

fn link_user(
    conn: &mut PgConnection,
    user_id: i32,
    plant_ids: &[i32],
    department_ids: &[i32],
) -> QueryResult<()> {
    let plant_rows: Vec<NewUserPlant> = dedup(plant_ids)
        .into_iter()
        .map(|plant_id| NewUserPlant { user_id, plant_id })
        .collect();
    if !plant_rows.is_empty() {
        diesel::insert_into(user_plants::table)
            .values(&plant_rows)
            .execute(conn)?;
    }

    let department_rows: Vec<NewUserDepartment> = dedup(department_ids)
        .into_iter()
        .map(|department_id| NewUserDepartment {
            user_id,
            department_id,
        })
        .collect();
    if !department_rows.is_empty() {
        diesel::insert_into(user_departments::table)
            .values(&department_rows)
            .execute(conn)?;
    }
    Ok(())
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
    #[serde(flatten)]
    pub assignments: AssignmentNames,
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<User> = users::table
        .order((users::created_at.desc(), users::id.desc()))
        .load(&mut conn)?;
    let ids: Vec<i32> = rows.iter().map(|user| user.id).collect();
    let mut assignments = load_assignments(&mut conn, &ids)?;

    Ok(Json(
        rows.into_iter()
            .map(|user| UserResponse {
                assignments: assignments.remove(&user.id).unwrap_or_default(),
                id: user.id,
                username: user.username,
                email: user.email,
                role: user.role,
                is_active: user.is_active,
                created_at: to_iso(user.created_at),
                last_login: user.last_login.map(to_iso),
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub email: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "id_list")]
    pub plant_ids: Vec<i32>,
    #[serde(default, deserialize_with = "id_list")]
    pub department_ids: Vec<i32>,
}

pub async fn create_user(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let username = payload.username.trim().to_string();
    if username.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }
    let role = validate_user_fields(
        &username,
        payload.role.as_deref(),
        &payload.plant_ids,
        &payload.department_ids,
    )
    .map_err(|err| {
        warn!(username = %username, error = %err, "user creation rejected");
        err
    })?;
    let email = normalize_email(payload.email)?;

    let password_hash = password::hash_password(&payload.password)?;
    let mut conn = state.db()?;
    ensure_references_exist(&mut conn, &payload.plant_ids, &payload.department_ids, None)?;

    let taken = users::table
        .filter(users::username.eq(&username))
        .select(users::id)
        .first::<i32>(&mut conn)
        .optional()?;
    if taken.is_some() {
        return Err(AppError::conflict(format!(
            "username '{username}' already exists"
        )));
    }

    let user_id = conn.transaction::<_, AppError, _>(|conn| {
        let user_id: i32 = diesel::insert_into(users::table)
            .values(&NewUser {
                username: username.clone(),
                password_hash,
                email,
                role: role.as_str().to_string(),
            })
            .returning(users::id)
            .get_result(conn)?;
        link_user(conn, user_id, &payload.plant_ids, &payload.department_ids)?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::USER_CREATE,
            format!("User {username} created"),
        )?;
        Ok(user_id)
    })?;

    info!(user_id, username = %username, role = role.as_str(), "user created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "user created", "id": user_id })),
    ))
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: String,
    pub email: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "id_list")]
    pub plant_ids: Vec<i32>,
    #[serde(default, deserialize_with = "id_list")]
    pub department_ids: Vec<i32>,
}

pub async fn update_user(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(user_id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<Value>> {
    let username = payload.username.trim().to_string();
    let role = validate_user_fields(
        &username,
        payload.role.as_deref(),
        &payload.plant_ids,
        &payload.department_ids,
    )?;
    let email = normalize_email(payload.email)?;

    let mut conn = state.db()?;
    ensure_references_exist(&mut conn, &payload.plant_ids, &payload.department_ids, None)?;

    conn.transaction::<_, AppError, _>(|conn| {
        let updated = diesel::update(users::table.find(user_id))
            .set((
                users::username.eq(&username),
                users::role.eq(role.as_str()),
                users::email.eq(email),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::missing("user"));
        }

        diesel::delete(user_plants::table.filter(user_plants::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(user_departments::table.filter(user_departments::user_id.eq(user_id)))
            .execute(conn)?;
        link_user(conn, user_id, &payload.plant_ids, &payload.department_ids)?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::USER_UPDATE,
            format!("User {username} (ID: {user_id}) updated"),
        )?;
        Ok(())
    })?;

    info!(user_id, "user updated");
    Ok(Json(json!({ "message": "user updated" })))
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(user_id): Path<i32>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    if payload.password.is_empty() {
        return Err(AppError::bad_request("password is required"));
    }
    let password_hash = password::hash_password(&payload.password)?;

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let updated = diesel::update(users::table.find(user_id))
            .set(users::password_hash.eq(&password_hash))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::missing("user"));
        }
        audit::record(
            conn,
            Some(admin.user_id),
            audit::USER_PASSWORD_RESET,
            format!("Password reset for user ID {user_id}"),
        )?;
        Ok(())
    })?;

    info!(user_id, "password reset");
    Ok(Json(json!({ "message": "password reset successful" })))
}

pub async fn activate_user(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Value>> {
    set_active(&state, admin.user_id, user_id, true)?;
    Ok(Json(json!({ "message": "user activated" })))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Value>> {
    set_active(&state, admin.user_id, user_id, false)?;
    Ok(Json(json!({ "message": "user deactivated" })))
}

fn set_active(state: &AppState, admin_id: i32, user_id: i32, active: bool) -> AppResult<()> {
    let (action, verb) = if active {
        (audit::USER_ACTIVATE, "activated")
    } else {
        (audit::USER_DEACTIVATE, "deactivated")
    };

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let updated = diesel::update(users::table.find(user_id))
            .set(users::is_active.eq(active))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::missing("user"));
        }
        audit::record(
            conn,
            Some(admin_id),
            action,
            format!("User ID {user_id} {verb}"),
        )?;
        Ok(())
    })?;

    info!(user_id, active, "user activation changed");
    Ok(())
}

/// Accounts are never removed; the attempt is only recorded.
pub async fn delete_user(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    audit::record_best_effort(
        &mut conn,
        Some(admin.user_id),
        audit::USER_DELETE_ATTEMPT,
        format!("Attempted to delete user ID: {user_id} (deletion disabled)"),
    );
    warn!(user_id, admin_id = admin.user_id, "user deletion attempted");
    Err(AppError::forbidden("user deletion is disabled"))
}
