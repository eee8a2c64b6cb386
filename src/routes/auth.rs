use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::users::{load_assignments, load_scope_ids, AssignmentNames};
use crate::{
    audit,
    auth::{password, session::SessionSubject, AuthError, Role, SessionContext, SESSION_COOKIE_NAME},
    error::{AppError, AppResult},
    models::User,
    schema::users::dsl,
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: SessionContext,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }

    let mut conn = state.db()?;

    let user: User = dsl::users
        .filter(dsl::username.eq(username))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| {
            info!(username, "login failed: unknown user");
            AuthError::InvalidCredentials
        })?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AuthError::InvalidCredentials)?;
    if !valid {
        info!(user_id = user.id, "login failed: password mismatch");
        return Err(AuthError::InvalidCredentials.into());
    }
    if !user.is_active {
        warn!(user_id = user.id, "login refused: account deactivated");
        return Err(AuthError::InvalidCredentials.into());
    }

    let role = Role::parse(&user.role)
        .ok_or_else(|| AppError::internal(format!("user {} has unknown role", user.id)))?;
    let (plant_ids, department_ids) = load_scope_ids(&mut conn, user.id)?;

    let access_token = state
        .sessions
        .issue(SessionSubject {
            user_id: user.id,
            username: &user.username,
            role: role.as_str(),
            plant_ids: &plant_ids,
            department_ids: &department_ids,
        })
        .map_err(AppError::from)?;

    diesel::update(dsl::users.find(user.id))
        .set(dsl::last_login.eq(Some(Utc::now().naive_utc())))
        .execute(&mut conn)?;
    audit::record_best_effort(
        &mut conn,
        Some(user.id),
        audit::LOGIN,
        format!("User {} logged in", user.username),
    );

    info!(
        user_id = user.id,
        role = role.as_str(),
        plants = plant_ids.len(),
        departments = department_ids.len(),
        "login succeeded"
    );

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_session_cookie(&state, &access_token)?);

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.sessions.expiry_seconds(),
            user: SessionContext {
                user_id: user.id,
                username: user.username,
                role,
                plant_ids,
                department_ids,
            },
        }),
    ))
}

pub async fn logout(State(state): State<AppState>) -> AppResult<(HeaderMap, Json<Value>)> {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_session_cookie(&state)?);
    Ok((headers, Json(json!({ "message": "logged out" }))))
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    #[serde(flatten)]
    pub assignments: AssignmentNames,
}

pub async fn profile(
    State(state): State<AppState>,
    session: SessionContext,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let user: User = dsl::users
        .find(session.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::missing("user"))?;
    let assignments = load_assignments(&mut conn, &[user.id])?
        .remove(&user.id)
        .unwrap_or_default();

    Ok(Json(ProfileResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        assignments,
    }))
}

fn build_session_cookie(state: &AppState, token: &str) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}={}", SESSION_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push(format!("Max-Age={}", state.sessions.expiry_seconds()));
    if state.config.session_cookie_secure {
        parts.push("Secure".into());
    }

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid session cookie: {err}")))
}

fn build_clear_session_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", SESSION_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    if state.config.session_cookie_secure {
        parts.push("Secure".into());
    }

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid session cookie: {err}")))
}
