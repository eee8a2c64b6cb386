pub mod password;
pub mod session;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{error::AppError, state::AppState};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        AppError::new(axum::http::StatusCode::UNAUTHORIZED, value.to_string())
    }
}

/// The caller's identity as recorded in the session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: i32,
    pub username: String,
    pub role: Role,
    pub plant_ids: Vec<i32>,
    pub department_ids: Vec<i32>,
}

impl SessionContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[async_trait]
impl FromRequestParts<AppState> for SessionContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
        {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_owned(),
            Err(_) => {
                let TypedHeader(cookies) =
                    TypedHeader::<Cookie>::from_request_parts(parts, state)
                        .await
                        .map_err(|_| AppError::unauthorized())?;
                cookies
                    .get(SESSION_COOKIE_NAME)
                    .filter(|value| !value.is_empty())
                    .ok_or_else(AppError::unauthorized)?
                    .to_owned()
            }
        };

        let claims = state
            .sessions
            .verify(&token)
            .map_err(|_| AppError::unauthorized())?;
        let role = Role::parse(&claims.role).ok_or_else(AppError::unauthorized)?;

        Ok(SessionContext {
            user_id: claims.sub,
            username: claims.username,
            role,
            plant_ids: claims.plant_ids,
            department_ids: claims.department_ids,
        })
    }
}

/// A session whose role is `admin`; anyone else gets 403.
#[derive(Debug, Clone)]
pub struct AdminSession(pub SessionContext);

#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = SessionContext::from_request_parts(parts, state).await?;
        if !session.is_admin() {
            tracing::warn!(
                user_id = session.user_id,
                path = %parts.uri.path(),
                "non-admin access to admin route refused"
            );
            return Err(AppError::forbidden("administrator access required"));
        }
        Ok(AdminSession(session))
    }
}
