use axum::{extract::State, Json};
use diesel::prelude::*;
use serde::Serialize;

use crate::{
    auth::SessionContext,
    catalog::{self, DepartmentCount, DocumentFilter},
    error::{AppError, AppResult},
    models::User,
    schema::users,
    scope::AccessScope,
    state::AppState,
};

#[derive(Serialize)]
pub struct DashboardUser {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    pub user: DashboardUser,
    pub document_count: i64,
    pub documents_per_department: Vec<DepartmentCount>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    session: SessionContext,
) -> AppResult<Json<DashboardResponse>> {
    let scope = AccessScope::for_session(&session)?;
    let mut conn = state.db()?;

    let user: User = users::table
        .find(session.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::missing("user"))?;
    let document_count =
        catalog::count_documents(&mut conn, &scope, &DocumentFilter::default())?;
    let documents_per_department = catalog::department_counts(&mut conn, &scope)?;

    Ok(Json(DashboardResponse {
        user: DashboardUser {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
        },
        document_count,
        documents_per_department,
    }))
}
