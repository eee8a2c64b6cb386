use axum::http::HeaderValue;
use axum::{extract::DefaultBodyLimit, middleware, routing::get, routing::post, Router};
use serde::{de::Error as _, Deserialize, Deserializer};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    auth::{AdminSession, SessionContext},
    state::AppState,
};

pub mod audit_logs;
pub mod auth;
pub mod dashboard;
pub mod documents;
pub mod health;
pub mod reference;
pub mod requests;
pub mod users;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Number(i32),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdInput {
    Many(Vec<IdValue>),
    One(IdValue),
}

/// Deserializes id lists sent either as numbers or numeric strings, as a list
/// or a single value. `null` and blank strings yield no ids.
pub(crate) fn id_list<'de, D>(deserializer: D) -> Result<Vec<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = match Option::<IdInput>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(IdInput::Many(values)) => values,
        Some(IdInput::One(value)) => vec![value],
    };

    let mut ids = Vec::with_capacity(values.len());
    for value in values {
        match value {
            IdValue::Number(id) => ids.push(id),
            IdValue::Text(text) if text.trim().is_empty() => {}
            IdValue::Text(text) => ids.push(
                text.trim()
                    .parse()
                    .map_err(|_| D::Error::custom(format!("'{text}' is not a valid id")))?,
            ),
        }
    }
    Ok(ids)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    let body_limit = state.config.max_file_size;

    let public_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/api/health", get(health::health_check));

    let session_routes = Router::new()
        .route("/dashboard", get(dashboard::dashboard))
        .route("/documents", get(documents::list_documents))
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id/download", get(documents::download_document))
        .route("/api/documents", get(documents::api_documents))
        .route("/api/plants", get(reference::list_plants))
        .route("/api/departments", get(reference::list_departments))
        .route("/api/document-types", get(reference::list_document_types))
        .route("/api/user/profile", get(auth::profile))
        .route("/request-document", post(requests::request_new_document))
        .route(
            "/document/:id/request_format",
            post(requests::request_document_format),
        )
        .layer(middleware::from_extractor_with_state::<SessionContext, _>(
            state.clone(),
        ));

    let admin_routes = Router::new()
        .route("/documents/upload", post(documents::upload_document))
        .route(
            "/documents/bulk-upload",
            post(documents::bulk_upload_documents),
        )
        .route("/documents/:id/update", post(documents::update_document))
        .route("/documents/:id/delete", post(documents::delete_document))
        .route("/admin/users", get(users::list_users))
        .route("/admin/users/create", post(users::create_user))
        .route("/admin/users/:id/update", post(users::update_user))
        .route("/admin/users/:id/reset-password", post(users::reset_password))
        .route("/admin/users/:id/activate", post(users::activate_user))
        .route("/admin/users/:id/deactivate", post(users::deactivate_user))
        .route("/admin/users/:id/delete", post(users::delete_user))
        .route("/admin/departments", get(reference::list_departments))
        .route("/admin/departments/add", post(reference::add_department))
        .route(
            "/admin/departments/:id/delete",
            post(reference::delete_department),
        )
        .route("/admin/document-types", get(reference::list_document_types))
        .route(
            "/admin/document-types/add",
            post(reference::add_document_type),
        )
        .route(
            "/admin/document-types/:id/delete",
            post(reference::delete_document_type),
        )
        .route("/admin/requests", get(requests::list_requests))
        .route(
            "/admin/requests/:id/update",
            post(requests::update_request_status),
        )
        .route("/admin/requests/:id/delete", post(requests::delete_request))
        .route(
            "/admin/notifications/:id/mark-read",
            post(requests::dismiss_notification),
        )
        .route("/audit-logs", get(audit_logs::list_audit_logs))
        .layer(middleware::from_extractor_with_state::<AdminSession, _>(
            state.clone(),
        ));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Ids {
        #[serde(default, deserialize_with = "super::id_list")]
        ids: Vec<i32>,
    }

    fn parse(raw: &str) -> Result<Vec<i32>, serde_json::Error> {
        serde_json::from_str::<Ids>(raw).map(|parsed| parsed.ids)
    }

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        assert_eq!(parse(r#"{"ids": [1, "2", " 3 "]}"#).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse(r#"{"ids": "4"}"#).unwrap(), vec![4]);
        assert_eq!(parse(r#"{"ids": 5}"#).unwrap(), vec![5]);
    }

    #[test]
    fn missing_null_and_blank_yield_no_ids() {
        assert!(parse(r#"{}"#).unwrap().is_empty());
        assert!(parse(r#"{"ids": null}"#).unwrap().is_empty());
        assert!(parse(r#"{"ids": ["", " "]}"#).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_numeric_ids() {
        assert!(parse(r#"{"ids": ["plant-a"]}"#).is_err());
    }
}
