use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use plantdocs::auth::password::hash_password;
use plantdocs::auth::session::SessionService;
use plantdocs::config::{AppConfig, UploadPolicy, DEFAULT_MAX_FILE_SIZE};
use plantdocs::db::{self, PgPool, MIGRATIONS};
use plantdocs::catalog;
use plantdocs::models::{NewDocument, NewUser, NewUserDepartment, NewUserPlant};
use plantdocs::routes;
use plantdocs::schema::{
    audit_logs, departments, document_types, plants, user_departments, user_plants, users,
};
use plantdocs::state::AppState;
use plantdocs::storage::{FileStorage, LocalStorage};
use serde::Serialize;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::util::ServiceExt;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";
#[allow(dead_code)]
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

/// One part of a multipart request.
#[allow(dead_code)]
pub enum Part<'a> {
    Text(&'a str, String),
    File {
        field: &'a str,
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    uploads: TempDir,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let uploads = tempfile::tempdir().context("failed to create upload directory")?;
        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            session_secret: "test-secret".to_string(),
            session_issuer: "test-issuer".to_string(),
            session_audience: "test-audience".to_string(),
            session_expiry_minutes: 60,
            session_cookie_secure: false,
            cors_allowed_origin: None,
            upload_folder: uploads.path().to_path_buf(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            upload_policy: UploadPolicy::default(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage: Arc<dyn FileStorage> = Arc::new(LocalStorage::new(uploads.path()));
        let sessions = SessionService::from_config(&config);
        let state = AppState::new(pool, config, storage, sessions);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            uploads,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn stored_file_count(&self) -> usize {
        walkdir_count(self.uploads.path())
    }

    pub async fn insert_plant(&self, name: &str) -> Result<i32> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            diesel::insert_into(plants::table)
                .values(plants::name.eq(name))
                .returning(plants::id)
                .get_result(conn)
                .context("failed to insert plant")
        })
        .await
    }

    pub async fn insert_department(&self, name: &str) -> Result<i32> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            diesel::insert_into(departments::table)
                .values(departments::name.eq(name))
                .returning(departments::id)
                .get_result(conn)
                .context("failed to insert department")
        })
        .await
    }

    pub async fn insert_document_type(&self, name: &str) -> Result<i32> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            diesel::insert_into(document_types::table)
                .values(document_types::name.eq(name))
                .returning(document_types::id)
                .get_result(conn)
                .context("failed to insert document type")
        })
        .await
    }

    pub async fn insert_user(
        &self,
        username: &str,
        password: &str,
        role: &str,
        plant_ids: &[i32],
        department_ids: &[i32],
    ) -> Result<i32> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        let plant_ids = plant_ids.to_vec();
        let department_ids = department_ids.to_vec();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user_id: i32 = diesel::insert_into(users::table)
                .values(&NewUser {
                    username,
                    password_hash,
                    email: None,
                    role,
                })
                .returning(users::id)
                .get_result(conn)
                .context("failed to insert user")?;

            let plant_rows: Vec<NewUserPlant> = plant_ids
                .into_iter()
                .map(|plant_id| NewUserPlant { user_id, plant_id })
                .collect();
            if !plant_rows.is_empty() {
                diesel::insert_into(user_plants::table)
                    .values(&plant_rows)
                    .execute(conn)?;
            }
            let department_rows: Vec<NewUserDepartment> = department_ids
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
            Ok(user_id)
        })
        .await
    }

    /// Inserts a catalog row directly, bypassing upload and storage.
    #[allow(dead_code)]
    pub async fn insert_document(
        &self,
        title: &str,
        uploaded_by: i32,
        document_type_id: i32,
        plant_ids: &[i32],
        department_ids: &[i32],
    ) -> Result<i32> {
        let new_document = NewDocument {
            title: title.to_string(),
            description: None,
            filename: format!("{title}.pdf"),
            file_path: format!("seed/{title}.pdf"),
            file_size: title.len() as i64,
            mime_type: "application/pdf".to_string(),
            uploaded_by,
            document_type_id,
        };
        let plant_ids = plant_ids.to_vec();
        let department_ids = department_ids.to_vec();
        self.with_conn(move |conn| {
            catalog::insert_document(conn, &new_document, &plant_ids, &department_ids)
                .context("failed to insert document")
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/login", &LoginPayload { username, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response carried no access token"))
    }

    #[allow(dead_code)]
    pub async fn audit_count(&self, action: &str) -> Result<i64> {
        let action = action.to_string();
        self.with_conn(move |conn| {
            audit_logs::table
                .filter(audit_logs::action.eq(action))
                .count()
                .get_result(conn)
                .context("failed to count audit logs")
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.send(request).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn post_multipart(
        &self,
        path: &str,
        parts: &[Part<'_>],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", uuid::Uuid::new_v4().simple());
        let mut body = Vec::new();
        for part in parts {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend(value.as_bytes());
                }
                Part::File {
                    field,
                    filename,
                    content_type,
                    data,
                } => {
                    body.extend(
                        format!(
                            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                    body.extend(*data);
                }
            }
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| anyhow!("router failed: {err}"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut *conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not JSON")
}

/// Upload fields placing a document in the given plants and departments.
#[allow(dead_code)]
pub fn placement_parts<'a>(
    plant_ids: &[i32],
    department_ids: &[i32],
    document_type_id: i32,
) -> Vec<Part<'a>> {
    let mut parts: Vec<Part<'a>> = plant_ids
        .iter()
        .map(|id| Part::Text("plant_ids", id.to_string()))
        .collect();
    parts.extend(
        department_ids
            .iter()
            .map(|id| Part::Text("department_ids", id.to_string())),
    );
    parts.push(Part::Text("document_type_id", document_type_id.to_string()));
    parts
}

fn walkdir_count(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                walkdir_count(&path)
            } else {
                1
            }
        })
        .sum()
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE admin_notifications, document_requests, audit_logs, download_logs, \
         document_departments, document_plants, documents, user_departments, user_plants, \
         users, document_types, departments, plants RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
