use std::io::Cursor;

use axum::body::Body;
use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::id_list;
use crate::audit;
use crate::auth::{AdminSession, SessionContext};
use crate::catalog::{
    self, ensure_max_len, DocumentChanges, DocumentDetail, DocumentFilter, DocumentSort,
    DocumentSummary, Page, Pagination, SortOrder, MAX_TITLE_LEN,
};
use crate::error::{AppError, AppResult};
use crate::models::NewDocument;
use crate::scope::AccessScope;
use crate::state::AppState;
use crate::storage::storage_key;
use crate::upload::{is_allowed, parse_bulk_metadata, sanitize_filename, stored_mime_type};

pub const DEFAULT_DOCUMENTS_PER_PAGE: i64 = 10;

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    let ascii_fallback: String = sanitized
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback, encoded
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentListQuery {
    pub plant_id: Option<String>,
    pub department_id: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

impl DocumentListQuery {
    /// Unparsable ids are ignored rather than rejected.
    fn filter(&self) -> DocumentFilter {
        let id = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse().ok());
        DocumentFilter {
            plant_id: id(&self.plant_id),
            department_id: id(&self.department_id),
            search: self.search.clone(),
        }
    }

    fn sort(&self) -> (DocumentSort, SortOrder) {
        (
            DocumentSort::parse(self.sort.as_deref()),
            SortOrder::parse(self.order.as_deref()),
        )
    }

    fn pagination(&self) -> Pagination {
        Pagination::parse(
            self.page.as_deref(),
            self.per_page.as_deref(),
            DEFAULT_DOCUMENTS_PER_PAGE,
        )
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    session: SessionContext,
    Query(params): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentSummary>>> {
    let scope = AccessScope::for_session(&session)?;
    let (sort, order) = params.sort();
    let mut conn = state.db()?;
    let documents =
        catalog::list_documents(&mut conn, &scope, &params.filter(), sort, order, None)?;
    Ok(Json(documents))
}

pub async fn api_documents(
    State(state): State<AppState>,
    session: SessionContext,
    Query(params): Query<DocumentListQuery>,
) -> AppResult<Json<Page<DocumentSummary>>> {
    let scope = AccessScope::for_session(&session)?;
    let filter = params.filter();
    let (sort, order) = params.sort();
    let window = params.pagination();

    let mut conn = state.db()?;
    let total_count = catalog::count_documents(&mut conn, &scope, &filter)?;
    let documents =
        catalog::list_documents(&mut conn, &scope, &filter, sort, order, Some(window))?;

    Ok(Json(window.envelope(documents, total_count)))
}

pub async fn get_document(
    State(state): State<AppState>,
    session: SessionContext,
    Path(document_id): Path<i32>,
) -> AppResult<Json<DocumentDetail>> {
    let scope = AccessScope::for_session(&session)?;
    let mut conn = state.db()?;
    let detail = catalog::document_detail(&mut conn, &scope, document_id)?;
    Ok(Json(detail))
}

pub async fn download_document(
    State(state): State<AppState>,
    session: SessionContext,
    Path(document_id): Path<i32>,
) -> AppResult<Response> {
    let scope = AccessScope::for_session(&session)?;
    let document = {
        let mut conn = state.db()?;
        let (document, _, _) = catalog::load_visible_document(&mut conn, &scope, document_id)?;
        document
    };

    let bytes = state.storage.get_object(&document.file_path).await.map_err(|err| {
        error!(document_id, error = %err, "failed to read stored document");
        AppError::from(err)
    })?;

    {
        let mut conn = state.db()?;
        audit::record_download(&mut conn, document_id, session.user_id)?;
    }
    info!(
        document_id,
        user_id = session.user_id,
        filename = %document.filename,
        "document downloaded"
    );

    let content_type = HeaderValue::from_str(&document.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&attachment_content_disposition(&document.filename))
        .map_err(|err| AppError::internal(format!("invalid content disposition: {err}")))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(AppError::internal)
}

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    files: Vec<UploadedFile>,
    metadata_file: Option<Vec<u8>>,
    title: Option<String>,
    description: Option<String>,
    document_type_id: Option<String>,
    plant_ids: Vec<String>,
    department_ids: Vec<String>,
}

fn multipart_error(context: &'static str) -> impl Fn(axum::extract::multipart::MultipartError) -> AppError {
    move |err| {
        error!(error = %err, context, "invalid multipart data");
        AppError::bad_request(format!("{context}: {err}"))
    }
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error("invalid multipart data"))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") | Some("files") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(multipart_error("failed to read file bytes"))?;
                form.files.push(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            Some("metadata_file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(multipart_error("failed to read metadata file"))?;
                if !bytes.is_empty() {
                    form.metadata_file = Some(bytes.to_vec());
                }
            }
            Some("title") => {
                form.title = Some(field.text().await.map_err(multipart_error("invalid title"))?);
            }
            Some("description") => {
                form.description = Some(
                    field
                        .text()
                        .await
                        .map_err(multipart_error("invalid description"))?,
                );
            }
            Some("document_type_id") => {
                form.document_type_id = Some(
                    field
                        .text()
                        .await
                        .map_err(multipart_error("invalid document type id"))?,
                );
            }
            Some("plant_ids") => form.plant_ids.push(
                field
                    .text()
                    .await
                    .map_err(multipart_error("invalid plant id"))?,
            ),
            Some("department_ids") => form.department_ids.push(
                field
                    .text()
                    .await
                    .map_err(multipart_error("invalid department id"))?,
            ),
            _ => {}
        }
    }

    Ok(form)
}

fn parse_form_ids(values: &[String], field: &str) -> AppResult<Vec<i32>> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<i32>()
                .map_err(|_| AppError::bad_request(format!("{field} must contain integer ids")))
        })
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Plant, department and document type ids every upload must carry.
struct Placement {
    plant_ids: Vec<i32>,
    department_ids: Vec<i32>,
    document_type_id: i32,
}

fn placement(form: &UploadForm) -> AppResult<Placement> {
    let plant_ids = parse_form_ids(&form.plant_ids, "plant_ids")?;
    let department_ids = parse_form_ids(&form.department_ids, "department_ids")?;
    let document_type_id = non_blank(form.document_type_id.clone())
        .map(|raw| {
            raw.parse::<i32>()
                .map_err(|_| AppError::bad_request("document_type_id must be an integer"))
        })
        .transpose()?;

    match document_type_id {
        Some(document_type_id) if !plant_ids.is_empty() && !department_ids.is_empty() => {
            Ok(Placement {
                plant_ids,
                department_ids,
                document_type_id,
            })
        }
        _ => {
            warn!("upload rejected: plant, department and document type required");
            Err(AppError::bad_request(
                "plant, department and document type are required",
            ))
        }
    }
}

/// A validated file ready to be written to storage.
struct PreparedFile {
    key: String,
    filename: String,
    mime_type: String,
    bytes: Vec<u8>,
}

fn prepare_file(state: &AppState, file: UploadedFile) -> Option<PreparedFile> {
    if file.filename.trim().is_empty() {
        warn!("upload skipped: file has no name");
        return None;
    }
    if !is_allowed(
        &state.config.upload_policy,
        &file.filename,
        &mut Cursor::new(file.bytes.as_slice()),
    ) {
        warn!(filename = %file.filename, "upload rejected: file type not allowed or invalid");
        return None;
    }

    let filename = sanitize_filename(&file.filename);
    Some(PreparedFile {
        key: storage_key(Utc::now().date_naive(), &filename),
        mime_type: stored_mime_type(&filename, &file.bytes),
        filename,
        bytes: file.bytes,
    })
}

async fn discard_stored(state: &AppState, keys: &[String]) {
    for key in keys {
        if let Err(err) = state.storage.delete_object(key).await {
            warn!(key = %key, error = %err, "failed to remove orphaned upload");
        }
    }
}

pub async fn upload_document(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    let mut form = read_upload_form(multipart).await?;
    let file = match form.files.pop() {
        Some(file) if !file.filename.trim().is_empty() => file,
        _ => {
            warn!("upload rejected: no file selected");
            return Err(AppError::bad_request("no file selected"));
        }
    };
    let placement = placement(&form)?;
    let title = non_blank(form.title.take());
    if let Some(title) = &title {
        ensure_max_len(title, MAX_TITLE_LEN, "title")?;
    }

    let original_name = file.filename.clone();
    let prepared = prepare_file(&state, file)
        .ok_or_else(|| AppError::bad_request("file type not allowed or invalid"))?;

    {
        let mut conn = state.db()?;
        catalog::ensure_references_exist(
            &mut conn,
            &placement.plant_ids,
            &placement.department_ids,
            Some(placement.document_type_id),
        )?;
    }

    let file_size = prepared.bytes.len() as i64;
    state
        .storage
        .put_object(&prepared.key, prepared.bytes)
        .await
        .map_err(|err| {
            error!(error = %err, key = %prepared.key, "failed to store document");
            AppError::from(err)
        })?;

    let new_document = NewDocument {
        title: title.unwrap_or_else(|| prepared.filename.clone()),
        description: non_blank(form.description.take()),
        filename: prepared.filename.clone(),
        file_path: prepared.key.clone(),
        file_size,
        mime_type: prepared.mime_type,
        uploaded_by: admin.user_id,
        document_type_id: placement.document_type_id,
    };

    let inserted = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let document_id = catalog::insert_document(
                conn,
                &new_document,
                &placement.plant_ids,
                &placement.department_ids,
            )?;
            audit::record(
                conn,
                Some(admin.user_id),
                audit::DOCUMENT_UPLOAD,
                format!(
                    "Document '{}' (ID: {}) uploaded",
                    new_document.filename, document_id
                ),
            )?;
            Ok(document_id)
        })
    };

    let document_id = match inserted {
        Ok(id) => id,
        Err(err) => {
            error!(original_name = %original_name, "document upload failed");
            discard_stored(&state, &[prepared.key]).await;
            return Err(err);
        }
    };

    info!(
        document_id,
        filename = %prepared.filename,
        size = file_size,
        uploaded_by = admin.user_id,
        "document upload succeeded"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "document uploaded", "id": document_id })),
    ))
}

pub async fn bulk_upload_documents(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut form = read_upload_form(multipart).await?;
    if form.files.is_empty() {
        warn!("bulk upload rejected: no files provided");
        return Err(AppError::bad_request("no files provided"));
    }
    let placement = placement(&form)?;

    let metadata = match form.metadata_file.take() {
        Some(raw) => parse_bulk_metadata(&raw).map_err(|err| {
            warn!(error = %err, "bulk upload rejected: unreadable metadata file");
            AppError::bad_request("invalid metadata file")
        })?,
        None => Default::default(),
    };

    {
        let mut conn = state.db()?;
        catalog::ensure_references_exist(
            &mut conn,
            &placement.plant_ids,
            &placement.department_ids,
            Some(placement.document_type_id),
        )?;
    }

    let mut stored_keys = Vec::new();
    let mut new_documents = Vec::new();
    for file in std::mem::take(&mut form.files) {
        let Some(prepared) = prepare_file(&state, file) else {
            continue;
        };
        let entry = metadata.get(&prepared.filename).cloned().unwrap_or_default();
        if let Some(title) = entry.title.as_deref() {
            if ensure_max_len(title, MAX_TITLE_LEN, "title").is_err() {
                warn!(filename = %prepared.filename, "bulk upload skipped file: title too long");
                continue;
            }
        }

        let file_size = prepared.bytes.len() as i64;
        if let Err(err) = state.storage.put_object(&prepared.key, prepared.bytes).await {
            warn!(error = %err, key = %prepared.key, "bulk upload skipped file: storage failed");
            continue;
        }
        stored_keys.push(prepared.key.clone());

        new_documents.push(NewDocument {
            title: non_blank(entry.title).unwrap_or_else(|| prepared.filename.clone()),
            description: non_blank(entry.description),
            filename: prepared.filename,
            file_path: prepared.key,
            file_size,
            mime_type: prepared.mime_type,
            uploaded_by: admin.user_id,
            document_type_id: placement.document_type_id,
        });
    }

    let saved = new_documents.len();
    let inserted = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            for new_document in &new_documents {
                catalog::insert_document(
                    conn,
                    new_document,
                    &placement.plant_ids,
                    &placement.department_ids,
                )?;
            }
            audit::record(
                conn,
                Some(admin.user_id),
                audit::DOCUMENT_BULK_UPLOAD,
                format!("Bulk upload of {saved} documents"),
            )?;
            Ok(())
        })
    };

    if let Err(err) = inserted {
        error!("bulk upload failed, removing stored files");
        discard_stored(&state, &stored_keys).await;
        return Err(err);
    }

    info!(saved, uploaded_by = admin.user_id, "bulk upload finished");
    Ok(Json(json!({
        "message": format!("Uploaded {saved} files successfully"),
        "count": saved,
    })))
}

#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub document_type_id: Option<i32>,
    #[serde(default, deserialize_with = "id_list")]
    pub plant_ids: Vec<i32>,
    #[serde(default, deserialize_with = "id_list")]
    pub department_ids: Vec<i32>,
}

pub async fn update_document(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(document_id): Path<i32>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<Value>> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    ensure_max_len(&title, MAX_TITLE_LEN, "title")?;
    if payload.plant_ids.is_empty() || payload.department_ids.is_empty() {
        return Err(AppError::bad_request(
            "at least one plant and one department are required",
        ));
    }

    let changes = DocumentChanges {
        title,
        description: non_blank(payload.description),
        document_type_id: payload.document_type_id,
        plant_ids: payload.plant_ids,
        department_ids: payload.department_ids,
    };

    let mut conn = state.db()?;
    catalog::ensure_references_exist(
        &mut conn,
        &changes.plant_ids,
        &changes.department_ids,
        changes.document_type_id,
    )?;
    conn.transaction::<_, AppError, _>(|conn| {
        catalog::update_document(conn, document_id, &changes)?;
        audit::record(
            conn,
            Some(admin.user_id),
            audit::DOCUMENT_UPDATE,
            format!("Document '{}' (ID: {}) updated", changes.title, document_id),
        )?;
        Ok(())
    })?;

    info!(document_id, updated_by = admin.user_id, "document updated");
    Ok(Json(json!({ "message": "document updated" })))
}

pub async fn delete_document(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    Path(document_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let document = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let document = catalog::delete_document(conn, document_id)?;
            audit::record(
                conn,
                Some(admin.user_id),
                audit::DOCUMENT_DELETE,
                format!("Document '{}' (ID: {}) deleted", document.filename, document_id),
            )?;
            Ok(document)
        })
        .map_err(|err| {
            if err.status() == StatusCode::NOT_FOUND {
                warn!(document_id, "document not found for deletion");
            }
            err
        })?
    };

    match state.storage.delete_object(&document.file_path).await {
        Ok(true) => info!(document_id, key = %document.file_path, "stored file removed"),
        Ok(false) => warn!(document_id, key = %document.file_path, "stored file already missing"),
        Err(err) => warn!(document_id, error = %err, "failed to remove stored file"),
    }

    info!(document_id, deleted_by = admin.user_id, "document deleted");
    Ok(Json(json!({ "message": "document deleted" })))
}
