use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{
    Department, Document, NewDocument, NewDocumentDepartment, NewDocumentPlant, Plant,
};
use crate::schema::{
    admin_notifications, departments, document_departments, document_plants, document_requests,
    document_types, documents, download_logs, plants, users,
};
use crate::scope::AccessScope;

pub const MAX_PER_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 1_000_000;
pub const MAX_TITLE_LEN: usize = 200;

/// 400 when `value` holds more than `max` characters.
pub fn ensure_max_len(value: &str, max: usize, field: &str) -> AppResult<()> {
    if value.chars().count() > max {
        return Err(AppError::bad_request(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub plant_id: Option<i32>,
    pub department_id: Option<i32>,
    pub search: Option<String>,
}

impl DocumentFilter {
    /// `ILIKE` pattern for the title search with `%`, `_` and `\` taken literally.
    pub fn search_pattern(&self) -> Option<String> {
        let search = self.search.as_deref()?.trim();
        if search.is_empty() {
            return None;
        }
        let mut escaped = String::with_capacity(search.len() + 2);
        escaped.push('%');
        for ch in search.chars() {
            if matches!(ch, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        escaped.push('%');
        Some(escaped)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DocumentSort {
    Title,
    #[default]
    UploadedAt,
    Size,
    Type,
}

impl DocumentSort {
    /// Unknown or missing values fall back to upload time.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("title") => DocumentSort::Title,
            Some("size") => DocumentSort::Size,
            Some("type") => DocumentSort::Type,
            _ => DocumentSort::UploadedAt,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn clamp(page: i64, per_page: i64) -> Self {
        Self {
            page: page.clamp(1, MAX_PAGE),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    /// Lenient query-string parsing: anything unparsable resets both values
    /// to their defaults before clamping.
    pub fn parse(page: Option<&str>, per_page: Option<&str>, default_per_page: i64) -> Self {
        let parse = |value: Option<&str>, default: i64| match value {
            Some(raw) => raw.trim().parse::<i64>().ok(),
            None => Some(default),
        };
        match (parse(page, 1), parse(per_page, default_per_page)) {
            (Some(page), Some(per_page)) => Self::clamp(page, per_page),
            _ => Self::clamp(1, default_per_page),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn total_pages(&self, total_count: i64) -> i64 {
        (total_count + self.per_page - 1) / self.per_page
    }

    pub fn envelope<T>(&self, data: Vec<T>, total_count: i64) -> Page<T> {
        Page {
            data,
            page: self.page,
            per_page: self.per_page,
            total_count,
            total_pages: self.total_pages(total_count),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NamedRef {
    pub id: i32,
    pub name: String,
}

impl From<Plant> for NamedRef {
    fn from(plant: Plant) -> Self {
        Self {
            id: plant.id,
            name: plant.name,
        }
    }
}

impl From<Department> for NamedRef {
    fn from(department: Department) -> Self {
        Self {
            id: department.id,
            name: department.name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploaderRef {
    pub id: i32,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_at: String,
    pub updated_at: String,
    pub uploader: UploaderRef,
    pub document_type: NamedRef,
    pub plants: Vec<NamedRef>,
    pub departments: Vec<NamedRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    pub download_url: String,
}

/// Ids of documents visible to `scope` that also match `filter`. Shared by the
/// count and the page query so both see the same rows.
pub fn filtered_ids(
    scope: &AccessScope,
    filter: &DocumentFilter,
) -> documents::BoxedQuery<'static, Pg, Integer> {
    let mut query = scope.visible_document_ids();

    if let Some(plant_id) = filter.plant_id {
        query = query.filter(
            documents::id.eq_any(
                document_plants::table
                    .filter(document_plants::plant_id.eq(plant_id))
                    .select(document_plants::document_id),
            ),
        );
    }

    if let Some(department_id) = filter.department_id {
        query = query.filter(
            documents::id.eq_any(
                document_departments::table
                    .filter(document_departments::department_id.eq(department_id))
                    .select(document_departments::document_id),
            ),
        );
    }

    if let Some(pattern) = filter.search_pattern() {
        query = query.filter(documents::title.ilike(pattern));
    }

    query
}

pub fn count_documents(
    conn: &mut PgConnection,
    scope: &AccessScope,
    filter: &DocumentFilter,
) -> QueryResult<i64> {
    documents::table
        .filter(documents::id.eq_any(filtered_ids(scope, filter)))
        .count()
        .get_result(conn)
}

/// Sorted documents matching `filter`; the whole list when `window` is `None`.
pub fn list_documents(
    conn: &mut PgConnection,
    scope: &AccessScope,
    filter: &DocumentFilter,
    sort: DocumentSort,
    order: SortOrder,
    window: Option<Pagination>,
) -> QueryResult<Vec<DocumentSummary>> {
    let mut query = documents::table
        .inner_join(document_types::table)
        .inner_join(users::table)
        .filter(documents::id.eq_any(filtered_ids(scope, filter)))
        .select((
            documents::all_columns,
            document_types::name,
            users::username,
        ))
        .into_boxed();

    query = match (sort, order) {
        (DocumentSort::Title, SortOrder::Asc) => {
            query.order((documents::title.asc(), documents::id.desc()))
        }
        (DocumentSort::Title, SortOrder::Desc) => {
            query.order((documents::title.desc(), documents::id.desc()))
        }
        (DocumentSort::UploadedAt, SortOrder::Asc) => {
            query.order((documents::uploaded_at.asc(), documents::id.desc()))
        }
        (DocumentSort::UploadedAt, SortOrder::Desc) => {
            query.order((documents::uploaded_at.desc(), documents::id.desc()))
        }
        (DocumentSort::Size, SortOrder::Asc) => {
            query.order((documents::file_size.asc(), documents::id.desc()))
        }
        (DocumentSort::Size, SortOrder::Desc) => {
            query.order((documents::file_size.desc(), documents::id.desc()))
        }
        (DocumentSort::Type, SortOrder::Asc) => {
            query.order((document_types::name.asc(), documents::id.desc()))
        }
        (DocumentSort::Type, SortOrder::Desc) => {
            query.order((document_types::name.desc(), documents::id.desc()))
        }
    };

    if let Some(window) = window {
        query = query.limit(window.per_page).offset(window.offset());
    }

    let rows: Vec<(Document, String, String)> = query.load(conn)?;
    summarize(conn, rows)
}

fn summarize(
    conn: &mut PgConnection,
    rows: Vec<(Document, String, String)>,
) -> QueryResult<Vec<DocumentSummary>> {
    let ids: Vec<i32> = rows.iter().map(|(doc, _, _)| doc.id).collect();
    let mut plants_map = load_plants_for_documents(conn, &ids)?;
    let mut departments_map = load_departments_for_documents(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|(doc, type_name, uploader_name)| {
            let plants = plants_map.remove(&doc.id).unwrap_or_default();
            let departments = departments_map.remove(&doc.id).unwrap_or_default();
            to_summary(doc, type_name, uploader_name, plants, departments)
        })
        .collect())
}

fn to_summary(
    doc: Document,
    type_name: String,
    uploader_name: String,
    plants: Vec<Plant>,
    departments: Vec<Department>,
) -> DocumentSummary {
    DocumentSummary {
        id: doc.id,
        title: doc.title,
        description: doc.description,
        filename: doc.filename,
        file_size: doc.file_size,
        mime_type: doc.mime_type,
        uploaded_at: to_iso(doc.uploaded_at),
        updated_at: to_iso(doc.updated_at),
        uploader: UploaderRef {
            id: doc.uploaded_by,
            username: uploader_name,
        },
        document_type: NamedRef {
            id: doc.document_type_id,
            name: type_name,
        },
        plants: plants.into_iter().map(NamedRef::from).collect(),
        departments: departments.into_iter().map(NamedRef::from).collect(),
    }
}

pub fn load_plants_for_documents(
    conn: &mut PgConnection,
    document_ids: &[i32],
) -> QueryResult<HashMap<i32, Vec<Plant>>> {
    if document_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(i32, Plant)> = document_plants::table
        .inner_join(plants::table)
        .filter(document_plants::document_id.eq_any(document_ids))
        .order(plants::name.asc())
        .select((document_plants::document_id, plants::all_columns))
        .load(conn)?;

    let mut map: HashMap<i32, Vec<Plant>> = HashMap::new();
    for (doc_id, plant) in rows {
        map.entry(doc_id).or_default().push(plant);
    }
    Ok(map)
}

pub fn load_departments_for_documents(
    conn: &mut PgConnection,
    document_ids: &[i32],
) -> QueryResult<HashMap<i32, Vec<Department>>> {
    if document_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(i32, Department)> = document_departments::table
        .inner_join(departments::table)
        .filter(document_departments::document_id.eq_any(document_ids))
        .order(departments::name.asc())
        .select((document_departments::document_id, departments::all_columns))
        .load(conn)?;

    let mut map: HashMap<i32, Vec<Department>> = HashMap::new();
    for (doc_id, department) in rows {
        map.entry(doc_id).or_default().push(department);
    }
    Ok(map)
}

/// Loads a document the scope may see. Missing and out-of-scope documents are
/// indistinguishable to the caller.
pub fn load_visible_document(
    conn: &mut PgConnection,
    scope: &AccessScope,
    document_id: i32,
) -> AppResult<(Document, Vec<Plant>, Vec<Department>)> {
    let document: Document = documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::missing("document"))?;

    let plants = load_plants_for_documents(conn, &[document_id])?
        .remove(&document_id)
        .unwrap_or_default();
    let departments = load_departments_for_documents(conn, &[document_id])?
        .remove(&document_id)
        .unwrap_or_default();

    let plant_ids: Vec<i32> = plants.iter().map(|p| p.id).collect();
    let department_ids: Vec<i32> = departments.iter().map(|d| d.id).collect();
    if !scope.permits(&plant_ids, &department_ids) {
        tracing::info!(document_id, "document outside session scope");
        return Err(AppError::missing("document"));
    }

    Ok((document, plants, departments))
}

pub fn document_detail(
    conn: &mut PgConnection,
    scope: &AccessScope,
    document_id: i32,
) -> AppResult<DocumentDetail> {
    let (document, plants, departments) = load_visible_document(conn, scope, document_id)?;

    let type_name: String = document_types::table
        .find(document.document_type_id)
        .select(document_types::name)
        .first(conn)?;
    let uploader_name: String = users::table
        .find(document.uploaded_by)
        .select(users::username)
        .first(conn)?;

    Ok(DocumentDetail {
        download_url: format!("/documents/{}/download", document.id),
        summary: to_summary(document, type_name, uploader_name, plants, departments),
    })
}

/// Fails with 400 when any referenced plant, department or document type does
/// not exist.
pub fn ensure_references_exist(
    conn: &mut PgConnection,
    plant_ids: &[i32],
    department_ids: &[i32],
    document_type_id: Option<i32>,
) -> AppResult<()> {
    let found_plants: i64 = plants::table
        .filter(plants::id.eq_any(plant_ids))
        .count()
        .get_result(conn)?;
    if found_plants != dedup(plant_ids).len() as i64 {
        return Err(AppError::bad_request("unknown plant id"));
    }

    let found_departments: i64 = departments::table
        .filter(departments::id.eq_any(department_ids))
        .count()
        .get_result(conn)?;
    if found_departments != dedup(department_ids).len() as i64 {
        return Err(AppError::bad_request("unknown department id"));
    }

    if let Some(type_id) = document_type_id {
        let found = document_types::table
            .find(type_id)
            .select(document_types::id)
            .first::<i32>(conn)
            .optional()?;
        if found.is_none() {
            return Err(AppError::bad_request("unknown document type id"));
        }
    }

    Ok(())
}

/// Inserts the document row and its plant/department links. Callers wrap this
/// in a transaction.
pub fn insert_document(
    conn: &mut PgConnection,
    new_document: &NewDocument,
    plant_ids: &[i32],
    department_ids: &[i32],
) -> QueryResult<i32> {
    let document_id: i32 = diesel::insert_into(documents::table)
        .values(new_document)
        .returning(documents::id)
        .get_result(conn)?;
    link_document(conn, document_id, plant_ids, department_ids)?;
    Ok(document_id)
}

fn link_document(
    conn: &mut PgConnection,
    document_id: i32,
    plant_ids: &[i32],
    department_ids: &[i32],
) -> QueryResult<()> {
    let plant_rows: Vec<NewDocumentPlant> = dedup(plant_ids)
        .into_iter()
        .map(|plant_id| NewDocumentPlant {
            document_id,
            plant_id,
        })
        .collect();
    if !plant_rows.is_empty() {
        diesel::insert_into(document_plants::table)
            .values(&plant_rows)
            .execute(conn)?;
    }

    let department_rows: Vec<NewDocumentDepartment> = dedup(department_ids)
        .into_iter()
        .map(|department_id| NewDocumentDepartment {
            document_id,
            department_id,
        })
        .collect();
    if !department_rows.is_empty() {
        diesel::insert_into(document_departments::table)
            .values(&department_rows)
            .execute(conn)?;
    }

    Ok(())
}

pub(crate) fn dedup(ids: &[i32]) -> Vec<i32> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[derive(Debug, Clone)]
pub struct DocumentChanges {
    pub title: String,
    pub description: Option<String>,
    pub document_type_id: Option<i32>,
    pub plant_ids: Vec<i32>,
    pub department_ids: Vec<i32>,
}

/// Rewrites the document's fields and replaces its plant/department links
/// wholesale, all in one transaction.
pub fn update_document(
    conn: &mut PgConnection,
    document_id: i32,
    changes: &DocumentChanges,
) -> AppResult<()> {
    conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let updated = match changes.document_type_id {
            Some(type_id) => diesel::update(documents::table.find(document_id))
                .set((
                    documents::title.eq(&changes.title),
                    documents::description.eq(&changes.description),
                    documents::document_type_id.eq(type_id),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?,
            None => diesel::update(documents::table.find(document_id))
                .set((
                    documents::title.eq(&changes.title),
                    documents::description.eq(&changes.description),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?,
        };
        if updated == 0 {
            return Err(AppError::missing("document"));
        }

        diesel::delete(
            document_plants::table.filter(document_plants::document_id.eq(document_id)),
        )
        .execute(conn)?;
        diesel::delete(
            document_departments::table.filter(document_departments::document_id.eq(document_id)),
        )
        .execute(conn)?;
        link_document(conn, document_id, &changes.plant_ids, &changes.department_ids)?;
        Ok(())
    })
}

/// Deletes a document with every row that references it and returns the
/// removed document. The stored file is left for the caller.
pub fn delete_document(conn: &mut PgConnection, document_id: i32) -> AppResult<Document> {
    conn.transaction::<_, AppError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::missing("document"))?;

        diesel::delete(
            admin_notifications::table
                .filter(admin_notifications::document_id.eq(document_id)),
        )
        .execute(conn)?;
        diesel::delete(
            document_requests::table.filter(document_requests::document_id.eq(document_id)),
        )
        .execute(conn)?;
        diesel::delete(
            document_plants::table.filter(document_plants::document_id.eq(document_id)),
        )
        .execute(conn)?;
        diesel::delete(
            document_departments::table.filter(document_departments::document_id.eq(document_id)),
        )
        .execute(conn)?;
        diesel::delete(download_logs::table.filter(download_logs::document_id.eq(document_id)))
            .execute(conn)?;
        diesel::delete(documents::table.find(document_id)).execute(conn)?;

        Ok(document)
    })
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DepartmentCount {
    pub id: i32,
    pub name: String,
    pub document_count: i64,
}

/// Visible documents per department. Admins see every department, others
/// only their own.
pub fn department_counts(
    conn: &mut PgConnection,
    scope: &AccessScope,
) -> QueryResult<Vec<DepartmentCount>> {
    let mut departments_query = departments::table.order(departments::name.asc()).into_boxed();
    if let AccessScope::Restricted { department_ids, .. } = scope {
        departments_query =
            departments_query.filter(departments::id.eq_any(department_ids.clone()));
    }
    let rows: Vec<Department> = departments_query.load(conn)?;

    let counts: Vec<(i32, i64)> = document_departments::table
        .filter(document_departments::document_id.eq_any(scope.visible_document_ids()))
        .group_by(document_departments::department_id)
        .select((
            document_departments::department_id,
            diesel::dsl::count_star(),
        ))
        .load(conn)?;
    let counts: HashMap<i32, i64> = counts.into_iter().collect();

    Ok(rows
        .into_iter()
        .map(|department| DepartmentCount {
            document_count: counts.get(&department.id).copied().unwrap_or(0),
            id: department.id,
            name: department.name,
        })
        .collect())
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_pattern_matches_metacharacters_literally() {
        let filter = DocumentFilter {
            search: Some(" 50%_off\\ ".into()),
            ..Default::default()
        };
        assert_eq!(filter.search_pattern().as_deref(), Some("%50\\%\\_off\\\\%"));

        let blank = DocumentFilter {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(blank.search_pattern(), None);
    }

    #[test]
    fn unknown_sort_falls_back_to_upload_time() {
        assert_eq!(DocumentSort::parse(Some("not_a_real_column")), DocumentSort::UploadedAt);
        assert_eq!(DocumentSort::parse(None), DocumentSort::UploadedAt);
        assert_eq!(DocumentSort::parse(Some("Size")), DocumentSort::Size);
        assert_eq!(DocumentSort::parse(Some("type")), DocumentSort::Type);
    }

    #[test]
    fn order_defaults_to_descending() {
        assert_eq!(SortOrder::parse(None), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("sideways")), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("ASC")), SortOrder::Asc);
    }

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(Pagination::clamp(0, 0), Pagination { page: 1, per_page: 1 });
        assert_eq!(
            Pagination::clamp(-4, 1000),
            Pagination {
                page: 1,
                per_page: MAX_PER_PAGE
            }
        );
        assert_eq!(Pagination::clamp(3, 25).offset(), 50);
    }

    #[test]
    fn huge_page_numbers_are_capped() {
        let window = Pagination::parse(Some("9223372036854775807"), Some("10"), 10);
        assert_eq!(window.page, MAX_PAGE);
        assert_eq!(window.offset(), (MAX_PAGE - 1) * 10);

        let unclamped = Pagination {
            page: i64::MAX,
            per_page: MAX_PER_PAGE,
        };
        assert_eq!(unclamped.offset(), i64::MAX);
    }

    #[test]
    fn unparsable_pagination_resets_to_defaults() {
        assert_eq!(
            Pagination::parse(Some("abc"), Some("50"), 10),
            Pagination { page: 1, per_page: 10 }
        );
        assert_eq!(
            Pagination::parse(Some("2"), None, 20),
            Pagination { page: 2, per_page: 20 }
        );
    }

    #[test]
    fn length_limit_counts_characters() {
        assert!(ensure_max_len(&"ü".repeat(200), MAX_TITLE_LEN, "title").is_ok());
        let err = ensure_max_len(&"a".repeat(201), MAX_TITLE_LEN, "title").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn total_pages_rounds_up() {
        let window = Pagination::clamp(1, 10);
        assert_eq!(window.total_pages(0), 0);
        assert_eq!(window.total_pages(10), 1);
        assert_eq!(window.total_pages(11), 2);

        let page = window.envelope(vec![1, 2, 3], 23);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.data.len(), 3);
    }
}
