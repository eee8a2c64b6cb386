use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = plants)]
pub struct Plant {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = departments)]
pub struct Department {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_by: i32,
    pub document_type_id: i32,
    pub uploaded_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub title: String,
    pub description: Option<String>,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_by: i32,
    pub document_type_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_plants)]
pub struct NewDocumentPlant {
    pub document_id: i32,
    pub plant_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_departments)]
pub struct NewDocumentDepartment {
    pub document_id: i32,
    pub department_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_plants)]
pub struct NewUserPlant {
    pub user_id: i32,
    pub plant_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_departments)]
pub struct NewUserDepartment {
    pub user_id: i32,
    pub department_id: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_requests)]
pub struct DocumentRequest {
    pub id: i32,
    pub user_id: i32,
    pub document_id: Option<i32>,
    pub requested_document_description: Option<String>,
    pub document_type_id: Option<i32>,
    pub requested_format: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_requests)]
pub struct NewDocumentRequest {
    pub user_id: i32,
    pub document_id: Option<i32>,
    pub requested_document_description: Option<String>,
    pub document_type_id: Option<i32>,
    pub requested_format: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = admin_notifications)]
pub struct AdminNotification {
    pub id: i32,
    pub user_id: i32,
    pub document_id: Option<i32>,
    pub requested_document_description: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = admin_notifications)]
pub struct NewAdminNotification {
    pub user_id: i32,
    pub document_id: Option<i32>,
    pub requested_document_description: Option<String>,
    pub message: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = download_logs)]
pub struct NewDownloadLog {
    pub document_id: i32,
    pub user_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub user_id: Option<i32>,
    pub action: String,
    pub details: Option<String>,
}
