//! Diesel row types for the mirror tables.
//!
//! Timestamps are stored as RFC 3339 text; JSON columns hold serialized
//! domain values.

use diesel::prelude::*;

use crate::schema;

/// Page row from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::pages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageRow {
    pub page_id: i64,
    pub namespace: i32,
    pub title: String,
    pub latest_revision_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Page row for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::pages)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewPageRow<'a> {
    pub page_id: i64,
    pub namespace: i32,
    pub title: &'a str,
    pub latest_revision_id: Option<i64>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub deleted_at: Option<&'a str>,
}

/// Revision row from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::revisions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RevisionRow {
    pub id: i64,
    pub revision_id: i64,
    pub page_id: i64,
    pub parent_id: Option<i64>,
    pub timestamp: String,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub comment: Option<String>,
    pub content: Option<String>,
    pub content_hash: String,
    pub size: i64,
    pub minor: i32,
    pub tags: String,
    pub inserted_at: String,
}

/// Revision row for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::revisions)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewRevisionRow<'a> {
    pub revision_id: i64,
    pub page_id: i64,
    pub parent_id: Option<i64>,
    pub timestamp: String,
    pub user_id: Option<i64>,
    pub user_name: Option<&'a str>,
    pub comment: Option<&'a str>,
    pub content: Option<&'a str>,
    pub content_hash: &'a str,
    pub size: i64,
    pub minor: i32,
    pub tags: String,
    pub inserted_at: &'a str,
}

/// File row from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FileRow {
    pub name: String,
    pub content_hash: String,
    pub size: i64,
    pub mime_type: String,
    pub uploaded_at: String,
    pub local_path: String,
    pub local_sha256: String,
    pub updated_at: String,
}

/// File row for insertion or replacement.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::files)]
pub struct NewFileRow<'a> {
    pub name: &'a str,
    pub content_hash: &'a str,
    pub size: i64,
    pub mime_type: &'a str,
    pub uploaded_at: String,
    pub local_path: String,
    pub local_sha256: &'a str,
    pub updated_at: String,
}

/// Link row; used for both reads and inserts.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = schema::links)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LinkRow {
    pub source_page_id: i64,
    pub target_title: String,
    pub kind: String,
}

/// Scrape run row; used for both reads and full-row writes.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = schema::scrape_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct ScrapeRunRow {
    pub id: String,
    pub mode: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub heartbeat_at: String,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub host: Option<String>,
    pub resumed_from: Option<String>,
    pub counts: String,
    pub failures: String,
    pub error_summary: Option<String>,
    pub integrity: String,
    pub carry_over: String,
}

/// The single checkpoint row.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = schema::sync_checkpoint)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CheckpointRow {
    pub id: i32,
    pub run_id: String,
    pub phase: String,
    pub cursors: String,
    pub window_start: String,
    pub window_end: String,
    pub change_set: String,
    pub failed_pages: String,
    pub updated_at: String,
}
