use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_files_links")
        .depends_on(&["0001_pages_revisions"])
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE files (
    name TEXT PRIMARY KEY NOT NULL,
    content_hash TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    local_path TEXT NOT NULL,
    local_sha256 TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE links (
    source_page_id INTEGER NOT NULL,
    target_title TEXT NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (source_page_id, target_title, kind)
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_links_target ON links(target_title)",
        ))
}
