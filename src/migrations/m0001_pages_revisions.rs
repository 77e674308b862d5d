use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_pages_revisions")
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE pages (
    page_id INTEGER PRIMARY KEY NOT NULL,
    namespace INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL,
    latest_revision_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_pages_title ON pages(namespace, title)",
        ))
        // No unique constraint on revision_id: the bootstrap also writes here,
        // so duplicates are suppressed on insert and reported by verification.
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE revisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    revision_id INTEGER NOT NULL,
    page_id INTEGER NOT NULL,
    parent_id INTEGER,
    timestamp TEXT NOT NULL,
    user_id INTEGER,
    user_name TEXT,
    comment TEXT,
    content TEXT,
    content_hash TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    minor INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    inserted_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_revisions_page ON revisions(page_id, revision_id)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_revisions_revision_id ON revisions(revision_id)",
        ))
}
