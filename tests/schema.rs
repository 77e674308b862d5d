//! Migrated schema checks.
//!
//! The Diesel table definitions and the cetane migrations are written by hand;
//! these tests keep the two in step.

use std::collections::BTreeMap;

use rusqlite::{Connection, Result as SqliteResult};

use wikisync::repository::migrations;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnInfo {
    col_type: String,
    not_null: bool,
    primary_key: bool,
}

/// Column layout of every user table.
fn extract_tables(conn: &Connection) -> SqliteResult<BTreeMap<String, BTreeMap<String, ColumnInfo>>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<SqliteResult<Vec<_>>>()?;

    let mut tables = BTreeMap::new();
    for name in names {
        let mut pragma = conn.prepare(&format!("PRAGMA table_info(\"{}\")", name))?;
        let columns = pragma
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    ColumnInfo {
                        col_type: row.get::<_, String>(2)?.to_uppercase(),
                        not_null: row.get(3)?,
                        primary_key: row.get::<_, i32>(5)? > 0,
                    },
                ))
            })?
            .collect::<SqliteResult<BTreeMap<_, _>>>()?;
        tables.insert(name, columns);
    }
    Ok(tables)
}

fn column_names(columns: &BTreeMap<String, ColumnInfo>) -> Vec<&str> {
    columns.keys().map(String::as_str).collect()
}

async fn migrated() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.db");
    let url = format!("sqlite:{}", path.display());
    migrations::run_migrations(&url).await.unwrap();
    (dir, path.display().to_string())
}

#[tokio::test]
async fn test_migrations_create_mirror_tables() {
    let (_dir, path) = migrated().await;
    let conn = Connection::open(&path).unwrap();
    let tables = extract_tables(&conn).unwrap();

    let names: Vec<&str> = tables.keys().map(String::as_str).collect();
    assert_eq!(
        names,
        vec![
            "__cetane_migrations",
            "files",
            "links",
            "pages",
            "revisions",
            "scrape_runs",
            "sync_checkpoint",
        ]
    );

    let mut page_columns = column_names(&tables["pages"]);
    page_columns.sort();
    assert_eq!(
        page_columns,
        vec![
            "created_at",
            "deleted_at",
            "latest_revision_id",
            "namespace",
            "page_id",
            "title",
            "updated_at",
        ]
    );
    assert!(tables["pages"]["page_id"].primary_key);
    assert!(!tables["pages"]["deleted_at"].not_null);

    let revisions = &tables["revisions"];
    assert_eq!(revisions["revision_id"].col_type, "INTEGER");
    assert!(revisions["content_hash"].not_null);
    assert!(!revisions["content"].not_null);
    assert!(!revisions["revision_id"].primary_key);

    let links = &tables["links"];
    assert!(links["source_page_id"].primary_key);
    assert!(links["target_title"].primary_key);
    assert!(links["kind"].primary_key);

    for column in ["carry_over", "counts", "failures", "heartbeat_at", "integrity", "mode"] {
        assert!(
            tables["scrape_runs"].contains_key(column),
            "scrape_runs is missing {}",
            column
        );
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_dir, path) = migrated().await;
    let url = format!("sqlite:{}", path);

    let applied = migrations::applied_migrations(&url).await.unwrap();
    assert_eq!(
        applied,
        vec!["0001_pages_revisions", "0002_files_links", "0003_run_ledger"]
    );

    assert!(migrations::run_migrations(&url).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checkpoint_table_holds_one_row() {
    let (_dir, path) = migrated().await;
    let conn = Connection::open(&path).unwrap();

    let insert = "INSERT INTO sync_checkpoint (id, run_id, phase, window_start, window_end, change_set, updated_at) \
                  VALUES (?1, 'run', 'discovering', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', '{}', '2024-01-01T00:00:00Z')";
    conn.execute(insert, [1]).unwrap();
    assert!(conn.execute(insert, [2]).is_err());
}
