use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_run_ledger")
        .depends_on(&["0002_files_links"])
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE scrape_runs (
    id TEXT PRIMARY KEY NOT NULL,
    mode TEXT NOT NULL DEFAULT 'incremental',
    status TEXT NOT NULL DEFAULT 'running',
    started_at TEXT NOT NULL,
    finished_at TEXT,
    heartbeat_at TEXT NOT NULL,
    window_start TEXT,
    window_end TEXT,
    host TEXT,
    resumed_from TEXT,
    counts TEXT NOT NULL DEFAULT '{}',
    failures TEXT NOT NULL DEFAULT '[]',
    error_summary TEXT,
    integrity TEXT NOT NULL DEFAULT '[]',
    carry_over TEXT NOT NULL DEFAULT '{}'
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_scrape_runs_status ON scrape_runs(status, window_end)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX idx_scrape_runs_started ON scrape_runs(started_at)",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE sync_checkpoint (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
    run_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    cursors TEXT NOT NULL DEFAULT '{}',
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    change_set TEXT NOT NULL,
    failed_pages TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
)"#,
        ))
}
