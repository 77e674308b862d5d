// Diesel table definitions. Keep in sync with src/migrations.

diesel::table! {
    files (name) {
        name -> Text,
        content_hash -> Text,
        size -> BigInt,
        mime_type -> Text,
        uploaded_at -> Text,
        local_path -> Text,
        local_sha256 -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    links (source_page_id, target_title, kind) {
        source_page_id -> BigInt,
        target_title -> Text,
        kind -> Text,
    }
}

diesel::table! {
    pages (page_id) {
        page_id -> BigInt,
        namespace -> Integer,
        title -> Text,
        latest_revision_id -> Nullable<BigInt>,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
    }
}

diesel::table! {
    revisions (id) {
        id -> BigInt,
        revision_id -> BigInt,
        page_id -> BigInt,
        parent_id -> Nullable<BigInt>,
        timestamp -> Text,
        user_id -> Nullable<BigInt>,
        user_name -> Nullable<Text>,
        comment -> Nullable<Text>,
        content -> Nullable<Text>,
        content_hash -> Text,
        size -> BigInt,
        minor -> Integer,
        tags -> Text,
        inserted_at -> Text,
    }
}

diesel::table! {
    scrape_runs (id) {
        id -> Text,
        mode -> Text,
        status -> Text,
        started_at -> Text,
        finished_at -> Nullable<Text>,
        heartbeat_at -> Text,
        window_start -> Nullable<Text>,
        window_end -> Nullable<Text>,
        host -> Nullable<Text>,
        resumed_from -> Nullable<Text>,
        counts -> Text,
        failures -> Text,
        error_summary -> Nullable<Text>,
        integrity -> Text,
        carry_over -> Text,
    }
}

diesel::table! {
    sync_checkpoint (id) {
        id -> Integer,
        run_id -> Text,
        phase -> Text,
        cursors -> Text,
        window_start -> Text,
        window_end -> Text,
        change_set -> Text,
        failed_pages -> Text,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    files,
    links,
    pages,
    revisions,
    scrape_runs,
    sync_checkpoint,
);
