//! Mirrored file metadata repository.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{FileRow, NewFileRow};
use super::parse_datetime;
use super::format_datetime;
use super::pool::{DbPool, DieselError};
use super::util::BATCH_SIZE;
use crate::models::MirroredFile;
use crate::schema::files;
use crate::with_conn;

impl From<FileRow> for MirroredFile {
    fn from(row: FileRow) -> Self {
        MirroredFile {
            name: row.name,
            content_hash: row.content_hash,
            size: row.size.max(0) as u64,
            mime_type: row.mime_type,
            uploaded_at: parse_datetime(&row.uploaded_at),
            local_path: PathBuf::from(row.local_path),
            local_sha256: row.local_sha256,
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

/// Diesel-based file repository.
#[derive(Clone)]
pub struct FileRepository {
    pool: DbPool,
}

impl FileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, name: &str) -> Result<Option<MirroredFile>, DieselError> {
        with_conn!(self.pool, conn, {
            files::table
                .find(name)
                .first::<FileRow>(&mut conn)
                .await
                .optional()
                .map(|opt| opt.map(MirroredFile::from))
        })
    }

    /// Stored origin hashes keyed by file name, for the given names.
    pub async fn stored_hashes(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, String>, DieselError> {
        let mut hashes = HashMap::new();
        if names.is_empty() {
            return Ok(hashes);
        }
        with_conn!(self.pool, conn, {
            for chunk in names.chunks(BATCH_SIZE) {
                let rows: Vec<(String, String)> = files::table
                    .filter(files::name.eq_any(chunk))
                    .select((files::name, files::content_hash))
                    .load(&mut conn)
                    .await?;
                hashes.extend(rows);
            }
            Ok(hashes)
        })
    }

    /// Insert or replace the metadata row for one file.
    pub async fn replace(&self, file: &MirroredFile) -> Result<(), DieselError> {
        let row = NewFileRow {
            name: &file.name,
            content_hash: &file.content_hash,
            size: file.size as i64,
            mime_type: &file.mime_type,
            uploaded_at: format_datetime(&file.uploaded_at),
            local_path: file.local_path.display().to_string(),
            local_sha256: &file.local_sha256,
            updated_at: format_datetime(&Utc::now()),
        };

        with_conn!(self.pool, conn, {
            diesel::insert_into(files::table)
                .values(&row)
                .on_conflict(files::name)
                .do_update()
                .set(&row)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn count(&self) -> Result<u64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            let count: i64 = files::table.select(count_star()).first(&mut conn).await?;
            Ok(count as u64)
        })
    }
}
