//! Single-row checkpoint store.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::CheckpointRow;
use super::{format_datetime, parse_datetime};
use super::pool::{DbPool, DieselError};
use super::util::{enum_error, json_error};
use crate::models::{CheckpointState, SyncPhase};
use crate::schema::sync_checkpoint;
use crate::with_conn;

/// The checkpoint table holds at most this row.
const CHECKPOINT_ROW_ID: i32 = 1;

impl TryFrom<CheckpointRow> for CheckpointState {
    type Error = diesel::result::Error;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(CheckpointState {
            phase: SyncPhase::from_str(&row.phase).ok_or_else(|| enum_error("phase", &row.phase))?,
            cursors: serde_json::from_str(&row.cursors).map_err(|e| json_error("cursors", e))?,
            window_start: parse_datetime(&row.window_start),
            window_end: parse_datetime(&row.window_end),
            change_set: serde_json::from_str(&row.change_set)
                .map_err(|e| json_error("change_set", e))?,
            failed_pages: serde_json::from_str(&row.failed_pages)
                .map_err(|e| json_error("failed_pages", e))?,
            updated_at: parse_datetime(&row.updated_at),
            run_id: row.run_id,
        })
    }
}

/// Diesel-based checkpoint repository.
#[derive(Clone)]
pub struct CheckpointRepository {
    pool: DbPool,
}

impl CheckpointRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load the checkpoint, if any. A row that fails to decode is an error.
    pub async fn load(&self) -> Result<Option<CheckpointState>, DieselError> {
        with_conn!(self.pool, conn, {
            sync_checkpoint::table
                .find(CHECKPOINT_ROW_ID)
                .select(CheckpointRow::as_select())
                .first::<CheckpointRow>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(CheckpointState::try_from).transpose())
        })
    }

    /// Overwrite the checkpoint.
    pub async fn save(&self, state: &CheckpointState) -> Result<(), DieselError> {
        let row = CheckpointRow {
            id: CHECKPOINT_ROW_ID,
            run_id: state.run_id.clone(),
            phase: state.phase.as_str().to_string(),
            cursors: serde_json::to_string(&state.cursors)
                .map_err(|e| DieselError::SerializationError(Box::new(e)))?,
            window_start: format_datetime(&state.window_start),
            window_end: format_datetime(&state.window_end),
            change_set: serde_json::to_string(&state.change_set)
                .map_err(|e| DieselError::SerializationError(Box::new(e)))?,
            failed_pages: serde_json::to_string(&state.failed_pages)
                .map_err(|e| DieselError::SerializationError(Box::new(e)))?,
            updated_at: format_datetime(&state.updated_at),
        };

        with_conn!(self.pool, conn, {
            diesel::insert_into(sync_checkpoint::table)
                .values(&row)
                .on_conflict(sync_checkpoint::id)
                .do_update()
                .set(&row)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Delete the checkpoint. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let rows = diesel::delete(sync_checkpoint::table)
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }
}
