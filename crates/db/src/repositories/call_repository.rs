use async_trait::async_trait;
use callbridge_core::{Call, CallStatus};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::CallRow;
use crate::store::CallStore;

const CALL_COLUMNS: &str = "id, direction, status, phone_number, from_number, telephony_leg_id, \
     voice_session_id, join_target, prompt, transcript, summary, analysis_error, \
     analysis_dispatched_at, error_detail, metadata, last_telephony_sequence, \
     voice_session_ended_at, created_at, started_at, ended_at, updated_at";

/// SQLite-backed [`CallStore`].
#[derive(Clone)]
pub struct CallRepository {
    pool: SqlitePool,
}

impl CallRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: String) -> Result<Option<Call>, DbError> {
        let sql = format!("SELECT {} FROM calls WHERE {} = ?", CALL_COLUMNS, clause);
        let row: Option<CallRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn count_by_status(&self) -> Result<Vec<(CallStatus, i64)>, DbError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM calls GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| CallStatus::parse(&status).map(|s| (s, count)))
            .collect())
    }
}

#[async_trait]
impl CallStore for CallRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Call>, DbError> {
        self.fetch_one_where("id", id.to_string()).await
    }

    async fn put(&self, call: &Call) -> Result<(), DbError> {
        let row = CallRow::try_from(call)?;

        sqlx::query(
            r#"
            INSERT INTO calls (
                id, direction, status, phone_number, from_number, telephony_leg_id,
                voice_session_id, join_target, prompt, transcript, summary, analysis_error,
                analysis_dispatched_at, error_detail, metadata, last_telephony_sequence,
                voice_session_ended_at, created_at, started_at, ended_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                from_number = excluded.from_number,
                telephony_leg_id = excluded.telephony_leg_id,
                voice_session_id = excluded.voice_session_id,
                join_target = excluded.join_target,
                transcript = excluded.transcript,
                summary = excluded.summary,
                analysis_error = excluded.analysis_error,
                analysis_dispatched_at = excluded.analysis_dispatched_at,
                error_detail = excluded.error_detail,
                metadata = excluded.metadata,
                last_telephony_sequence = excluded.last_telephony_sequence,
                voice_session_ended_at = excluded.voice_session_ended_at,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.direction)
        .bind(&row.status)
        .bind(&row.phone_number)
        .bind(&row.from_number)
        .bind(&row.telephony_leg_id)
        .bind(&row.voice_session_id)
        .bind(&row.join_target)
        .bind(&row.prompt)
        .bind(&row.transcript)
        .bind(&row.summary)
        .bind(&row.analysis_error)
        .bind(row.analysis_dispatched_at)
        .bind(&row.error_detail)
        .bind(&row.metadata)
        .bind(row.last_telephony_sequence)
        .bind(row.voice_session_ended_at)
        .bind(row.created_at)
        .bind(row.started_at)
        .bind(row.ended_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_write)?;

        Ok(())
    }

    async fn list_by_status(&self, status: CallStatus) -> Result<Vec<Call>, DbError> {
        let sql = format!(
            "SELECT {} FROM calls WHERE status = ? ORDER BY created_at ASC",
            CALL_COLUMNS
        );
        let rows: Vec<CallRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn find_by_telephony_leg(&self, leg_id: &str) -> Result<Option<Call>, DbError> {
        self.fetch_one_where("telephony_leg_id", leg_id.to_string())
            .await
    }

    async fn find_by_voice_session(&self, session_id: &str) -> Result<Option<Call>, DbError> {
        self.fetch_one_where("voice_session_id", session_id.to_string())
            .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Call>, DbError> {
        let sql = format!(
            "SELECT {} FROM calls ORDER BY created_at DESC LIMIT ?",
            CALL_COLUMNS
        );
        let rows: Vec<CallRow> = sqlx::query_as(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}
