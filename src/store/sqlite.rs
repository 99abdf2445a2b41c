//! SQLite-backed [`Store`] implementation.
//!
//! Wraps a [`SqlitePool`] and translates every `Store` method into SQL
//! against the schema created by `migrate::run_migrations`. Multi-entity
//! mutations run inside a single transaction.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{
    Document, Excerpt, Frequency, ProcessingState, ProgressStatus, Schedule, SourceFormat, User,
    UserProgress,
};

use super::{now_ts, AdvanceOutcome, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document, StoreError> {
    let state_str: String = row.get("state");
    let format_str: String = row.get("format");
    Ok(Document {
        identity: row.get("identity"),
        display_name: row.get("display_name"),
        author: row.get("author"),
        size_bytes: row.get("size_bytes"),
        format: SourceFormat::parse(&format_str)
            .ok_or_else(|| StoreError::Integrity(format!("bad format column: {format_str}")))?,
        state: ProcessingState::parse(&state_str)
            .ok_or_else(|| StoreError::Integrity(format!("bad state column: {state_str}")))?,
        failure_reason: row.get("failure_reason"),
        excerpt_count: row.get("excerpt_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_excerpt(row: &SqliteRow) -> Excerpt {
    Excerpt {
        document_identity: row.get("document_identity"),
        seq_index: row.get("seq_index"),
        text: row.get("text"),
        paragraph_count: row.get("paragraph_count"),
    }
}

fn row_to_progress(row: &SqliteRow) -> Result<UserProgress, StoreError> {
    let status_str: String = row.get("status");
    Ok(UserProgress {
        user_id: row.get("user_id"),
        document_identity: row.get("document_identity"),
        current_index: row.get("current_index"),
        status: ProgressStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Integrity(format!("bad status column: {status_str}")))?,
        active: row.get::<i64, _>("active") != 0,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_schedule(row: &SqliteRow) -> Result<Schedule, StoreError> {
    let tod_str: String = row.get("time_of_day");
    let freq_str: String = row.get("frequency");
    Ok(Schedule {
        user_id: row.get("user_id"),
        time_of_day: tod_str
            .parse()
            .map_err(|_| StoreError::Integrity(format!("bad time_of_day column: {tod_str}")))?,
        frequency: Frequency::parse(&freq_str)
            .ok_or_else(|| StoreError::Integrity(format!("bad frequency column: {freq_str}")))?,
        timezone: row.get("timezone"),
        active: row.get::<i64, _>("active") != 0,
        last_delivery_at: row.get("last_delivery_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (chat_id, display_name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, users.display_name)
            "#,
        )
        .bind(user.chat_id)
        .bind(&user.display_name)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT chat_id, display_name, created_at FROM users WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| User {
            chat_id: r.get("chat_id"),
            display_name: r.get("display_name"),
            created_at: r.get("created_at"),
        }))
    }

    async fn insert_document(&self, doc: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (identity, display_name, author, size_bytes, format,
                                   state, failure_reason, excerpt_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity) DO NOTHING
            "#,
        )
        .bind(&doc.identity)
        .bind(&doc.display_name)
        .bind(&doc.author)
        .bind(doc.size_bytes)
        .bind(doc.format.as_str())
        .bind(doc.state.as_str())
        .bind(&doc.failure_reason)
        .bind(doc.excerpt_count)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, identity: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY display_name COLLATE NOCASE")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn mark_processing(&self, identity: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE documents SET state = 'processing', updated_at = ? WHERE identity = ?")
            .bind(now_ts())
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_ready(&self, identity: &str, excerpts: &[Excerpt]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM excerpts WHERE document_identity = ?")
            .bind(identity)
            .execute(&mut *tx)
            .await?;

        for excerpt in excerpts {
            sqlx::query(
                "INSERT INTO excerpts (document_identity, seq_index, text, paragraph_count) VALUES (?, ?, ?, ?)",
            )
            .bind(&excerpt.document_identity)
            .bind(excerpt.seq_index)
            .bind(&excerpt.text)
            .bind(excerpt.paragraph_count)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET state = 'ready', excerpt_count = ?, failure_reason = NULL, updated_at = ?
            WHERE identity = ?
            "#,
        )
        .bind(excerpts.len() as i64)
        .bind(now_ts())
        .bind(identity)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Integrity(format!(
                "cannot commit excerpts for unknown document {identity}"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, identity: &str, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE documents SET state = 'failed', failure_reason = ?, updated_at = ? WHERE identity = ?",
        )
        .bind(reason)
        .bind(now_ts())
        .bind(identity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_excerpt(
        &self,
        identity: &str,
        seq_index: i64,
    ) -> Result<Option<Excerpt>, StoreError> {
        let row =
            sqlx::query("SELECT * FROM excerpts WHERE document_identity = ? AND seq_index = ?")
                .bind(identity)
                .bind(seq_index)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| row_to_excerpt(&r)))
    }

    async fn get_excerpts(&self, identity: &str) -> Result<Vec<Excerpt>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM excerpts WHERE document_identity = ? ORDER BY seq_index")
                .bind(identity)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(row_to_excerpt).collect())
    }

    async fn activate_progress(
        &self,
        user_id: i64,
        identity: &str,
    ) -> Result<UserProgress, StoreError> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let doc_exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE identity = ?")
                .bind(identity)
                .fetch_one(&mut *tx)
                .await?;
        if !doc_exists {
            return Err(StoreError::Integrity(format!(
                "progress references unknown document {identity}"
            )));
        }

        sqlx::query("UPDATE user_progress SET active = 0, updated_at = ? WHERE user_id = ? AND active = 1")
            .bind(now)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        // Reselecting always resets the position to zero, including for the
        // document that is already active. Documented contract.
        sqlx::query(
            r#"
            INSERT INTO user_progress (user_id, document_identity, current_index, status,
                                       active, started_at, completed_at, updated_at)
            VALUES (?, ?, 0, 'not_started', 1, ?, NULL, ?)
            ON CONFLICT(user_id, document_identity) DO UPDATE SET
                current_index = 0,
                status = 'not_started',
                active = 1,
                started_at = excluded.started_at,
                completed_at = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(identity)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM user_progress WHERE user_id = ? AND document_identity = ?",
        )
        .bind(user_id)
        .bind(identity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_progress(&row)
    }

    async fn get_active_progress(
        &self,
        user_id: i64,
    ) -> Result<Option<UserProgress>, StoreError> {
        let row = sqlx::query("SELECT * FROM user_progress WHERE user_id = ? AND active = 1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_progress(&r)).transpose()
    }

    async fn advance_progress(
        &self,
        user_id: i64,
        identity: &str,
    ) -> Result<AdvanceOutcome, StoreError> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT p.*, d.excerpt_count AS total
            FROM user_progress p
            JOIN documents d ON d.identity = p.document_identity
            WHERE p.user_id = ? AND p.document_identity = ?
            "#,
        )
        .bind(user_id)
        .bind(identity)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(r) => r,
            None => {
                return Err(StoreError::Integrity(format!(
                    "user {user_id} has no progress in document {identity} to advance"
                )))
            }
        };

        let mut progress = row_to_progress(&row)?;
        let total: i64 = row.get("total");

        if progress.status == ProgressStatus::Completed {
            return Ok(AdvanceOutcome::NoFurtherContent);
        }

        progress.current_index += 1;
        let just_completed = progress.current_index >= total;
        progress.status = if just_completed {
            ProgressStatus::Completed
        } else {
            ProgressStatus::InProgress
        };
        progress.completed_at = if just_completed { Some(now) } else { None };
        progress.updated_at = now;

        sqlx::query(
            r#"
            UPDATE user_progress
            SET current_index = ?, status = ?, completed_at = ?, updated_at = ?
            WHERE user_id = ? AND document_identity = ?
            "#,
        )
        .bind(progress.current_index)
        .bind(progress.status.as_str())
        .bind(progress.completed_at)
        .bind(progress.updated_at)
        .bind(user_id)
        .bind(&progress.document_identity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if just_completed {
            Ok(AdvanceOutcome::JustCompleted(progress))
        } else {
            Ok(AdvanceOutcome::Advanced(progress))
        }
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schedules (user_id, time_of_day, frequency, timezone, active,
                                   last_delivery_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                time_of_day = excluded.time_of_day,
                frequency = excluded.frequency,
                timezone = excluded.timezone,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(schedule.user_id)
        .bind(schedule.time_of_day.to_string())
        .bind(schedule.frequency.as_str())
        .bind(&schedule.timezone)
        .bind(schedule.active as i64)
        .bind(schedule.last_delivery_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule(&self, user_id: i64) -> Result<Option<Schedule>, StoreError> {
        let row = sqlx::query("SELECT * FROM schedules WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_schedule(&r)).transpose()
    }

    async fn list_active_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_schedule).collect()
    }

    async fn set_schedule_active(&self, user_id: i64, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE schedules SET active = ?, updated_at = ? WHERE user_id = ?")
            .bind(active as i64)
            .bind(now_ts())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_delivery(&self, user_id: i64, at: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE schedules SET last_delivery_at = ?, updated_at = ? WHERE user_id = ?")
            .bind(at)
            .bind(now_ts())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
