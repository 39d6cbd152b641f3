//! Outbox task repository
//!
//! Tasks are the durable representation of deferred work. A reply insert
//! racing another reply for the same mention loses at the partial unique
//! index and surfaces as a conflict, which the engine records as a
//! `REPLY_MENTION_IGNORED` row instead.

use chrono::{DateTime, Utc};
use md_common::{Task, TaskCode};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::error::{map_insert_error, EngineError, Result};

const TASK_COLUMNS: &str =
    "id, code, data, started_at, finished_at, created_by, created_at, updated_at";

pub(crate) fn task_from_row(row: &PgRow) -> Result<Task> {
    let code_raw: String = row.get("code");
    let code = TaskCode::from_str(&code_raw)
        .ok_or_else(|| EngineError::internal(format!("unknown task code '{code_raw}'")))?;

    Ok(Task {
        id: row.get("id"),
        code,
        data: row.get("data"),
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a task outside any caller transaction.
    pub async fn insert(
        &self,
        code: TaskCode,
        data: &serde_json::Value,
        created_by: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Task> {
        let row = sqlx::query(&format!(
            "INSERT INTO tasks (code, data, started_at, created_by) \
             VALUES ($1, $2, $3, $4) RETURNING {TASK_COLUMNS}"
        ))
        .bind(code.as_str())
        .bind(data)
        .bind(started_at)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "task"))?;

        metrics::counter!("engine.tasks.created_total", "code" => code.as_str()).increment(1);
        task_from_row(&row)
    }

    /// Insert a task that is already done: `started_at = finished_at = at`.
    /// Used to record rejected duplicate replies.
    pub async fn insert_completed(
        &self,
        code: TaskCode,
        data: &serde_json::Value,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Task> {
        let row = sqlx::query(&format!(
            "INSERT INTO tasks (code, data, started_at, finished_at, created_by) \
             VALUES ($1, $2, $3, $3, $4) RETURNING {TASK_COLUMNS}"
        ))
        .bind(code.as_str())
        .bind(data)
        .bind(at)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "task"))?;

        metrics::counter!("engine.tasks.created_total", "code" => code.as_str()).increment(1);
        task_from_row(&row)
    }

    /// Insert a task inside the caller's transaction. A unique-index
    /// violation surfaces as `EngineError::Conflict`.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        code: TaskCode,
        data: &serde_json::Value,
        created_by: &str,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<Task> {
        let row = sqlx::query(&format!(
            "INSERT INTO tasks (code, data, started_at, finished_at, created_by) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TASK_COLUMNS}"
        ))
        .bind(code.as_str())
        .bind(data)
        .bind(started_at)
        .bind(finished_at)
        .bind(created_by)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_insert_error(e, "task"))?;

        task_from_row(&row)
    }

    /// Drop unfinished reply tasks for a mention whose `started_at` fell out
    /// of the reply window; they are abandoned and must not block a fresh
    /// attempt at the unique index.
    pub async fn delete_stale_unfinished_replies_tx(
        tx: &mut Transaction<'_, Postgres>,
        mention_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tasks \
             WHERE code = $1 AND data->>'mentionId' = $2 \
               AND finished_at IS NULL AND started_at < $3",
        )
        .bind(TaskCode::ReplyMention.as_str())
        .bind(mention_id.to_string())
        .bind(cutoff)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() > 0 {
            debug!(
                mention_id = mention_id,
                count = result.rows_affected(),
                "Deleted stale unfinished reply tasks"
            );
        }
        Ok(result.rows_affected())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Unfinished tasks of a code whose `started_at` is still inside the
    /// recovery window.
    pub async fn find_unfinished_in_window(
        &self,
        code: TaskCode,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE code = $1 AND finished_at IS NULL AND started_at >= $2 \
             ORDER BY started_at ASC"
        ))
        .bind(code.as_str())
        .bind(window_start)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Whether any fetch task created after `window_start` already covers
    /// `post_id`. Matches both live task payloads (`posts` as objects) and
    /// finished ones (`posts` collapsed to ids); the containment operator
    /// rides the GIN index on `data`.
    pub async fn recently_fetched(
        &self,
        code: TaskCode,
        post_id: &str,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        let as_object = serde_json::json!({ "posts": [{ "id": post_id }] });
        let as_id = serde_json::json!({ "posts": [post_id] });

        let row = sqlx::query(
            "SELECT EXISTS ( \
                SELECT 1 FROM tasks \
                WHERE code = $1 AND created_at >= $2 \
                  AND (data @> $3 OR data @> $4) \
             ) AS covered",
        )
        .bind(code.as_str())
        .bind(window_start)
        .bind(&as_object)
        .bind(&as_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("covered"))
    }

    /// Mark a task finished, replacing its data payload.
    pub async fn finish(
        &self,
        id: i64,
        data: &serde_json::Value,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET data = $2, finished_at = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(data)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        metrics::counter!("engine.tasks.finished_total").increment(1);
        Ok(())
    }

    /// Merge keys into a task's data payload inside a transaction, optionally
    /// marking it finished in the same write.
    pub async fn update_data_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        patch: &serde_json::Value,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET data = data || $2, \
             finished_at = COALESCE($3, finished_at), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(patch)
        .bind(finished_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// All tasks of a code (test and diagnostics helper).
    pub async fn list_by_code(&self, code: TaskCode) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE code = $1 ORDER BY id ASC"
        ))
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }
}
