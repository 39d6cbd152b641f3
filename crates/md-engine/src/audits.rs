//! Audit trail repository
//!
//! Append-only. There are deliberately no update or delete operations.

use md_common::{Audit, AuditEvent};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use crate::error::Result;

const AUDIT_COLUMNS: &str = "id, event, data, created_by, created_at";

fn audit_from_row(row: &PgRow) -> Result<Audit> {
    Ok(Audit {
        id: row.get("id"),
        event: row.get("event"),
        data: row.get("data"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    })
}

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        event: AuditEvent,
        data: &serde_json::Value,
        created_by: &str,
    ) -> Result<Audit> {
        let row = sqlx::query(&format!(
            "INSERT INTO audits (event, data, created_by) \
             VALUES ($1, $2, $3) RETURNING {AUDIT_COLUMNS}"
        ))
        .bind(event.to_string())
        .bind(data)
        .bind(created_by)
        .fetch_one(&mut **tx)
        .await?;

        info!(event = %event, created_by = %created_by, "Audit recorded");
        audit_from_row(&row)
    }

    pub async fn find_recent(&self, limit: i64) -> Result<Vec<Audit>> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audits ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    /// Audits of one event kind referencing a mention, oldest first.
    pub async fn find_by_event_and_mention(
        &self,
        event: AuditEvent,
        mention_id: i64,
    ) -> Result<Vec<Audit>> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audits \
             WHERE event = $1 AND data->>'mentionId' = $2 ORDER BY id ASC"
        ))
        .bind(event.to_string())
        .bind(mention_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }
}
