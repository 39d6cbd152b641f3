//! Mention repository
//!
//! All values reach SQL as bound parameters; nothing from the upstream
//! payloads is ever interpolated into a statement.

use md_common::{Mention, MentionKind, MentionState};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::{EngineError, Result};

const MENTION_COLUMNS: &str = "id, content, social_media_platform_ref, social_media_api_post_ref, \
     platform, type, state, disposition, user_id, mention_id, data, created_at, updated_at";

/// A mention about to be ingested from an upstream comment batch.
#[derive(Debug, Clone)]
pub struct NewMention {
    pub content: String,
    pub social_media_platform_ref: String,
    pub social_media_api_post_ref: Option<String>,
    pub platform: String,
    pub kind: MentionKind,
    pub data: serde_json::Value,
}

pub(crate) fn mention_from_row(row: &PgRow) -> Result<Mention> {
    let kind_raw: String = row.get("type");
    let kind = MentionKind::from_str(&kind_raw)
        .ok_or_else(|| EngineError::internal(format!("unknown mention type '{kind_raw}'")))?;

    let state = row
        .try_get::<Option<String>, _>("state")?
        .as_deref()
        .and_then(MentionState::from_str);

    Ok(Mention {
        id: row.get("id"),
        content: row.get("content"),
        social_media_platform_ref: row.get("social_media_platform_ref"),
        social_media_api_post_ref: row.try_get("social_media_api_post_ref")?,
        platform: row.get("platform"),
        kind,
        state,
        disposition: row.try_get("disposition")?,
        user_id: row.try_get("user_id")?,
        mention_id: row.try_get("mention_id")?,
        data: row.get("data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub struct MentionRepository {
    pool: PgPool,
}

impl MentionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All mentions, newest first.
    pub async fn list_all(&self) -> Result<Vec<Mention>> {
        let rows = sqlx::query(&format!(
            "SELECT {MENTION_COLUMNS} FROM mentions ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mention_from_row).collect()
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Mention>> {
        let row = sqlx::query(&format!(
            "SELECT {MENTION_COLUMNS} FROM mentions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mention_from_row).transpose()
    }

    /// Ingest a comment batch, skipping refs that already exist.
    ///
    /// One statement per batch: rows are passed as parallel bound arrays and
    /// filtered against `social_media_platform_ref` inside the insert, with
    /// `ON CONFLICT DO NOTHING` closing the race between concurrent batches.
    /// Returns the number of newly created mentions.
    pub async fn upsert_batch(&self, batch: &[NewMention]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut contents = Vec::with_capacity(batch.len());
        let mut refs = Vec::with_capacity(batch.len());
        let mut post_refs = Vec::with_capacity(batch.len());
        let mut platforms = Vec::with_capacity(batch.len());
        let mut kinds = Vec::with_capacity(batch.len());
        let mut payloads = Vec::with_capacity(batch.len());
        for item in batch {
            contents.push(item.content.clone());
            refs.push(item.social_media_platform_ref.clone());
            post_refs.push(item.social_media_api_post_ref.clone());
            platforms.push(item.platform.clone());
            kinds.push(item.kind.to_string());
            payloads.push(serde_json::to_string(&item.data)?);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO mentions
                (content, social_media_platform_ref, social_media_api_post_ref, platform, type, data)
            SELECT t.content, t.ref, t.post_ref, t.platform, t.kind, t.payload::jsonb
            FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[])
                AS t(content, ref, post_ref, platform, kind, payload)
            WHERE NOT EXISTS (
                SELECT 1 FROM mentions m WHERE m.social_media_platform_ref = t.ref
            )
            ON CONFLICT (social_media_platform_ref) DO NOTHING
            "#,
        )
        .bind(&contents)
        .bind(&refs)
        .bind(&post_refs)
        .bind(&platforms)
        .bind(&kinds)
        .bind(&payloads)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Update triage fields atomically. Each `set_*` flag controls whether
    /// the matching column is touched, so a single statement covers every
    /// patch shape.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_patch_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        set_user: bool,
        user_id: Option<i64>,
        set_disposition: bool,
        disposition: Option<String>,
        set_state: bool,
        state: Option<MentionState>,
    ) -> Result<Mention> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE mentions SET
                user_id     = CASE WHEN $2 THEN $3 ELSE user_id END,
                disposition = CASE WHEN $4 THEN $5 ELSE disposition END,
                state       = CASE WHEN $6 THEN $7 ELSE state END,
                updated_at  = now()
            WHERE id = $1
            RETURNING {MENTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(set_user)
        .bind(user_id)
        .bind(set_disposition)
        .bind(disposition)
        .bind(set_state)
        .bind(state.map(|s| s.to_string()))
        .fetch_one(&mut **tx)
        .await?;

        mention_from_row(&row)
    }

    pub async fn set_state_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        state: Option<MentionState>,
    ) -> Result<()> {
        sqlx::query("UPDATE mentions SET state = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(state.map(|s| s.to_string()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Insert the child mention recording a reply we sent.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_reply_child_tx(
        tx: &mut Transaction<'_, Postgres>,
        parent: &Mention,
        content: &str,
        platform_ref: &str,
        data: serde_json::Value,
        user_id: Option<i64>,
    ) -> Result<Mention> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO mentions
                (content, social_media_platform_ref, social_media_api_post_ref,
                 platform, type, user_id, mention_id, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MENTION_COLUMNS}
            "#
        ))
        .bind(content)
        .bind(platform_ref)
        .bind(&parent.social_media_api_post_ref)
        .bind(&parent.platform)
        .bind(MentionKind::Reply.to_string())
        .bind(user_id)
        .bind(parent.id)
        .bind(&data)
        .fetch_one(&mut **tx)
        .await?;

        mention_from_row(&row)
    }

    /// Count mentions sharing a platform ref (test and diagnostics helper).
    pub async fn count_by_platform_ref(&self, platform_ref: &str) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM mentions WHERE social_media_platform_ref = $1")
                .bind(platform_ref)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }
}
