//! Postgres store and schema bootstrap
//!
//! Schema is applied at startup with `CREATE ... IF NOT EXISTS` statements.
//! The partial unique indexes on `tasks` are load-bearing: they are what
//! enforces at-most-one reply task per mention and content-level dedup at
//! the store, under any number of concurrent processes.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mentions (
        id BIGSERIAL PRIMARY KEY,
        content TEXT NOT NULL,
        social_media_platform_ref TEXT NOT NULL UNIQUE,
        social_media_api_post_ref TEXT,
        platform TEXT NOT NULL,
        type TEXT NOT NULL,
        state TEXT,
        disposition TEXT,
        user_id BIGINT REFERENCES users(id),
        mention_id BIGINT REFERENCES mentions(id),
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_mentions_created_at ON mentions (created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id BIGSERIAL PRIMARY KEY,
        code TEXT NOT NULL,
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        started_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_code ON tasks (code)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_mention_id ON tasks ((data->>'mentionId'))",
    "CREATE INDEX IF NOT EXISTS idx_tasks_data_gin ON tasks USING GIN (data)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_tasks_reply_mention
        ON tasks (code, (data->>'mentionId'))
        WHERE code = 'REPLY_MENTION'
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_tasks_reply_mention_content
        ON tasks (code, (data->>'mentionId'), (data->>'content'))
        WHERE code = 'REPLY_MENTION'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audits (
        id BIGSERIAL PRIMARY KEY,
        event TEXT NOT NULL,
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS circuit_breaker_states (
        id BIGSERIAL PRIMARY KEY,
        circuit_name TEXT NOT NULL UNIQUE,
        state_data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Shared Postgres store.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Store schema initialized");
        Ok(())
    }
}
