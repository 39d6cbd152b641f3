//! Postgres-backed circuit breaker state store
//!
//! One row per circuit, upserted on every transition so that multiple
//! process instances converge on the same open/closed decision.

use async_trait::async_trait;
use md_gateway::{BreakerSnapshot, BreakerStateStore};
use sqlx::{PgPool, Row};
use tracing::warn;

pub struct PgBreakerStateStore {
    pool: PgPool,
}

impl PgBreakerStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BreakerStateStore for PgBreakerStateStore {
    async fn load(&self, circuit_name: &str) -> anyhow::Result<Option<BreakerSnapshot>> {
        let row = sqlx::query(
            "SELECT state_data FROM circuit_breaker_states WHERE circuit_name = $1",
        )
        .bind(circuit_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.get("state_data");
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, circuit_name: &str, snapshot: &BreakerSnapshot) -> anyhow::Result<()> {
        let data = serde_json::to_value(snapshot)?;
        sqlx::query(
            "INSERT INTO circuit_breaker_states (circuit_name, state_data) \
             VALUES ($1, $2) \
             ON CONFLICT (circuit_name) DO UPDATE \
             SET state_data = EXCLUDED.state_data, updated_at = now()",
        )
        .bind(circuit_name)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<(String, BreakerSnapshot)>> {
        let rows = sqlx::query("SELECT circuit_name, state_data FROM circuit_breaker_states")
            .fetch_all(&self.pool)
            .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("circuit_name");
            let data: serde_json::Value = row.get("state_data");
            match serde_json::from_value(data) {
                Ok(snapshot) => snapshots.push((name, snapshot)),
                Err(e) => warn!(circuit = %name, error = %e, "Skipping unparseable breaker state row"),
            }
        }
        Ok(snapshots)
    }
}
