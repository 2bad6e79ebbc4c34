//! PostgreSQL materialization store for production use.
//!
//! ## Configuration
//!
//! [`PostgresConfig::from_env`] reads:
//! - `MATERIALIZATION_DATABASE_URL`: connection string (required)
//! - `MATERIALIZATION_DB_MAX_CONNECTIONS`: pool size (default: 8)
//! - `MATERIALIZATION_DB_ACQUIRE_TIMEOUT_SECS`: wait for a free connection (default: 5)
//!
//! ## Schema
//!
//! One row per `(unit, materialization)`. `rule_to_variant` is a jsonb object
//! merged with `||` on upsert, so concurrent writers for different rules do
//! not overwrite each other.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use crate::types::MaterializationInfo;
use super::{MaterializationStore, StoreError};

/// DDL for the materialization table.
pub const MATERIALIZATION_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS materialized_assignments (
    unit             TEXT        NOT NULL,
    materialization  TEXT        NOT NULL,
    unit_in_info     BOOLEAN     NOT NULL DEFAULT FALSE,
    rule_to_variant  JSONB       NOT NULL DEFAULT '{}'::jsonb,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (unit, materialization)
)
"#;

/// Connection settings for the materialization database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// How long a write waits for a connection.
    pub acquire_timeout: Duration,
}

impl PostgresConfig {
    /// Read the `MATERIALIZATION_*` environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let database_url = lookup("MATERIALIZATION_DATABASE_URL")
            .ok_or_else(|| StoreError::Backend("MATERIALIZATION_DATABASE_URL is not set".to_string()))?;
        Ok(Self {
            database_url,
            max_connections: number(&lookup, "MATERIALIZATION_DB_MAX_CONNECTIONS", 8)?,
            acquire_timeout: Duration::from_secs(number(&lookup, "MATERIALIZATION_DB_ACQUIRE_TIMEOUT_SECS", 5)?),
        })
    }
}

fn number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, StoreError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| StoreError::Backend(format!("{key} is not a valid number: {raw}"))),
    }
}

/// PostgreSQL materialization store.
pub struct PostgresMaterializationStore {
    pool: PgPool,
}

impl PostgresMaterializationStore {
    /// Connect a pool for `config`.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            acquire_timeout_secs = config.acquire_timeout.as_secs(),
            "Connecting materialization store"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect using [`PostgresConfig::from_env`].
    pub async fn from_env() -> Result<Self, StoreError> {
        let config = PostgresConfig::from_env()?;
        Self::new(config).await.map_err(StoreError::backend)
    }

    /// Create the materialization table if it does not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(MATERIALIZATION_TABLE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MaterializationStore for PostgresMaterializationStore {
    async fn load_materialized_assignments_for_unit(
        &self,
        unit: &str,
        rule_materializations: &HashMap<String, String>,
    ) -> Result<HashMap<String, MaterializationInfo>, StoreError> {
        let mut materializations: Vec<String> = rule_materializations.values().cloned().collect();
        materializations.sort_unstable();
        materializations.dedup();

        let rows = sqlx::query(
            r#"
            SELECT materialization, unit_in_info, rule_to_variant::text AS rule_to_variant
            FROM materialized_assignments
            WHERE unit = $1 AND materialization = ANY($2)
            ORDER BY materialization
            "#,
        )
        .bind(unit)
        .bind(&materializations)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.iter()
            .map(|row| {
                let materialization: String = row.try_get("materialization").map_err(StoreError::backend)?;
                let unit_in_info: bool = row.try_get("unit_in_info").map_err(StoreError::backend)?;
                let raw: String = row.try_get("rule_to_variant").map_err(StoreError::backend)?;
                let rule_to_variant: BTreeMap<String, String> =
                    serde_json::from_str(&raw).map_err(StoreError::backend)?;
                Ok((
                    materialization,
                    MaterializationInfo {
                        is_unit_in_materialization: unit_in_info,
                        rule_to_variant,
                    },
                ))
            })
            .collect()
    }

    async fn store_assignment(
        &self,
        unit: &str,
        assignments: HashMap<String, MaterializationInfo>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for (materialization, info) in &assignments {
            let rule_to_variant = serde_json::to_string(&info.rule_to_variant).map_err(StoreError::backend)?;
            sqlx::query(
                r#"
                INSERT INTO materialized_assignments (unit, materialization, unit_in_info, rule_to_variant)
                VALUES ($1, $2, $3, $4::jsonb)
                ON CONFLICT (unit, materialization) DO UPDATE SET
                    unit_in_info = materialized_assignments.unit_in_info OR EXCLUDED.unit_in_info,
                    rule_to_variant = materialized_assignments.rule_to_variant || EXCLUDED.rule_to_variant,
                    updated_at = now()
                "#,
            )
            .bind(unit)
            .bind(materialization)
            .bind(info.is_unit_in_materialization)
            .bind(rule_to_variant)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;
        tracing::debug!(unit = %unit, materializations = assignments.len(), "Stored sticky assignments");
        Ok(())
    }
}
