use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::PersistenceAdapter;
use crate::error::PersistenceError;
use crate::snapshot::SerializedSnapshot;

/// Snapshot stored as a single row of a SQLite table.
///
/// Several runtimes may share one database as long as each uses its own key.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
    key: String,
}

impl SqlitePersistence {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite:///var/lib/app/outbox.db`.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid SQLite url {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite database at {url}"))?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool; creates the snapshot table if missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_snapshot (
                key       TEXT PRIMARY KEY,
                body      BLOB NOT NULL,
                saved_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create outbox_snapshot table")?;

        Ok(Self {
            pool,
            key: "default".to_string(),
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
    async fn load(&self) -> Result<Option<SerializedSnapshot>, PersistenceError> {
        let row = sqlx::query("SELECT body FROM outbox_snapshot WHERE key = ?1")
            .bind(&self.key)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load snapshot")?;

        match row {
            Some(row) => {
                let body: Vec<u8> = row.try_get("body").context("failed to decode snapshot row")?;
                Ok(Some(SerializedSnapshot::new(body)))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &SerializedSnapshot) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_snapshot (key, body, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET body = excluded.body, saved_at = excluded.saved_at
            "#,
        )
        .bind(&self.key)
        .bind(snapshot.as_bytes())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to save snapshot")?;
        Ok(())
    }
}
