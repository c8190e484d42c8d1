//! SQLite-backed [`FingerprintIndex`].
//!
//! The index lives in its own database file (by default beside the hot
//! partitions). WAL mode plus a busy timeout lets several `marc ingest`
//! processes share it; the `context_hash` primary key serializes claims.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{FingerprintEntry, DATE_FORMAT};

use super::FingerprintIndex;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (creating if needed) the index at `path` and ensure its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open fingerprint index {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl FingerprintIndex for SqliteIndex {
    async fn claim(&self, entry: &FingerprintEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fingerprints (context_hash, msg_id, partition_date, claimed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&entry.context_hash)
        .bind(&entry.msg_id)
        .bind(entry.partition.format(DATE_FORMAT).to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, context_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM fingerprints WHERE context_hash = ?")
            .bind(context_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rebuild(&self, entries: &[FingerprintEntry]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fingerprints")
            .execute(&mut *tx)
            .await?;

        let mut kept = 0usize;
        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO fingerprints (context_hash, msg_id, partition_date, claimed_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&entry.context_hash)
            .bind(&entry.msg_id)
            .bind(entry.partition.format(DATE_FORMAT).to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            kept += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(kept)
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
