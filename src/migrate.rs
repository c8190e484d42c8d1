use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per seen content fingerprint. The primary key is what makes
    // `INSERT OR IGNORE` an atomic check-and-claim.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprints (
            context_hash TEXT PRIMARY KEY,
            msg_id TEXT NOT NULL,
            partition_date TEXT NOT NULL,
            claimed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_partition ON fingerprints(partition_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
