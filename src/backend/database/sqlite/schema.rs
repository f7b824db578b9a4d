use crate::error::{AppError, AppResult};
use sqlx::SqlitePool;

/// Create the entries table and its indexes
pub async fn init_schema(pool: &SqlitePool, table: &str) -> AppResult<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            dn_norm TEXT PRIMARY KEY,
            dn TEXT NOT NULL,
            parent_norm TEXT NOT NULL,
            attributes TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        table
    );

    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create {} table: {}", table, e)))?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{t}_parent ON {t} (parent_norm)",
        t = table
    );
    sqlx::query(&index)
        .execute(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create index: {}", e)))?;

    Ok(())
}

pub async fn drop_schema(pool: &SqlitePool, table: &str) -> AppResult<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
        .execute(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to drop {} table: {}", table, e)))?;
    Ok(())
}
