use crate::error::{AppError, AppResult};
use sqlx::PgPool;

/// Create the entries table and its indexes
///
/// `dn_norm` uses the "C" collation so the default ordering matches byte order.
pub async fn init_schema(pool: &PgPool, table: &str) -> AppResult<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            dn_norm TEXT COLLATE "C" PRIMARY KEY,
            dn TEXT NOT NULL,
            parent_norm TEXT COLLATE "C" NOT NULL,
            attributes JSONB NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
        )
        "#,
        table
    );

    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create {} table: {}", table, e)))?;

    let indexes = [
        format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{t}_parent\" ON {t} (parent_norm)",
            t = table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{t}_attributes_gin\" ON {t} USING GIN (attributes)",
            t = table
        ),
    ];
    for sql in &indexes {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create index: {}", e)))?;
    }

    Ok(())
}

pub async fn drop_schema(pool: &PgPool, table: &str) -> AppResult<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
        .execute(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to drop table {}: {}", table, e)))?;
    Ok(())
}
