use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::super::config::DatabaseBackendConfig;
use super::super::entry_ops::{self, StoredEntry};
use super::filter_impl::SqliteFilterConverter;
use crate::backend::OperationService;
use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::models::{AttributeModification, RawEntry, ResultPage, ResumeToken, SearchRequest};
use crate::utils::normalize_dn;

/// Relational backend on SQLite
///
/// Attributes live in a JSON text column. Paging is emulated by the engine
/// with absolute offsets.
pub struct SqliteOperationService {
    pool: SqlitePool,
    table: String,
    filter_converter: SqliteFilterConverter,
}

impl SqliteOperationService {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            filter_converter: SqliteFilterConverter,
        }
    }

    /// Open the pool and make sure the table exists
    pub async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self> {
        config.validate()?;

        let options = SqliteConnectOptions::from_str(&config.connection_path())
            .map_err(|e| AppError::Configuration(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout));
        if config.is_memory_database() {
            // the database lives only as long as its connection
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to SQLite: {}", e)))?;

        super::schema::init_schema(&pool, &config.table).await?;
        debug!("SQLite entries table '{}' ready", config.table);
        Ok(Self::new(pool, config.table.clone()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn fetch_attributes(
        &self,
        executor: &mut sqlx::SqliteConnection,
        dn_norm: &str,
    ) -> AppResult<Option<(String, String)>> {
        let sql = format!(
            "SELECT dn, attributes FROM {} WHERE dn_norm = ?1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(dn_norm)
            .fetch_optional(executor)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;

        row.map(|row| {
            let dn: String = row
                .try_get("dn")
                .map_err(|e| AppError::Database(format!("Failed to read dn: {}", e)))?;
            let attributes: String = row
                .try_get("attributes")
                .map_err(|e| AppError::Database(format!("Failed to read attributes: {}", e)))?;
            Ok((dn, attributes))
        })
        .transpose()
    }
}

#[async_trait]
impl OperationService for SqliteOperationService {
    fn persistence_type(&self) -> &'static str {
        super::super::PERSISTENCE_TYPE
    }

    fn supports_native_paging(&self) -> bool {
        false
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;
        Ok(())
    }

    async fn add(&self, entry: &RawEntry) -> AppResult<()> {
        let stored = StoredEntry::prepare(entry)?;
        let sql = format!(
            "INSERT INTO {} (dn_norm, dn, parent_norm, attributes) VALUES (?1, ?2, ?3, ?4)",
            self.table
        );

        sqlx::query(&sql)
            .bind(&stored.dn_norm)
            .bind(&stored.dn)
            .bind(&stored.parent_norm)
            .bind(&stored.attributes)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::DuplicateEntry(entry.dn.clone())
                }
                other => AppError::from_sqlx(other, AppError::Database),
            })?;
        Ok(())
    }

    async fn update(&self, dn: &str, modifications: &[AttributeModification]) -> AppResult<()> {
        let dn_norm = normalize_dn(dn);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;

        let (stored_dn, attributes) = self
            .fetch_attributes(&mut *tx, &dn_norm)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))?;

        let mut entry = entry_ops::decode_entry(stored_dn, &attributes, &[])?;
        for modification in modifications {
            modification.apply(&mut entry);
        }

        let sql = format!(
            "UPDATE {} SET attributes = ?1, updated_at = CURRENT_TIMESTAMP WHERE dn_norm = ?2",
            self.table
        );
        sqlx::query(&sql)
            .bind(entry_ops::encode_attributes(&entry.attributes)?)
            .bind(&dn_norm)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;

        tx.commit()
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;
        Ok(())
    }

    async fn delete(&self, dn: &str) -> AppResult<()> {
        let sql = format!("DELETE FROM {} WHERE dn_norm = ?1", self.table);
        let result = sqlx::query(&sql)
            .bind(normalize_dn(dn))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;

        if result.rows_affected() == 0 {
            return Err(AppError::EntryNotFound(dn.to_string()));
        }
        Ok(())
    }

    async fn delete_recursively(&self, dn: &str) -> AppResult<usize> {
        let (dn_norm, pattern) = entry_ops::subtree_params(dn);
        let sql = format!(
            "DELETE FROM {} WHERE dn_norm = ?1 OR dn_norm LIKE ?2 ESCAPE '\\'",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(dn_norm)
            .bind(pattern)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;

        match result.rows_affected() {
            0 => Err(AppError::EntryNotFound(dn.to_string())),
            removed => Ok(removed as usize),
        }
    }

    async fn delete_entries(
        &self,
        base: &str,
        filter: &FilterExpression,
        count: usize,
    ) -> AppResult<usize> {
        let (sql, params) =
            entry_ops::build_delete(&self.filter_converter, &self.table, base, filter, count)?;
        debug!("SQLite delete: {} {:?}", sql, params);

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;
        Ok(result.rows_affected() as usize)
    }

    async fn lookup(&self, dn: &str, attributes: &[String]) -> AppResult<RawEntry> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?;
        let (stored_dn, stored) = self
            .fetch_attributes(&mut *conn, &normalize_dn(dn))
            .await?
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))?;
        entry_ops::decode_entry(stored_dn, &stored, attributes)
    }

    async fn search(
        &self,
        request: &SearchRequest,
        resume: Option<&ResumeToken>,
    ) -> AppResult<ResultPage> {
        let offset = entry_ops::resume_offset(request, resume)?;
        let statement = entry_ops::build_search(
            &self.filter_converter,
            &self.table,
            "attributes",
            request,
            offset,
        )?;
        debug!("SQLite search: {} {:?}", statement.sql, statement.params);

        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = query.bind(param);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Search))?;

        let entries = rows
            .iter()
            .map(|row| {
                let dn: String = row
                    .try_get("dn")
                    .map_err(|e| AppError::Search(format!("Failed to read dn: {}", e)))?;
                let attributes: String = row
                    .try_get("attributes")
                    .map_err(|e| AppError::Search(format!("Failed to read attributes: {}", e)))?;
                entry_ops::decode_entry(dn, &attributes, &request.attributes)
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(entry_ops::into_page(entries, request.page_size))
    }

    async fn destroy(&self) -> AppResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
