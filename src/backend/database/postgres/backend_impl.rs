use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;

use super::super::config::DatabaseBackendConfig;
use super::super::entry_ops::{self, StoredEntry};
use super::filter_impl::PostgresFilterConverter;
use crate::backend::OperationService;
use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::models::{AttributeModification, RawEntry, ResultPage, ResumeToken, SearchRequest};
use crate::utils::normalize_dn;

/// Relational backend on PostgreSQL with a JSONB attributes column
pub struct PostgresOperationService {
    pool: PgPool,
    table: String,
    filter_converter: PostgresFilterConverter,
}

fn read_columns(row: &PgRow, fallback: fn(String) -> AppError) -> AppResult<(String, String)> {
    let dn: String = row
        .try_get("dn")
        .map_err(|e| fallback(format!("Failed to read dn: {}", e)))?;
    let attributes: String = row
        .try_get("attributes")
        .map_err(|e| fallback(format!("Failed to read attributes: {}", e)))?;
    Ok((dn, attributes))
}

impl PostgresOperationService {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            filter_converter: PostgresFilterConverter,
        }
    }

    pub async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.connection_url)
            .await
            .map_err(|e| {
                AppError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        super::schema::init_schema(&pool, &config.table).await?;
        debug!("PostgreSQL entries table '{}' ready", config.table);
        Ok(Self::new(pool, config.table.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl OperationService for PostgresOperationService {
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
            "INSERT INTO {} (dn_norm, dn, parent_norm, attributes) VALUES ($1, $2, $3, $4::jsonb)",
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

        let select = format!(
            "SELECT dn, attributes::text AS attributes FROM {} WHERE dn_norm = $1 FOR UPDATE",
            self.table
        );
        let row = sqlx::query(&select)
            .bind(&dn_norm)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))?;
        let (stored_dn, attributes) = read_columns(&row, AppError::Database)?;

        let mut entry = entry_ops::decode_entry(stored_dn, &attributes, &[])?;
        for modification in modifications {
            modification.apply(&mut entry);
        }

        let update = format!(
            "UPDATE {} SET attributes = $1::jsonb, updated_at = NOW() WHERE dn_norm = $2",
            self.table
        );
        sqlx::query(&update)
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
        let sql = format!("DELETE FROM {} WHERE dn_norm = $1", self.table);
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
            "DELETE FROM {} WHERE dn_norm = $1 OR dn_norm LIKE $2 ESCAPE '\\'",
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
        debug!("PostgreSQL delete: {} {:?}", sql, params);

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
        let sql = format!(
            "SELECT dn, attributes::text AS attributes FROM {} WHERE dn_norm = $1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(normalize_dn(dn))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(e, AppError::Database))?
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))?;

        let (stored_dn, stored) = read_columns(&row, AppError::Database)?;
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
            "attributes::text",
            request,
            offset,
        )?;
        debug!("PostgreSQL search: {} {:?}", statement.sql, statement.params);

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
                let (dn, attributes) = read_columns(row, AppError::Search)?;
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
