//! Relational backend (`sql`)
//!
//! Entries live in one table: `dn_norm` (primary key), `dn`, `parent_norm`
//! and the attributes as a JSON object of string arrays. Scope and filter are
//! translated to SQL by a per-database [`filter::FilterConverter`]; paging is
//! offset-based and emulated by the engine.
//!
//! ```text
//! entry_ops.rs / filter.rs (shared statement building)
//!     ↓
//! Database-specific implementations
//!     ├── postgres/ (JSONB, jsonb_array_elements_text)
//!     └── sqlite/   (JSON text, json_each)
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{OperationService, OperationServiceFactory};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

pub mod config;
pub mod entry_ops;
pub mod filter;
pub mod postgres;
pub mod sqlite;

#[cfg(test)]
mod integration_test;

pub use config::DatabaseBackendConfig;
pub use postgres::PostgresOperationService;
pub use sqlite::SqliteOperationService;

pub const PERSISTENCE_TYPE: &str = "sql";

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_name(name: &str) -> AppResult<Self> {
        match name.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseType::PostgreSQL),
            "sqlite" => Ok(DatabaseType::SQLite),
            other => Err(AppError::Configuration(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }
}

/// Connect the relational backend for an explicit database configuration
pub async fn connect(config: &DatabaseBackendConfig) -> AppResult<Arc<dyn OperationService>> {
    info!(
        "Connecting {:?} entry store at {}",
        config.database_type,
        config.redacted_url()
    );
    match config.database_type {
        DatabaseType::PostgreSQL => Ok(Arc::new(PostgresOperationService::connect(config).await?)),
        DatabaseType::SQLite => Ok(Arc::new(SqliteOperationService::connect(config).await?)),
    }
}

pub struct SqlBackendFactory;

#[async_trait]
impl OperationServiceFactory for SqlBackendFactory {
    fn persistence_type(&self) -> &'static str {
        PERSISTENCE_TYPE
    }

    async fn create(&self, config: &AppConfig) -> AppResult<Arc<dyn OperationService>> {
        connect(&DatabaseBackendConfig::from_app_config(config)?).await
    }
}
