use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::models::{AttributeModification, RawEntry, ResultPage, ResumeToken, SearchRequest};

pub mod database;
pub mod directory;
pub mod document;

/// Primitive operations against one concrete store
///
/// Every backend variant (relational, document, directory) implements this
/// trait. Implementations keep no per-scan state beyond what they encode in
/// the resume token they hand out.
#[async_trait]
pub trait OperationService: Send + Sync {
    /// Registry name of this backend variant
    fn persistence_type(&self) -> &'static str;

    /// True when the backend issues its own resume tokens; false when the
    /// engine has to emulate paging with absolute offsets
    fn supports_native_paging(&self) -> bool;

    /// Largest page the backend serves in one round-trip, if bounded
    fn max_page_size(&self) -> Option<usize> {
        None
    }

    /// Check if the store is reachable
    async fn health_check(&self) -> AppResult<()>;

    /// Store a new entry; fails with `DuplicateEntry` if the DN is taken
    async fn add(&self, entry: &RawEntry) -> AppResult<()>;

    /// Apply modifications to an existing entry
    async fn update(&self, dn: &str, modifications: &[AttributeModification]) -> AppResult<()>;

    /// Remove a single entry
    async fn delete(&self, dn: &str) -> AppResult<()>;

    /// Remove an entry and everything below it, returning the number removed
    async fn delete_recursively(&self, dn: &str) -> AppResult<usize>;

    /// Fetch one entry by DN, projected to `attributes` (empty = all)
    async fn lookup(&self, dn: &str, attributes: &[String]) -> AppResult<RawEntry>;

    /// Execute one bounded round-trip
    ///
    /// Returns at most `request.page_size` entries and `has_more = false`
    /// once no further matches exist. An empty match set is not an error.
    async fn search(
        &self,
        request: &SearchRequest,
        resume: Option<&ResumeToken>,
    ) -> AppResult<ResultPage>;

    /// Remove every entry below `base` (inclusive) matching `filter`, at most
    /// `count` of them in normalized-DN order (0 = no limit)
    async fn delete_entries(
        &self,
        base: &str,
        filter: &FilterExpression,
        count: usize,
    ) -> AppResult<usize>;

    /// Drop server-side state held for a resume token the caller will not use
    async fn release(&self, _token: &ResumeToken) -> AppResult<()> {
        Ok(())
    }

    /// Release pooled resources
    async fn destroy(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Creates one backend variant from configuration
#[async_trait]
pub trait OperationServiceFactory: Send + Sync {
    fn persistence_type(&self) -> &'static str;

    async fn create(&self, config: &AppConfig) -> AppResult<Arc<dyn OperationService>>;
}

/// Statically populated map from persistence type to factory
pub struct BackendRegistry {
    factories: HashMap<String, Box<dyn OperationServiceFactory>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BackendRegistry {
    /// Registry without any backend
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `sql`, `document` and `directory` backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(database::SqlBackendFactory));
        registry.register(Box::new(document::DocumentBackendFactory));
        registry.register(Box::new(directory::DirectoryBackendFactory));
        registry
    }

    /// Add or replace a factory
    pub fn register(&mut self, factory: Box<dyn OperationServiceFactory>) {
        self.factories
            .insert(factory.persistence_type().to_lowercase(), factory);
    }

    pub fn contains(&self, persistence_type: &str) -> bool {
        self.factories
            .contains_key(&persistence_type.to_lowercase())
    }

    pub fn persistence_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|k| k.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Build the backend named by `config.persistence.persistence_type`
    pub async fn create(&self, config: &AppConfig) -> AppResult<Arc<dyn OperationService>> {
        let requested = config.persistence.persistence_type.to_lowercase();
        let factory = self.factories.get(&requested).ok_or_else(|| {
            AppError::Configuration(format!(
                "Unsupported persistence type: {} (available: {})",
                config.persistence.persistence_type,
                self.persistence_types().join(", ")
            ))
        })?;

        tracing::debug!("Creating '{}' operation service", requested);
        factory.create(config).await
    }
}
