//! Entity-level façade over one operation service and the paged search engine

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::backend::OperationService;
use crate::batch::{BatchOperation, BatchOutcome, BatchPolicy, EntityBatchOperation};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::mapper::{EntryMapper, OBJECT_CLASS};
use crate::models::{AttributeModification, RawEntry, SearchRequest, SearchScope};
use crate::password::{StoragePasswordEncoder, USER_PASSWORD};
use crate::search::{PagedSearchEngine, ResultContainer, SearchSettings};

pub struct EntryManager<M: EntryMapper> {
    service: Arc<dyn OperationService>,
    engine: PagedSearchEngine,
    mapper: M,
    passwords: StoragePasswordEncoder,
}

impl<M: EntryMapper> EntryManager<M> {
    pub fn new(service: Arc<dyn OperationService>, mapper: M, config: &AppConfig) -> Self {
        Self {
            engine: PagedSearchEngine::new(service.clone(), SearchSettings::from(&config.search)),
            service,
            mapper,
            passwords: StoragePasswordEncoder::new(config.password.algorithm),
        }
    }

    pub fn with_password_encoder(mut self, passwords: StoragePasswordEncoder) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn engine(&self) -> &PagedSearchEngine {
        &self.engine
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Store a new entity; plaintext passwords are hashed first
    pub async fn persist(&self, entity: &M::Entity) -> AppResult<()> {
        let mut entry = self.mapper.encode(entity)?;
        self.mapper.descriptor().canonicalize(&mut entry);
        self.passwords.encode_entry(&mut entry)?;
        self.service.add(&entry).await
    }

    /// Replace every mapped attribute with the entity's current values
    ///
    /// Mapped attributes without values are removed, except `userPassword`,
    /// which is left untouched unless a new value is supplied.
    pub async fn merge(&self, entity: &M::Entity) -> AppResult<()> {
        let mut entry = self.mapper.encode(entity)?;
        self.passwords.encode_entry(&mut entry)?;

        let modifications: Vec<AttributeModification> = self
            .mapper
            .descriptor()
            .attributes
            .iter()
            .filter_map(|mapping| {
                let values = entry
                    .values(mapping.attribute)
                    .map(|v| v.to_vec())
                    .unwrap_or_default();
                if values.is_empty() && mapping.attribute == USER_PASSWORD {
                    None
                } else {
                    Some(AttributeModification::Replace(
                        mapping.attribute.to_string(),
                        values,
                    ))
                }
            })
            .collect();

        debug!("Merging {} attributes into {}", modifications.len(), entry.dn);
        self.service.update(&entry.dn, &modifications).await
    }

    pub async fn remove(&self, dn: &str) -> AppResult<()> {
        self.service.delete(dn).await
    }

    pub async fn remove_recursively(&self, dn: &str) -> AppResult<usize> {
        self.service.delete_recursively(dn).await
    }

    /// Delete up to `count` entities below `base` matching `filter` (0 = all)
    pub async fn remove_entries(
        &self,
        base: &str,
        filter: FilterExpression,
        count: usize,
    ) -> AppResult<usize> {
        let filter = self.mapper.descriptor().restrict(filter);
        let removed = self.service.delete_entries(base, &filter, count).await?;
        debug!("Removed {} entries matching {} below {}", removed, filter, base);
        Ok(removed)
    }

    /// Read and decode one entity
    pub async fn find(&self, dn: &str) -> AppResult<M::Entity> {
        let entry = self
            .service
            .lookup(dn, &self.mapper.attribute_names())
            .await?;
        self.mapper.decode(entry)
    }

    /// Run a typed scan; the filter is restricted to the mapper's object class
    /// and an empty attribute list defaults to the mapped attributes
    pub async fn search(
        &self,
        request: SearchRequest,
        policy: BatchPolicy<'_>,
    ) -> AppResult<ResultContainer<M::Entity>> {
        let request = self.typed_request(request);
        let result = self.engine.search(&request, policy).await?;
        result.map_entries(|entry| self.mapper.decode(entry))
    }

    /// Stream a typed scan, handing each page to `batch` as decoded entities
    ///
    /// Pages are decoded before the callback runs, so `batch` may write back
    /// through this manager while the scan is in progress.
    pub async fn search_batched(
        &self,
        request: SearchRequest,
        batch: &mut dyn EntityBatchOperation<M::Entity>,
    ) -> AppResult<ResultContainer<M::Entity>> {
        let request = self.typed_request(request);
        let mut decoding = DecodingBatch {
            mapper: &self.mapper,
            inner: batch,
        };
        let result = self
            .engine
            .search(&request, BatchPolicy::Stream(&mut decoding))
            .await?;
        result.map_entries(|entry| self.mapper.decode(entry))
    }

    fn typed_request(&self, mut request: SearchRequest) -> SearchRequest {
        request.filter = self.mapper.descriptor().restrict(request.filter);
        if request.attributes.is_empty() {
            request.attributes = self.mapper.attribute_names();
        }
        request
    }

    /// Materialize up to `limit` matching entities (0 = all)
    pub async fn find_entries(
        &self,
        base: &str,
        filter: FilterExpression,
        limit: usize,
    ) -> AppResult<Vec<M::Entity>> {
        let request = self.engine.request(base, filter).limit(limit);
        Ok(self
            .search(request, BatchPolicy::Collect)
            .await?
            .into_entries())
    }

    pub async fn count_entries(&self, base: &str, filter: FilterExpression) -> AppResult<usize> {
        let filter = self.mapper.descriptor().restrict(filter);
        self.engine
            .count_entries(base, &filter, SearchScope::Subtree)
            .await
    }

    /// True when `dn` exists and carries the mapper's object class
    pub async fn contains(&self, dn: &str) -> AppResult<bool> {
        match self
            .service
            .lookup(dn, &[OBJECT_CLASS.to_string()])
            .await
        {
            Ok(entry) => Ok(self.mapper.descriptor().describes(&entry)),
            Err(AppError::EntryNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check `password` against the entry's stored `userPassword` values
    pub async fn authenticate(&self, dn: &str, password: &str) -> AppResult<bool> {
        let entry = match self.service.lookup(dn, &[USER_PASSWORD.to_string()]).await {
            Ok(entry) => entry,
            Err(AppError::EntryNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        for stored in entry.values(USER_PASSWORD).unwrap_or(&[]) {
            if self.passwords.verify(password, stored)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

struct DecodingBatch<'a, M: EntryMapper> {
    mapper: &'a M,
    inner: &'a mut dyn EntityBatchOperation<M::Entity>,
}

#[async_trait]
impl<'a, M: EntryMapper> BatchOperation for DecodingBatch<'a, M> {
    async fn perform_action(&mut self, entries: &[RawEntry]) -> AppResult<BatchOutcome> {
        let entities = entries
            .iter()
            .cloned()
            .map(|entry| self.mapper.decode(entry))
            .collect::<AppResult<Vec<_>>>()?;
        self.inner.perform_action(entities).await
    }
}
