//! In-process document store with native cursor paging
//!
//! Documents are keyed by normalized DN. Each round-trip re-evaluates the
//! query and hands out an opaque cursor that records the next position and a
//! digest of the query it belongs to.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{OperationService, OperationServiceFactory};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::filter::{matcher, FilterExpression};
use crate::models::{AttributeModification, RawEntry, ResultPage, ResumeToken, SearchRequest};
use crate::utils::{is_descendant_or_self, normalize_dn, validate_dn};

pub const PERSISTENCE_TYPE: &str = "document";

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    #[serde(rename = "p")]
    position: usize,
    #[serde(rename = "q")]
    query: String,
}

fn query_digest(request: &SearchRequest) -> String {
    let digest = Sha1::digest(request.fingerprint().as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

fn encode_cursor(position: usize, request: &SearchRequest) -> AppResult<ResumeToken> {
    let record = CursorRecord {
        position,
        query: query_digest(request),
    };
    let json = serde_json::to_vec(&record)?;
    Ok(ResumeToken::Cursor(general_purpose::URL_SAFE_NO_PAD.encode(json)))
}

fn decode_cursor(cursor: &str, request: &SearchRequest) -> AppResult<usize> {
    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| AppError::Search(format!("Malformed cursor: {}", e)))?;
    let record: CursorRecord = serde_json::from_slice(&raw)
        .map_err(|e| AppError::Search(format!("Malformed cursor: {}", e)))?;
    if record.query != query_digest(request) {
        return Err(AppError::Search(
            "Cursor was issued for a different query".to_string(),
        ));
    }
    Ok(record.position)
}

pub struct DocumentOperationService {
    documents: RwLock<BTreeMap<String, RawEntry>>,
    max_page_size: Option<usize>,
}

impl Default for DocumentOperationService {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DocumentOperationService {
    pub fn new(max_page_size: Option<usize>) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            max_page_size,
        }
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl OperationService for DocumentOperationService {
    fn persistence_type(&self) -> &'static str {
        PERSISTENCE_TYPE
    }

    fn supports_native_paging(&self) -> bool {
        true
    }

    fn max_page_size(&self) -> Option<usize> {
        self.max_page_size
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }

    async fn add(&self, entry: &RawEntry) -> AppResult<()> {
        validate_dn(&entry.dn)?;
        let key = entry.normalized_dn();
        let mut documents = self.documents.write().await;
        if documents.contains_key(&key) {
            return Err(AppError::DuplicateEntry(entry.dn.clone()));
        }
        documents.insert(key, entry.clone());
        Ok(())
    }

    async fn update(&self, dn: &str, modifications: &[AttributeModification]) -> AppResult<()> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&normalize_dn(dn))
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))?;
        for modification in modifications {
            modification.apply(document);
        }
        Ok(())
    }

    async fn delete(&self, dn: &str) -> AppResult<()> {
        self.documents
            .write()
            .await
            .remove(&normalize_dn(dn))
            .map(|_| ())
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))
    }

    async fn delete_recursively(&self, dn: &str) -> AppResult<usize> {
        let base = normalize_dn(dn);
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|key, _| !is_descendant_or_self(key, &base));
        let removed = before - documents.len();
        if removed == 0 {
            return Err(AppError::EntryNotFound(dn.to_string()));
        }
        debug!("Removed {} documents under {}", removed, dn);
        Ok(removed)
    }

    async fn delete_entries(
        &self,
        base: &str,
        filter: &FilterExpression,
        count: usize,
    ) -> AppResult<usize> {
        filter.validate()?;
        let request = SearchRequest::new(base, filter.clone());
        let mut documents = self.documents.write().await;
        let mut doomed: Vec<String> = matcher::select(documents.iter(), &request)
            .into_iter()
            .map(|entry| entry.normalized_dn())
            .collect();
        if count > 0 {
            doomed.truncate(count);
        }
        for key in &doomed {
            documents.remove(key);
        }
        debug!("Deleted {} documents below {}", doomed.len(), base);
        Ok(doomed.len())
    }

    async fn lookup(&self, dn: &str, attributes: &[String]) -> AppResult<RawEntry> {
        self.documents
            .read()
            .await
            .get(&normalize_dn(dn))
            .map(|document| document.project(attributes))
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))
    }

    async fn search(
        &self,
        request: &SearchRequest,
        resume: Option<&ResumeToken>,
    ) -> AppResult<ResultPage> {
        let position = match resume {
            None => usize::try_from(request.start_index).unwrap_or(usize::MAX),
            Some(ResumeToken::Cursor(cursor)) => decode_cursor(cursor, request)?,
            Some(other) => {
                return Err(AppError::Search(format!(
                    "Document store cannot resume from {}",
                    other
                )))
            }
        };

        let documents = self.documents.read().await;
        let matched = matcher::select(documents.iter(), request);
        let start = position.min(matched.len());
        let end = start.saturating_add(request.page_size).min(matched.len());

        let entries = matched[start..end]
            .iter()
            .map(|document| document.project(&request.attributes))
            .collect();

        if end < matched.len() {
            Ok(ResultPage::more(entries, Some(encode_cursor(end, request)?)))
        } else {
            Ok(ResultPage::last(entries))
        }
    }

    async fn destroy(&self) -> AppResult<()> {
        self.documents.write().await.clear();
        Ok(())
    }
}

/// Options: `max_page_size`
pub struct DocumentBackendFactory;

#[async_trait]
impl OperationServiceFactory for DocumentBackendFactory {
    fn persistence_type(&self) -> &'static str {
        PERSISTENCE_TYPE
    }

    async fn create(&self, config: &AppConfig) -> AppResult<Arc<dyn OperationService>> {
        let max_page_size = config.persistence.option_usize("max_page_size")?;
        Ok(Arc::new(DocumentOperationService::new(max_page_size)))
    }
}
