//! In-process hierarchical directory with simple-paged-results cookies
//!
//! Entries form a tree: an entry can only be added below an existing parent
//! and only leaves can be deleted one at a time. Paged searches keep their
//! position server-side in a cookie table; the client only sees random cookie
//! bytes. Cookies expire after a TTL, the oldest are evicted once the table is
//! full, and a cookie replayed against a different query is refused.

use async_trait::async_trait;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{OperationService, OperationServiceFactory};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::filter::{matcher, FilterExpression};
use crate::models::{AttributeModification, RawEntry, ResultPage, ResumeToken, SearchRequest};
use crate::utils::{is_descendant_or_self, normalize_dn, parent_dn, validate_dn};

pub const PERSISTENCE_TYPE: &str = "directory";

const COOKIE_LEN: usize = 16;
const DEFAULT_COOKIE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_MAX_COOKIES: usize = 1024;

#[derive(Debug, Clone)]
pub struct DirectorySettings {
    /// Server-side size limit per page
    pub size_limit: Option<usize>,
    pub cookie_ttl: Duration,
    pub max_cookies: usize,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            size_limit: None,
            cookie_ttl: DEFAULT_COOKIE_TTL,
            max_cookies: DEFAULT_MAX_COOKIES,
        }
    }
}

struct PagedCursor {
    fingerprint: String,
    position: usize,
    issued: Instant,
}

#[derive(Default)]
struct CookieTable {
    cursors: HashMap<Vec<u8>, PagedCursor>,
    order: VecDeque<Vec<u8>>,
}

impl CookieTable {
    fn take(&mut self, cookie: &[u8]) -> Option<PagedCursor> {
        let cursor = self.cursors.remove(cookie)?;
        self.order.retain(|c| c.as_slice() != cookie);
        Some(cursor)
    }

    fn issue(&mut self, cursor: PagedCursor, max_cookies: usize) -> Vec<u8> {
        while self.cursors.len() >= max_cookies.max(1) {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.cursors.remove(&oldest);
                    debug!("Evicted paged-results cookie; table full");
                }
                None => break,
            }
        }

        let mut cookie = vec![0u8; COOKIE_LEN];
        rand::thread_rng().fill_bytes(&mut cookie);
        self.order.push_back(cookie.clone());
        self.cursors.insert(cookie.clone(), cursor);
        cookie
    }

    fn clear(&mut self) -> usize {
        let dropped = self.cursors.len();
        self.cursors.clear();
        self.order.clear();
        dropped
    }
}

pub struct DirectoryOperationService {
    entries: RwLock<BTreeMap<String, RawEntry>>,
    cookies: Mutex<CookieTable>,
    settings: DirectorySettings,
}

impl Default for DirectoryOperationService {
    fn default() -> Self {
        Self::new(DirectorySettings::default())
    }
}

impl DirectoryOperationService {
    pub fn new(settings: DirectorySettings) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            cookies: Mutex::new(CookieTable::default()),
            settings,
        }
    }

    pub fn settings(&self) -> &DirectorySettings {
        &self.settings
    }

    /// Drop every outstanding paged-results cookie
    ///
    /// Scans in progress fail with `PagingExpired` on their next round-trip.
    pub fn invalidate_cookies(&self) -> AppResult<usize> {
        let dropped = self.cookie_table()?.clear();
        info!("Invalidated {} paged-results cookies", dropped);
        Ok(dropped)
    }

    /// Number of cookies currently held server-side
    pub fn outstanding_cookies(&self) -> AppResult<usize> {
        Ok(self.cookie_table()?.cursors.len())
    }

    fn cookie_table(&self) -> AppResult<std::sync::MutexGuard<'_, CookieTable>> {
        self.cookies
            .lock()
            .map_err(|e| AppError::Internal(format!("Cookie table poisoned: {}", e)))
    }

    fn resume_position(&self, cookie: &[u8], request: &SearchRequest) -> AppResult<usize> {
        let cursor = self
            .cookie_table()?
            .take(cookie)
            .ok_or_else(|| AppError::PagingExpired("Unknown or evicted cookie".to_string()))?;

        if cursor.issued.elapsed() > self.settings.cookie_ttl {
            return Err(AppError::PagingExpired(format!(
                "Cookie expired after {}s",
                self.settings.cookie_ttl.as_secs()
            )));
        }
        if cursor.fingerprint != request.fingerprint() {
            return Err(AppError::PagingExpired(
                "Cookie does not belong to this search".to_string(),
            ));
        }
        Ok(cursor.position)
    }

    fn check_tree(entries: &BTreeMap<String, RawEntry>, dn: &str, dn_norm: &str) -> AppResult<()> {
        let parent = parent_dn(dn_norm);
        if !parent.is_empty() && !entries.contains_key(&parent) {
            return Err(AppError::EntryNotFound(format!(
                "Parent entry of {} does not exist",
                dn
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OperationService for DirectoryOperationService {
    fn persistence_type(&self) -> &'static str {
        PERSISTENCE_TYPE
    }

    fn supports_native_paging(&self) -> bool {
        true
    }

    fn max_page_size(&self) -> Option<usize> {
        self.settings.size_limit
    }

    async fn health_check(&self) -> AppResult<()> {
        self.cookie_table().map(|_| ())
    }

    async fn add(&self, entry: &RawEntry) -> AppResult<()> {
        validate_dn(&entry.dn)?;
        let dn_norm = entry.normalized_dn();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&dn_norm) {
            return Err(AppError::DuplicateEntry(entry.dn.clone()));
        }
        Self::check_tree(&entries, &entry.dn, &dn_norm)?;
        entries.insert(dn_norm, entry.clone());
        Ok(())
    }

    async fn update(&self, dn: &str, modifications: &[AttributeModification]) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&normalize_dn(dn))
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))?;
        for modification in modifications {
            modification.apply(entry);
        }
        Ok(())
    }

    async fn delete(&self, dn: &str) -> AppResult<()> {
        let dn_norm = normalize_dn(dn);
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&dn_norm) {
            return Err(AppError::EntryNotFound(dn.to_string()));
        }
        if entries.keys().any(|key| parent_dn(key) == dn_norm) {
            return Err(AppError::Search(format!(
                "Operation not allowed on non-leaf entry {}",
                dn
            )));
        }
        entries.remove(&dn_norm);
        Ok(())
    }

    async fn delete_recursively(&self, dn: &str) -> AppResult<usize> {
        let base = normalize_dn(dn);
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&base) {
            return Err(AppError::EntryNotFound(dn.to_string()));
        }
        let before = entries.len();
        entries.retain(|key, _| !is_descendant_or_self(key, &base));
        Ok(before - entries.len())
    }

    async fn delete_entries(
        &self,
        base: &str,
        filter: &FilterExpression,
        count: usize,
    ) -> AppResult<usize> {
        filter.validate()?;
        let request = SearchRequest::new(base, filter.clone());
        let mut entries = self.entries.write().await;

        let mut selected: Vec<String> = matcher::select(entries.iter(), &request)
            .into_iter()
            .map(|entry| entry.normalized_dn())
            .collect();
        if count > 0 {
            selected.truncate(count);
        }
        let doomed: HashSet<String> = selected.into_iter().collect();

        // all or nothing: a surviving child blocks the whole batch
        let blocked = doomed
            .iter()
            .find(|dn| {
                entries
                    .keys()
                    .any(|key| parent_dn(key) == **dn && !doomed.contains(key))
            })
            .cloned();
        if let Some(dn) = blocked {
            return Err(AppError::Search(format!(
                "Operation not allowed on non-leaf entry {}",
                dn
            )));
        }

        for dn in &doomed {
            entries.remove(dn);
        }
        debug!("Deleted {} entries below {}", doomed.len(), base);
        Ok(doomed.len())
    }

    async fn lookup(&self, dn: &str, attributes: &[String]) -> AppResult<RawEntry> {
        self.entries
            .read()
            .await
            .get(&normalize_dn(dn))
            .map(|entry| entry.project(attributes))
            .ok_or_else(|| AppError::EntryNotFound(dn.to_string()))
    }

    async fn search(
        &self,
        request: &SearchRequest,
        resume: Option<&ResumeToken>,
    ) -> AppResult<ResultPage> {
        let position = match resume {
            None => usize::try_from(request.start_index).unwrap_or(usize::MAX),
            Some(ResumeToken::Cookie(cookie)) => self.resume_position(cookie, request)?,
            Some(other) => {
                return Err(AppError::Search(format!(
                    "Directory cannot resume from {}",
                    other
                )))
            }
        };

        let page_size = match self.settings.size_limit {
            Some(limit) => request.page_size.min(limit),
            None => request.page_size,
        };

        let entries = self.entries.read().await;
        let matched = matcher::select(entries.iter(), request);
        let start = position.min(matched.len());
        let end = start.saturating_add(page_size).min(matched.len());
        let page: Vec<RawEntry> = matched[start..end]
            .iter()
            .map(|entry| entry.project(&request.attributes))
            .collect();

        if end >= matched.len() {
            return Ok(ResultPage::last(page));
        }

        let cookie = self.cookie_table()?.issue(
            PagedCursor {
                fingerprint: request.fingerprint(),
                position: end,
                issued: Instant::now(),
            },
            self.settings.max_cookies,
        );
        Ok(ResultPage::more(page, Some(ResumeToken::Cookie(cookie))))
    }

    async fn release(&self, token: &ResumeToken) -> AppResult<()> {
        if let ResumeToken::Cookie(cookie) = token {
            self.cookie_table()?.take(cookie);
        }
        Ok(())
    }

    async fn destroy(&self) -> AppResult<()> {
        self.invalidate_cookies()?;
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Options: `size_limit`, `cookie_ttl_seconds`, `max_cookies`
pub struct DirectoryBackendFactory;

#[async_trait]
impl OperationServiceFactory for DirectoryBackendFactory {
    fn persistence_type(&self) -> &'static str {
        PERSISTENCE_TYPE
    }

    async fn create(&self, config: &AppConfig) -> AppResult<Arc<dyn OperationService>> {
        let options = &config.persistence;
        let mut settings = DirectorySettings {
            size_limit: options.option_usize("size_limit")?,
            ..DirectorySettings::default()
        };
        if let Some(ttl) = options.option_usize("cookie_ttl_seconds")? {
            settings.cookie_ttl = Duration::from_secs(ttl as u64);
        }
        if let Some(max) = options.option_usize("max_cookies")? {
            if max == 0 {
                return Err(AppError::Configuration(
                    "Option 'max_cookies' must be greater than 0".to_string(),
                ));
            }
            settings.max_cookies = max;
        }
        Ok(Arc::new(DirectoryOperationService::new(settings)))
    }
}
