//! Paged search engine
//!
//! Drives repeated `OperationService::search` round-trips for one logical
//! query, feeds each page to a batch operation and optionally materializes the
//! entries. One round-trip is in flight at a time: each resume token comes
//! from the previous response.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::OperationService;
use crate::batch::{BatchOperation, BatchPolicy, CollectingBatch, CountingBatch};
use crate::config::{AppConfig, SearchConfig};
use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::logging::ScanSummary;
use crate::models::{RawEntry, ResultPage, ResumeToken, SearchRequest, SearchScope};

pub mod result;

pub use result::ResultContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    Aborted,
    Failed,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Completed => "completed",
            ScanState::Aborted => "aborted",
            ScanState::Failed => "failed",
        }
    }
}

/// Engine tuning taken from the `search` configuration section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub default_page_size: usize,
    pub max_empty_pages: usize,
    pub max_page_size: Option<usize>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for SearchSettings {
    fn from(config: &SearchConfig) -> Self {
        Self {
            default_page_size: config.default_page_size,
            max_empty_pages: config.max_empty_pages.max(1),
            max_page_size: config.max_page_size,
        }
    }
}

/// Mutable bookkeeping of one scan
struct Scan {
    id: String,
    state: ScanState,
    round_trips: usize,
    processed: usize,
    fetched: u64,
    empty_streak: usize,
    count_is_exact: bool,
    resume_token: Option<ResumeToken>,
}

impl Scan {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: ScanState::Idle,
            round_trips: 0,
            processed: 0,
            fetched: 0,
            empty_streak: 0,
            count_is_exact: false,
            resume_token: None,
        }
    }

    fn transition(&mut self, next: ScanState) {
        debug!(
            "scan {}: {} -> {}",
            self.id,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }
}

pub struct PagedSearchEngine {
    service: Arc<dyn OperationService>,
    settings: SearchSettings,
}

impl PagedSearchEngine {
    pub fn new(service: Arc<dyn OperationService>, settings: SearchSettings) -> Self {
        Self { service, settings }
    }

    pub fn from_config(service: Arc<dyn OperationService>, config: &AppConfig) -> Self {
        Self::new(service, SearchSettings::from(&config.search))
    }

    pub fn service(&self) -> &Arc<dyn OperationService> {
        &self.service
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Request preset with the configured default page size
    pub fn request(&self, base: impl Into<String>, filter: FilterExpression) -> SearchRequest {
        SearchRequest::new(base, filter).page_size(self.settings.default_page_size)
    }

    /// Clamp a requested page size to what the backend and settings allow
    pub fn effective_page_size(&self, requested: usize) -> usize {
        let mut size = requested;
        if let Some(max) = self.service.max_page_size() {
            if size > max {
                warn!(
                    "Requested page size {} exceeds the {} backend limit of {}; clamping",
                    size,
                    self.service.persistence_type(),
                    max
                );
                size = max;
            }
        }
        if let Some(max) = self.settings.max_page_size {
            if size > max {
                warn!(
                    "Requested page size {} exceeds the configured limit of {}; clamping",
                    size, max
                );
                size = max;
            }
        }
        size
    }

    /// Give up on a scan's resume token so the backend can free its state
    pub async fn release(&self, token: &ResumeToken) -> AppResult<()> {
        self.service.release(token).await
    }

    /// Positional form of [`PagedSearchEngine::search`]
    #[allow(clippy::too_many_arguments)]
    pub async fn find(
        &self,
        base_location: &str,
        filter: &FilterExpression,
        scope: SearchScope,
        attributes: &[String],
        policy: BatchPolicy<'_>,
        start_index: u64,
        total_count_limit: usize,
        page_size: usize,
    ) -> AppResult<ResultContainer> {
        let request = SearchRequest::new(base_location, filter.clone())
            .scope(scope)
            .attributes(attributes.iter().cloned())
            .start_index(start_index)
            .limit(total_count_limit)
            .page_size(page_size);
        self.search(&request, policy).await
    }

    /// Number of entries matching `filter`, counted by a full streaming scan
    pub async fn count_entries(
        &self,
        base_location: &str,
        filter: &FilterExpression,
        scope: SearchScope,
    ) -> AppResult<usize> {
        let request = self
            .request(base_location, filter.clone())
            .scope(scope)
            .attributes(["dn"]);
        let mut counter = CountingBatch::default();
        let result = self
            .search(&request, BatchPolicy::Stream(&mut counter))
            .await?;
        Ok(result.total_count)
    }

    /// Run one logical scan to completion
    ///
    /// Returns either the container or exactly one error. Entries already
    /// handed to a streaming callback stay delivered when a later page fails.
    pub async fn search(
        &self,
        request: &SearchRequest,
        policy: BatchPolicy<'_>,
    ) -> AppResult<ResultContainer> {
        request.validate()?;

        let started = Instant::now();
        let mut scan = Scan::new();

        let result = match policy {
            BatchPolicy::Collect => {
                let mut collector = CollectingBatch::with_limit(request.total_count_limit);
                let outcome = self.run_scan(&mut scan, request, &mut collector, None).await;
                outcome.map(|()| Some(collector.into_entries()))
            }
            BatchPolicy::Stream(batch) => self
                .run_scan(&mut scan, request, batch, None)
                .await
                .map(|()| None),
            BatchPolicy::StreamAndCollect(batch) => {
                let mut sink = Vec::new();
                let outcome = self
                    .run_scan(&mut scan, request, batch, Some(&mut sink))
                    .await;
                outcome.map(|()| Some(sink))
            }
        };

        match result {
            Ok(entries) => {
                scan.transition(ScanState::Completed);
                self.log_summary(&scan, request, started, None);
                Ok(ResultContainer {
                    entries,
                    total_count: scan.processed,
                    count_is_exact: scan.count_is_exact,
                    start_index: request.start_index,
                    round_trips: scan.round_trips,
                    resume_token: scan.resume_token,
                })
            }
            Err(err) => {
                let state = if matches!(err, AppError::Callback(_)) {
                    ScanState::Aborted
                } else {
                    ScanState::Failed
                };
                scan.transition(state);
                self.log_summary(&scan, request, started, Some(&err));
                Err(err)
            }
        }
    }

    async fn run_scan(
        &self,
        scan: &mut Scan,
        request: &SearchRequest,
        batch: &mut dyn BatchOperation,
        mut sink: Option<&mut Vec<RawEntry>>,
    ) -> AppResult<()> {
        let native = self.service.supports_native_paging();
        let page_size = self.effective_page_size(request.page_size);
        let limit = request.total_count_limit;
        let mut page_request = request.clone();
        let (origin, mut token) = match &request.resume_from {
            None => (request.start_index, None),
            Some(ResumeToken::Offset(offset)) if !native => (*offset, None),
            Some(cursor) if native && !matches!(cursor, ResumeToken::Offset(_)) => {
                (request.start_index, Some(cursor.clone()))
            }
            Some(other) => {
                return Err(AppError::InvalidRequest(format!(
                    "{} backend cannot resume from {}",
                    self.service.persistence_type(),
                    other
                )));
            }
        };
        let resuming = request.resume_from.is_some();

        scan.transition(ScanState::Scanning);

        loop {
            let window = if limit > 0 {
                page_size.min(limit - scan.processed)
            } else {
                page_size
            };
            page_request.page_size = window;

            let resume = if native {
                token.take()
            } else if scan.fetched == 0 && !resuming {
                None
            } else {
                Some(ResumeToken::Offset(origin.saturating_add(scan.fetched)))
            };

            scan.round_trips += 1;
            let ResultPage {
                mut entries,
                has_more,
                cursor_state,
            } = self.service.search(&page_request, resume.as_ref()).await?;

            if entries.len() > window {
                warn!(
                    "scan {}: backend returned {} entries for a window of {}; truncating",
                    scan.id,
                    entries.len(),
                    window
                );
                entries.truncate(window);
            }
            scan.fetched += entries.len() as u64;

            debug!(
                "scan {}: round-trip {} returned {} entries (has_more={})",
                scan.id,
                scan.round_trips,
                entries.len(),
                has_more
            );

            let mut keep_scanning = true;
            if entries.is_empty() {
                if has_more {
                    scan.empty_streak += 1;
                    if scan.empty_streak >= self.settings.max_empty_pages {
                        return Err(AppError::StalledScan {
                            empty_pages: scan.empty_streak,
                        });
                    }
                }
            } else {
                scan.empty_streak = 0;
                let outcome = batch.perform_action(&entries).await.map_err(|e| match e {
                    AppError::Callback(_) => e,
                    other => AppError::Callback(other.to_string()),
                })?;
                scan.processed += entries.len();
                keep_scanning = outcome.continue_scanning;
                if let Some(sink) = sink.as_deref_mut() {
                    sink.extend(entries);
                }
            }

            if !has_more {
                scan.count_is_exact = true;
                scan.resume_token = None;
                return Ok(());
            }

            let limit_reached = limit > 0 && scan.processed >= limit;
            if limit_reached || !keep_scanning {
                scan.count_is_exact = false;
                scan.resume_token = if native {
                    cursor_state
                } else {
                    Some(ResumeToken::Offset(origin.saturating_add(scan.fetched)))
                };
                return Ok(());
            }

            if native {
                if cursor_state.is_none() {
                    return Err(AppError::Search(format!(
                        "{} backend reported more results without a resume token",
                        self.service.persistence_type()
                    )));
                }
                token = cursor_state;
            }
        }
    }

    fn log_summary(
        &self,
        scan: &Scan,
        request: &SearchRequest,
        started: Instant,
        error: Option<&AppError>,
    ) {
        ScanSummary {
            scan_id: &scan.id,
            persistence_type: self.service.persistence_type(),
            base: &request.base_location,
            filter: request.filter.to_string(),
            scope: request.scope.to_string(),
            state: scan.state.as_str(),
            round_trips: scan.round_trips,
            processed: scan.processed,
            count_is_exact: scan.count_is_exact,
            elapsed: started.elapsed(),
            error,
        }
        .emit();
    }
}
