//! Batch operation contract
//!
//! A batch operation receives every non-empty page of a scan, in the order the
//! backend produced them, and tells the engine whether to keep scanning.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::RawEntry;

/// Per-page answer of a batch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed_count: usize,
    pub continue_scanning: bool,
}

impl BatchOutcome {
    pub fn proceed(processed_count: usize) -> Self {
        Self {
            processed_count,
            continue_scanning: true,
        }
    }

    pub fn stop(processed_count: usize) -> Self {
        Self {
            processed_count,
            continue_scanning: false,
        }
    }
}

/// Callback invoked once per page during a scan
///
/// Returning `Err` aborts the scan; the engine surfaces it as
/// [`AppError::Callback`](crate::error::AppError::Callback). Returning
/// `continue_scanning = false` ends the scan cooperatively.
#[async_trait]
pub trait BatchOperation: Send {
    async fn perform_action(&mut self, entries: &[RawEntry]) -> AppResult<BatchOutcome>;
}

/// Typed counterpart of [`BatchOperation`]: each page arrives already decoded
/// into entities
#[async_trait]
pub trait EntityBatchOperation<T: Send>: Send {
    async fn perform_action(&mut self, entities: Vec<T>) -> AppResult<BatchOutcome>;
}

/// Streaming policy: hands each page to a closure and keeps nothing
pub struct StreamingBatch<F>
where
    F: FnMut(&[RawEntry]) -> AppResult<()> + Send,
{
    action: F,
    cancelled: Option<Arc<AtomicBool>>,
    processed: usize,
}

impl<F> StreamingBatch<F>
where
    F: FnMut(&[RawEntry]) -> AppResult<()> + Send,
{
    pub fn new(action: F) -> Self {
        Self {
            action,
            cancelled: None,
            processed: 0,
        }
    }

    /// Stop after the current page once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn processed(&self) -> usize {
        self.processed
    }
}

#[async_trait]
impl<F> BatchOperation for StreamingBatch<F>
where
    F: FnMut(&[RawEntry]) -> AppResult<()> + Send,
{
    async fn perform_action(&mut self, entries: &[RawEntry]) -> AppResult<BatchOutcome> {
        (self.action)(entries)?;
        self.processed += entries.len();

        let cancelled = self
            .cancelled
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false);

        Ok(BatchOutcome {
            processed_count: entries.len(),
            continue_scanning: !cancelled,
        })
    }
}

/// Collecting policy: appends every page, stops once `limit` entries are held
#[derive(Debug, Default)]
pub struct CollectingBatch {
    entries: Vec<RawEntry>,
    limit: usize,
}

impl CollectingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero means unbounded
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<RawEntry> {
        self.entries
    }
}

#[async_trait]
impl BatchOperation for CollectingBatch {
    async fn perform_action(&mut self, entries: &[RawEntry]) -> AppResult<BatchOutcome> {
        let take = if self.limit > 0 {
            entries.len().min(self.limit.saturating_sub(self.entries.len()))
        } else {
            entries.len()
        };
        self.entries.extend_from_slice(&entries[..take]);

        let limit_reached = self.limit > 0 && self.entries.len() >= self.limit;
        Ok(BatchOutcome {
            processed_count: take,
            continue_scanning: !limit_reached,
        })
    }
}

/// Counts entries without keeping them
#[derive(Debug, Default)]
pub struct CountingBatch {
    pub count: usize,
}

#[async_trait]
impl BatchOperation for CountingBatch {
    async fn perform_action(&mut self, entries: &[RawEntry]) -> AppResult<BatchOutcome> {
        self.count += entries.len();
        Ok(BatchOutcome::proceed(entries.len()))
    }
}

/// How a scan treats the pages it reads
pub enum BatchPolicy<'a> {
    /// Materialize every entry into the returned container
    Collect,
    /// Hand pages to a callback and materialize nothing
    Stream(&'a mut dyn BatchOperation),
    /// Hand pages to a callback and also materialize them
    StreamAndCollect(&'a mut dyn BatchOperation),
}

impl BatchPolicy<'_> {
    pub fn materializes(&self) -> bool {
        !matches!(self, BatchPolicy::Stream(_))
    }
}
