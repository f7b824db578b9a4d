use std::time::Duration;
use tracing::{info, warn, Level};

use crate::error::{AppError, AppResult};

/// Install the global fmt subscriber at the configured level
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing(level: &str) -> AppResult<()> {
    let level: Level = level
        .parse()
        .map_err(|_| AppError::Configuration(format!("Invalid log level: {}", level)))?;

    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

/// One line per finished scan, written to the `search_log` target
#[derive(Debug)]
pub struct ScanSummary<'a> {
    pub scan_id: &'a str,
    pub persistence_type: &'a str,
    pub base: &'a str,
    pub filter: String,
    pub scope: String,
    pub state: &'a str,
    pub round_trips: usize,
    pub processed: usize,
    pub count_is_exact: bool,
    pub elapsed: Duration,
    pub error: Option<&'a AppError>,
}

impl ScanSummary<'_> {
    pub fn emit(&self) {
        match self.error {
            None => info!(
                target: "search_log",
                "{} {} base=\"{}\" filter=\"{}\" scope={} state={} \
                 round_trips={} processed={} exact={} {}ms",
                self.scan_id,
                self.persistence_type,
                self.base,
                self.filter,
                self.scope,
                self.state,
                self.round_trips,
                self.processed,
                self.count_is_exact,
                self.elapsed.as_millis()
            ),
            Some(error) => warn!(
                target: "search_log",
                "{} {} base=\"{}\" filter=\"{}\" scope={} state={} \
                 round_trips={} processed={} error={} \"{}\" {}ms",
                self.scan_id,
                self.persistence_type,
                self.base,
                self.filter,
                self.scope,
                self.state,
                self.round_trips,
                self.processed,
                error.kind(),
                error,
                self.elapsed.as_millis()
            ),
        }
    }
}
