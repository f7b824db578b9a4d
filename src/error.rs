use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Caller supplied a request the engine refuses to run
    InvalidRequest(String),
    /// Filter tree violates its construction rules
    InvalidFilter(String),
    /// Transport-level failure talking to the backend
    Connection(String),
    /// Backend rejected the translated query
    Search(String),
    /// Continuation cookie/cursor was invalidated mid-scan
    PagingExpired(String),
    /// Too many consecutive empty pages while the backend kept reporting more
    StalledScan { empty_pages: usize },
    /// Batch callback signalled a fatal condition
    Callback(String),
    EntryNotFound(String),
    DuplicateEntry(String),
    Database(String),
    Serialization(serde_json::Error),
    Configuration(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            AppError::InvalidFilter(e) => write!(f, "Invalid filter: {}", e),
            AppError::Connection(e) => write!(f, "Connection error: {}", e),
            AppError::Search(e) => write!(f, "Search error: {}", e),
            AppError::PagingExpired(e) => write!(f, "Paging state expired: {}", e),
            AppError::StalledScan { empty_pages } => write!(
                f,
                "Scan stalled: {} consecutive empty pages while backend reported more results",
                empty_pages
            ),
            AppError::Callback(e) => write!(f, "Batch operation failed: {}", e),
            AppError::EntryNotFound(dn) => write!(f, "Entry not found: {}", dn),
            AppError::DuplicateEntry(dn) => write!(f, "Entry already exists: {}", dn),
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err)
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl AppError {
    /// Only transport failures may be retried, and only by the connection layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Connection(_))
    }

    /// Stable short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidFilter(_) => "invalid_filter",
            AppError::Connection(_) => "connection",
            AppError::Search(_) => "search",
            AppError::PagingExpired(_) => "paging_expired",
            AppError::StalledScan { .. } => "stalled_scan",
            AppError::Callback(_) => "callback",
            AppError::EntryNotFound(_) => "entry_not_found",
            AppError::DuplicateEntry(_) => "duplicate_entry",
            AppError::Database(_) => "database",
            AppError::Serialization(_) => "serialization",
            AppError::Configuration(_) => "configuration",
            AppError::Internal(_) => "internal",
        }
    }

    /// Classify a sqlx failure: pool and transport problems are connection errors,
    /// everything else is reported through `fallback`.
    pub fn from_sqlx(err: sqlx::Error, fallback: fn(String) -> AppError) -> AppError {
        match err {
            sqlx::Error::Io(e) => AppError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => AppError::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                AppError::Connection("timed out acquiring a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => {
                AppError::Connection("connection pool is closed".to_string())
            }
            sqlx::Error::WorkerCrashed => {
                AppError::Connection("database worker crashed".to_string())
            }
            other => fallback(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(AppError::Connection("reset".into()).is_retryable());
        assert!(!AppError::PagingExpired("cookie".into()).is_retryable());
        assert!(!AppError::Search("bad filter".into()).is_retryable());
        assert!(!AppError::StalledScan { empty_pages: 3 }.is_retryable());
    }

    #[test]
    fn test_sqlx_classification() {
        let err = AppError::from_sqlx(sqlx::Error::PoolTimedOut, AppError::Search);
        assert_eq!(err.kind(), "connection");

        let err = AppError::from_sqlx(sqlx::Error::RowNotFound, AppError::Search);
        assert_eq!(err.kind(), "search");

        let err = AppError::from_sqlx(sqlx::Error::RowNotFound, AppError::Database);
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn test_display() {
        let err = AppError::StalledScan { empty_pages: 4 };
        assert!(err.to_string().contains("4 consecutive empty pages"));
        assert_eq!(
            AppError::EntryNotFound("uid=a,o=gluu".into()).to_string(),
            "Entry not found: uid=a,o=gluu"
        );
    }
}
