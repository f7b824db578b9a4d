pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod manager;
pub mod mapper;
pub mod models;
pub mod password;
pub mod search;
pub mod startup;
pub mod utils;

// Re-export commonly used types for easier access
pub use backend::{BackendRegistry, OperationService};
pub use batch::{BatchOperation, BatchOutcome, BatchPolicy};
pub use error::{AppError, AppResult};
pub use filter::FilterExpression;
pub use models::{RawEntry, ResultPage, ResumeToken, SearchRequest, SearchScope};
pub use search::{PagedSearchEngine, ResultContainer};
