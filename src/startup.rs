use std::sync::Arc;
use tracing::info;

use crate::backend::{BackendRegistry, OperationService};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::search::PagedSearchEngine;

/// Create the configured backend and check that it answers
pub async fn setup_backend(config: &AppConfig) -> AppResult<Arc<dyn OperationService>> {
    setup_backend_with(&BackendRegistry::with_defaults(), config).await
}

pub async fn setup_backend_with(
    registry: &BackendRegistry,
    config: &AppConfig,
) -> AppResult<Arc<dyn OperationService>> {
    let service = registry.create(config).await?;
    service.health_check().await?;
    info!(
        "Using '{}' persistence ({} paging)",
        service.persistence_type(),
        if service.supports_native_paging() {
            "native"
        } else {
            "offset"
        }
    );
    Ok(service)
}

/// Backend plus an engine tuned from the `search` section
pub async fn setup_engine(config: &AppConfig) -> AppResult<PagedSearchEngine> {
    let service = setup_backend(config).await?;
    Ok(PagedSearchEngine::from_config(service, config))
}
