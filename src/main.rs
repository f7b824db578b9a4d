use async_trait::async_trait;
use chrono::{Duration, Utc};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use entry_persistence::batch::{BatchOperation, BatchOutcome, BatchPolicy};
use entry_persistence::config::AppConfig;
use entry_persistence::error::{AppError, AppResult};
use entry_persistence::logging::init_tracing;
use entry_persistence::models::{AttributeModification, RawEntry, SearchScope};
use entry_persistence::startup::setup_backend;
use entry_persistence::utils::encode_generalized_time;
use entry_persistence::{FilterExpression, OperationService, PagedSearchEngine};

#[derive(Parser, Debug)]
#[command(name = "entry-persistence")]
#[command(about = "Batch job that rewrites a timestamp attribute on every entry carrying it")]
struct Args {
    /// Configuration file path (default: config.yaml, falls back to in-memory SQLite)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Base DN of the scan
    #[arg(short, long, default_value = "o=gluu")]
    base: String,

    /// Attribute to select on and rewrite
    #[arg(short, long, default_value = "exp")]
    attribute: String,

    /// Entries per round-trip (overrides search.default_page_size)
    #[arg(long)]
    page_size: Option<usize>,

    /// Stop after this many entries (0 = no limit)
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Materialize the matching entries and print the count instead of rewriting
    #[arg(long)]
    collect: bool,

    /// Add this many sample entries below the base before scanning
    #[arg(long)]
    seed: Option<usize>,
}

/// Sets one attribute to a fixed value on every entry it receives
struct AttributeRewrite {
    service: Arc<dyn OperationService>,
    attribute: String,
    value: String,
    updated: usize,
}

#[async_trait]
impl BatchOperation for AttributeRewrite {
    async fn perform_action(&mut self, entries: &[RawEntry]) -> AppResult<BatchOutcome> {
        let modification =
            AttributeModification::Replace(self.attribute.clone(), vec![self.value.clone()]);
        for entry in entries {
            self.service
                .update(&entry.dn, std::slice::from_ref(&modification))
                .await?;
            self.updated += 1;
        }
        Ok(BatchOutcome::proceed(entries.len()))
    }
}

async fn seed_entries(
    service: &Arc<dyn OperationService>,
    base: &str,
    attribute: &str,
    count: usize,
) -> AppResult<()> {
    // create the base and its ancestors, top-down
    let rdns: Vec<&str> = base.split(',').map(str::trim).collect();
    for depth in (0..rdns.len()).rev() {
        let dn = rdns[depth..].join(",");
        match service.add(&RawEntry::new(dn)).await {
            Ok(()) | Err(AppError::DuplicateEntry(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let now = Utc::now();
    for i in 0..count {
        let entry = RawEntry::new(format!("uid=sample{:05},{}", i, base))
            .with("uid", format!("sample{:05}", i))
            .with(attribute, encode_generalized_time(now + Duration::hours(1)));
        service.add(&entry).await?;
    }
    info!("Seeded {} entries below {}", count, base);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let using_defaults =
        args.config == "config.yaml" && !std::path::Path::new("config.yaml").exists();
    let config = if using_defaults {
        let mut config = AppConfig::default_config();
        config.apply_env_overrides()?;
        config.validate()?;
        config
    } else {
        AppConfig::load_from_file(&args.config)
            .map_err(|e| format!("Failed to load configuration: {}", e))?
    };

    init_tracing(&config.logging.level)?;
    if using_defaults {
        warn!("No config.yaml found, using in-memory SQLite");
    }

    let service = setup_backend(&config).await?;
    if let Some(count) = args.seed {
        seed_entries(&service, &args.base, &args.attribute, count).await?;
    }

    let engine = PagedSearchEngine::from_config(service.clone(), &config);
    let mut request = engine
        .request(&args.base, FilterExpression::presence(args.attribute.as_str())?)
        .scope(SearchScope::Subtree)
        .limit(args.limit);
    if let Some(page_size) = args.page_size {
        request = request.page_size(page_size);
    }

    if args.collect {
        let result = engine.search(&request, BatchPolicy::Collect).await?;
        println!(
            "Found {} entries with '{}' ({} round-trips, count {})",
            result.entries().len(),
            args.attribute,
            result.round_trips,
            if result.count_is_exact { "exact" } else { "partial" }
        );
    } else {
        let mut rewrite = AttributeRewrite {
            service: service.clone(),
            attribute: args.attribute.clone(),
            value: encode_generalized_time(Utc::now() - Duration::seconds(1)),
            updated: 0,
        };
        let result = engine
            .search(&request, BatchPolicy::Stream(&mut rewrite))
            .await?;
        info!(
            "Updated '{}' on {} entries in {} round-trips",
            args.attribute, rewrite.updated, result.round_trips
        );
        println!(
            "Updated {} of {} entries",
            rewrite.updated, result.total_count
        );
        if let Some(token) = &result.resume_token {
            println!("Stopped early; resume token {}", token);
        }
    }

    service.destroy().await?;
    Ok(())
}
