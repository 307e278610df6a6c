//! Wiring: build the sync context from configuration.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use nexsus_core::pattern::NarrativePattern;
use nexsus_core::schema::SchemaRegistry;
use nexsus_core::NexsusConfig;
use nexsus_embed::gateway::EmbeddingGateway;
use nexsus_embed::provider::HttpEmbeddingProvider;
use nexsus_resilience::breaker::BreakerSet;
use nexsus_resilience::dlq::{DeadLetterQueue, DEFAULT_MAX_DLQ_SIZE};
use nexsus_resilience::retry::RetryPolicy;
use nexsus_store::qdrant::QdrantHttpStore;
use nexsus_store::unified::UnifiedStore;
use nexsus_sync::odoo::{OdooClient, OdooConfig};
use nexsus_sync::scheduler::SyncContext;
use nexsus_sync::source::RecordSource;
use nexsus_sync::watermark::WatermarkStore;

pub struct App {
    pub ctx: Arc<SyncContext>,
    pub watermarks: WatermarkStore,
}

/// Build the full pipeline context against the configured Odoo source.
pub async fn build(config: &NexsusConfig) -> Result<App> {
    let source = odoo_source(config)?;
    build_with_source(config, source).await
}

/// Build the pipeline context with an explicit record source (used for
/// the spreadsheet-export schema path).
pub async fn build_with_source(
    config: &NexsusConfig,
    source: Arc<dyn RecordSource>,
) -> Result<App> {
    let breakers = Arc::new(BreakerSet::from_config(config));
    let retry = RetryPolicy::default();

    let qdrant = QdrantHttpStore::new(
        config.store_url.clone(),
        config.store_api_key.clone(),
        config.collection.clone(),
    )?;
    let store = Arc::new(UnifiedStore::new(
        Arc::new(qdrant),
        Some(breakers.vector_store.clone()),
        retry,
        config.collection.vector_size,
    ));

    let provider = Arc::new(HttpEmbeddingProvider::new(config.embedding.clone())?);
    let gateway = Arc::new(EmbeddingGateway::new(
        provider,
        breakers.embedding.clone(),
        retry,
        config.embedding.clone(),
        config.collection.vector_size,
    ));

    let registry = Arc::new(SchemaRegistry::new());
    store
        .bootstrap(&registry)
        .await
        .context("store bootstrap failed")?;
    store
        .load_schema_registry(&registry)
        .await
        .context("loading schema registry from store")?;

    let dlq = Arc::new(DeadLetterQueue::open(
        config.dlq_path.clone(),
        DEFAULT_MAX_DLQ_SIZE,
    )?);

    let ctx = Arc::new(SyncContext {
        source,
        registry,
        store,
        gateway,
        dlq,
        breakers,
        config: config.sync.clone(),
        patterns: load_patterns(config.pattern_dir.as_deref()),
    });

    Ok(App {
        ctx,
        watermarks: WatermarkStore::new(config.watermark_dir.clone()),
    })
}

pub fn odoo_source(config: &NexsusConfig) -> Result<Arc<dyn RecordSource>> {
    let (Some(url), Some(db), Some(user), Some(password)) = (
        config.odoo_url.clone(),
        config.odoo_db.clone(),
        config.odoo_user.clone(),
        config.odoo_password.clone(),
    ) else {
        anyhow::bail!(nexsus_core::error::NexsusError::Config(
            "ODOO_URL, ODOO_DB, ODOO_USER, ODOO_PASSWORD must be set".into()
        ));
    };
    let client = OdooClient::new(OdooConfig {
        url,
        db,
        user,
        password,
        include_archived: config.sync.include_archived,
        timeout: Duration::from_secs(120),
    })?;
    Ok(Arc::new(client))
}

/// Load every `<model>.json` narrative pattern under `dir`.
fn load_patterns(dir: Option<&Path>) -> HashMap<String, NarrativePattern> {
    let mut patterns = HashMap::new();
    let Some(dir) = dir else {
        return patterns;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "pattern directory not readable");
        return patterns;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match NarrativePattern::load(&path) {
            Ok(pattern) => {
                patterns.insert(pattern.model_name.clone(), pattern);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "skipping bad pattern file"),
        }
    }
    patterns
}
