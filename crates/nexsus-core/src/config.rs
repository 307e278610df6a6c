//! Runtime configuration.
//!
//! All tunables are read once at startup from environment variables plus
//! optional JSON catalog files (payload allowlists, JSON-FK mappings,
//! narrative patterns). Changes require restart.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{NexsusError, Result};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Vector collection tuning (one physical collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub collection_name: String,
    /// Dense vector dimension D. Must be ≥ 512.
    pub vector_size: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construct: usize,
    pub hnsw_ef_search: usize,
    /// Scalar int8 quantization with rescore for recall.
    pub quantization: bool,
    pub quantile: f32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            collection_name: "nexsus_unified".into(),
            vector_size: 1024,
            hnsw_m: 16,
            hnsw_ef_construct: 200,
            hnsw_ef_search: 128,
            quantization: true,
            quantile: 0.99,
        }
    }
}

/// Per-breaker tuning for one external service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_successes: 2,
        }
    }
}

/// Batching and fan-out knobs for the sync pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Cascade worker count; 1 disables parallelism.
    pub parallel_targets: usize,
    pub fetch_batch_size: usize,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    /// Pre-filter record ids already present in the store.
    pub skip_existing: bool,
    /// Whether the sync step upserts graph edges.
    pub update_graph: bool,
    /// Whether the record source includes soft-deleted records.
    pub include_archived: bool,
    /// Per-model cap on targeted orphan resync.
    pub sync_limit: usize,
    /// Scroll page size for integrity/repair scans.
    pub scan_batch_size: usize,
    /// Retrieve chunk size for FK existence probes.
    pub probe_chunk_size: usize,
    /// Cap on orphan detail rows per model in reports.
    pub orphan_detail_cap: usize,
    pub max_cascade_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallel_targets: 3,
            fetch_batch_size: 500,
            embed_batch_size: 200,
            upsert_batch_size: 500,
            skip_existing: false,
            update_graph: true,
            include_archived: false,
            sync_limit: 5000,
            scan_batch_size: 1000,
            probe_chunk_size: 100,
            orphan_detail_cap: 100,
            max_cascade_depth: 6,
        }
    }
}

/// Embedding gateway knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_batch_tokens: usize,
    pub max_batch_items: usize,
    /// Per-text character ceiling applied during sanitization.
    pub max_text_chars: usize,
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            api_key: String::new(),
            model: "nomic-embed-text".into(),
            max_batch_tokens: 280_000,
            max_batch_items: 1_000,
            max_text_chars: 8_000,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Query-layer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Auto-export cutoff for oversized result sets.
    pub token_threshold: usize,
    /// Warn when a dotted-filter sub-query returns more ids than this.
    pub subquery_warn_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            token_threshold: 20_000,
            subquery_warn_limit: 10_000,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexsusConfig {
    pub store_url: String,
    pub store_api_key: Option<String>,
    pub collection: CollectionConfig,
    pub embedding: EmbeddingConfig,
    pub sync: SyncConfig,
    pub query: QueryConfig,
    pub breaker_schema_source: BreakerConfig,
    pub breaker_record_source: BreakerConfig,
    pub breaker_embedding: BreakerConfig,
    pub breaker_vector_store: BreakerConfig,
    pub odoo_url: Option<String>,
    pub odoo_db: Option<String>,
    pub odoo_user: Option<String>,
    pub odoo_password: Option<String>,
    pub dlq_path: PathBuf,
    pub watermark_dir: PathBuf,
    pub pattern_dir: Option<PathBuf>,
    /// Optional JSON catalog with payload allowlists and JSON-FK mappings.
    pub catalog_path: Option<PathBuf>,
}

impl Default for NexsusConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:6333".into(),
            store_api_key: None,
            collection: CollectionConfig::default(),
            embedding: EmbeddingConfig::default(),
            sync: SyncConfig::default(),
            query: QueryConfig::default(),
            breaker_schema_source: BreakerConfig::default(),
            breaker_record_source: BreakerConfig {
                failure_threshold: 5,
                reset_timeout: Duration::from_secs(60),
                half_open_successes: 2,
            },
            breaker_embedding: BreakerConfig::default(),
            breaker_vector_store: BreakerConfig {
                failure_threshold: 5,
                reset_timeout: Duration::from_secs(30),
                half_open_successes: 3,
            },
            odoo_url: None,
            odoo_db: None,
            odoo_user: None,
            odoo_password: None,
            dlq_path: PathBuf::from("data/dlq.json"),
            watermark_dir: PathBuf::from("data/watermarks"),
            pattern_dir: None,
            catalog_path: None,
        }
    }
}

impl NexsusConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.store_url = env_string("NEXSUS_STORE_URL", &config.store_url);
        config.store_api_key = std::env::var("NEXSUS_STORE_API_KEY").ok();
        config.collection.collection_name =
            env_string("NEXSUS_COLLECTION", &config.collection.collection_name);
        config.collection.vector_size = env_or("NEXSUS_VECTOR_SIZE", config.collection.vector_size);
        config.collection.hnsw_m = env_or("NEXSUS_HNSW_M", config.collection.hnsw_m);
        config.collection.hnsw_ef_construct =
            env_or("NEXSUS_HNSW_EF_CONSTRUCT", config.collection.hnsw_ef_construct);
        config.collection.hnsw_ef_search =
            env_or("NEXSUS_HNSW_EF_SEARCH", config.collection.hnsw_ef_search);
        config.collection.quantization = env_or("NEXSUS_QUANTIZATION", config.collection.quantization);

        config.embedding.base_url = env_string("NEXSUS_EMBED_URL", &config.embedding.base_url);
        config.embedding.api_key = env_string("NEXSUS_EMBED_API_KEY", "");
        config.embedding.model = env_string("NEXSUS_EMBED_MODEL", &config.embedding.model);
        config.embedding.max_batch_tokens =
            env_or("NEXSUS_MAX_BATCH_TOKENS", config.embedding.max_batch_tokens);
        config.embedding.max_batch_items =
            env_or("NEXSUS_MAX_BATCH_ITEMS", config.embedding.max_batch_items);
        config.embedding.max_text_chars =
            env_or("NEXSUS_MAX_TEXT_CHARS", config.embedding.max_text_chars);

        config.sync.parallel_targets = env_or("NEXSUS_PARALLEL_TARGETS", config.sync.parallel_targets);
        config.sync.fetch_batch_size = env_or("NEXSUS_FETCH_BATCH_SIZE", config.sync.fetch_batch_size);
        config.sync.embed_batch_size = env_or("NEXSUS_EMBED_BATCH_SIZE", config.sync.embed_batch_size);
        config.sync.upsert_batch_size =
            env_or("NEXSUS_UPSERT_BATCH_SIZE", config.sync.upsert_batch_size);
        config.sync.skip_existing = env_or("NEXSUS_SKIP_EXISTING", config.sync.skip_existing);
        config.sync.update_graph = env_or("NEXSUS_UPDATE_GRAPH", config.sync.update_graph);
        config.sync.include_archived = env_or("NEXSUS_INCLUDE_ARCHIVED", config.sync.include_archived);
        config.sync.sync_limit = env_or("NEXSUS_SYNC_LIMIT", config.sync.sync_limit);

        config.query.token_threshold = env_or("NEXSUS_TOKEN_THRESHOLD", config.query.token_threshold);

        for (breaker, prefix) in [
            (&mut config.breaker_schema_source, "NEXSUS_BREAKER_SCHEMA"),
            (&mut config.breaker_record_source, "NEXSUS_BREAKER_RECORDS"),
            (&mut config.breaker_embedding, "NEXSUS_BREAKER_EMBEDDING"),
            (&mut config.breaker_vector_store, "NEXSUS_BREAKER_STORE"),
        ] {
            breaker.failure_threshold =
                env_or(&format!("{prefix}_FAILURE_THRESHOLD"), breaker.failure_threshold);
            breaker.reset_timeout = Duration::from_millis(env_or(
                &format!("{prefix}_RESET_TIMEOUT_MS"),
                breaker.reset_timeout.as_millis() as u64,
            ));
            breaker.half_open_successes =
                env_or(&format!("{prefix}_HALF_OPEN_REQUESTS"), breaker.half_open_successes);
        }

        config.odoo_url = std::env::var("ODOO_URL").ok();
        config.odoo_db = std::env::var("ODOO_DB").ok();
        config.odoo_user = std::env::var("ODOO_USER").ok();
        config.odoo_password = std::env::var("ODOO_PASSWORD").ok();

        config.dlq_path = PathBuf::from(env_string("NEXSUS_DLQ_PATH", "data/dlq.json"));
        config.watermark_dir = PathBuf::from(env_string("NEXSUS_WATERMARK_DIR", "data/watermarks"));
        config.pattern_dir = std::env::var("NEXSUS_PATTERN_DIR").ok().map(PathBuf::from);
        config.catalog_path = std::env::var("NEXSUS_CATALOG").ok().map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.vector_size < 512 {
            return Err(NexsusError::Config(format!(
                "vector size {} is below the 512 minimum",
                self.collection.vector_size
            )));
        }
        if self.sync.parallel_targets == 0 {
            return Err(NexsusError::Config(
                "parallel_targets must be at least 1".into(),
            ));
        }
        if self.embedding.max_batch_items == 0 || self.embedding.max_batch_tokens == 0 {
            return Err(NexsusError::Config("embedding batch limits must be positive".into()));
        }
        Ok(())
    }
}
