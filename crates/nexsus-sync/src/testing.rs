//! Shared test fixture: a two-model world on a static source, an
//! in-memory store, and a scripted embedding provider.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nexsus_core::config::{BreakerConfig, EmbeddingConfig, SyncConfig};
use nexsus_core::error::{NexsusError, Result};
use nexsus_core::schema::testing::{field, fk_field};
use nexsus_core::schema::{FieldType, ModelSchema, SchemaRegistry};
use nexsus_embed::gateway::EmbeddingGateway;
use nexsus_embed::provider::{EmbeddingProvider, InputType};
use nexsus_resilience::breaker::BreakerSet;
use nexsus_resilience::dlq::DeadLetterQueue;
use nexsus_resilience::retry::RetryPolicy;
use nexsus_store::memory::MemoryStore;
use nexsus_store::unified::UnifiedStore;

use crate::scheduler::SyncContext;
use crate::source::{SourceField, SourceModel, StaticSource};

pub const DIM: usize = 4;

pub struct OkProvider;

#[async_trait]
impl EmbeddingProvider for OkProvider {
    async fn embed(&self, texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let x = (t.len() % 7) as f32 + 1.0;
                vec![x, 1.0, 0.5, 0.25]
            })
            .collect())
    }
}

pub struct DownProvider;

#[async_trait]
impl EmbeddingProvider for DownProvider {
    async fn embed(&self, _texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
        Err(NexsusError::transient("embedding", "503 upstream down"))
    }
}

pub struct Fixture {
    pub source: Arc<StaticSource>,
    pub memory: Arc<MemoryStore>,
    pub ctx: Arc<SyncContext>,
    pub _dir: tempfile::TempDir,
}

pub fn registry_with_world() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry.insert_model(ModelSchema {
        model_name: "m_parent".into(),
        model_id: 10,
        primary_key_field_id: 100,
        fields: vec![
            field(100, "id", "ID", FieldType::Integer, true),
            field(101, "name", "Name", FieldType::Char, true),
            field(102, "amount_total", "Total", FieldType::Monetary, true),
            field(103, "date_order", "Order Date", FieldType::Date, true),
            fk_field(104, "partner_id", "Partner", FieldType::Many2One, "m_partner", 20),
        ],
    });
    registry.insert_model(ModelSchema {
        model_name: "m_partner".into(),
        model_id: 20,
        primary_key_field_id: 200,
        fields: vec![
            field(200, "id", "ID", FieldType::Integer, true),
            field(201, "name", "Name", FieldType::Char, true),
            fk_field(202, "parent_id", "Parent", FieldType::Many2One, "m_partner", 20),
        ],
    });
    registry
}

pub fn source_with_world() -> StaticSource {
    let source = StaticSource::new();
    source.add_model(
        SourceModel {
            name: "m_parent".into(),
            model_id: 10,
        },
        vec![
            source_field(100, "id", "ID", "integer", None),
            source_field(101, "name", "Name", "char", None),
            source_field(102, "amount_total", "Total", "monetary", None),
            source_field(103, "date_order", "Order Date", "date", None),
            source_field(104, "partner_id", "Partner", "many2one", Some("m_partner")),
        ],
    );
    source.add_model(
        SourceModel {
            name: "m_partner".into(),
            model_id: 20,
        },
        vec![
            source_field(200, "id", "ID", "integer", None),
            source_field(201, "name", "Name", "char", None),
            source_field(202, "parent_id", "Parent", "many2one", Some("m_partner")),
        ],
    );
    source
}

pub fn source_field(
    field_id: u64,
    name: &str,
    label: &str,
    ttype: &str,
    relation: Option<&str>,
) -> SourceField {
    SourceField {
        field_id,
        name: name.into(),
        label: label.into(),
        ttype: ttype.into(),
        stored: true,
        relation: relation.map(str::to_string),
    }
}

pub fn fixture_with_provider(provider: Arc<dyn EmbeddingProvider>) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(source_with_world());
    let memory = Arc::new(MemoryStore::new(DIM));
    let registry = Arc::new(registry_with_world());
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let breakers = Arc::new(BreakerSet::new(
        BreakerConfig::default(),
        BreakerConfig::default(),
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_successes: 2,
        },
        BreakerConfig::default(),
    ));
    let store = Arc::new(UnifiedStore::new(memory.clone(), None, retry, DIM));
    let gateway = Arc::new(EmbeddingGateway::new(
        provider,
        breakers.embedding.clone(),
        retry,
        EmbeddingConfig::default(),
        DIM,
    ));
    let dlq = Arc::new(
        DeadLetterQueue::open(dir.path().join("dlq.json"), 1000).expect("dlq"),
    );

    let ctx = Arc::new(SyncContext {
        source: source.clone(),
        registry,
        store,
        gateway,
        dlq,
        breakers,
        config: SyncConfig {
            parallel_targets: 2,
            fetch_batch_size: 50,
            upsert_batch_size: 50,
            ..Default::default()
        },
        patterns: HashMap::new(),
    });

    Fixture {
        source,
        memory,
        ctx,
        _dir: dir,
    }
}

pub fn fixture() -> Fixture {
    fixture_with_provider(Arc::new(OkProvider))
}
