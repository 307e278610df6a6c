//! Qdrant REST adapter.
//!
//! Talks to a Qdrant-compatible server over its JSON HTTP API. All writes
//! pass `wait=true` so scroll/count reads in the same sync run observe
//! them. Index creation is idempotent: "already exists" responses are
//! treated as success.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use async_trait::async_trait;

use nexsus_core::config::CollectionConfig;
use nexsus_core::error::{NexsusError, Result};
use nexsus_core::point::{Payload, Point};

use crate::filter::Filter;
use crate::store::{
    CollectionInfo, DeleteSelector, IndexType, ScrollPage, SearchHit, VectorStore,
};

pub const SERVICE: &str = "vector_store";

pub struct QdrantHttpStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    config: CollectionConfig,
}

impl QdrantHttpStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        config: CollectionConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| NexsusError::Config(format!("store http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            config,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{suffix}",
            self.base_url, self.config.collection_name
        )
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| NexsusError::transient(SERVICE, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(NexsusError::transient(SERVICE, format!("{status}: {text}")));
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(NexsusError::rejected(SERVICE, format!("{status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| NexsusError::transient(SERVICE, format!("bad response body: {e}")))
    }

    fn parse_point(raw: &Value, with_vector: bool) -> Option<Point> {
        let id = match &raw["id"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let payload: Payload = raw
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let vector = if with_vector {
            raw.get("vector")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Some(Point { id, vector, payload })
    }
}

#[async_trait]
impl VectorStore for QdrantHttpStore {
    async fn ensure_collection(&self) -> Result<()> {
        let info_url = self.url("");
        if self
            .request(reqwest::Method::GET, info_url.clone(), None)
            .await
            .is_ok()
        {
            debug!(collection = %self.config.collection_name, "collection already exists");
            return Ok(());
        }

        let mut body = json!({
            "vectors": {
                "size": self.config.vector_size,
                "distance": "Cosine",
            },
            "hnsw_config": {
                "m": self.config.hnsw_m,
                "ef_construct": self.config.hnsw_ef_construct,
            },
        });
        if self.config.quantization {
            body["quantization_config"] = json!({
                "scalar": {
                    "type": "int8",
                    "quantile": self.config.quantile,
                    "always_ram": true,
                }
            });
        }
        info!(
            collection = %self.config.collection_name,
            vector_size = self.config.vector_size,
            "creating collection"
        );
        self.request(reqwest::Method::PUT, info_url, Some(body))
            .await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({"id": p.id, "vector": p.vector, "payload": p.payload}))
                .collect::<Vec<_>>()
        });
        self.request(
            reqwest::Method::PUT,
            self.url("/points?wait=true"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn retrieve(
        &self,
        ids: &[String],
        with_payload: bool,
        with_vector: bool,
    ) -> Result<Vec<Point>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "ids": ids,
            "with_payload": with_payload,
            "with_vector": with_vector,
        });
        let response = self
            .request(reqwest::Method::POST, self.url("/points"), Some(body))
            .await?;
        Ok(response["result"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|raw| Self::parse_point(raw, with_vector))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scroll(
        &self,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<&str>,
    ) -> Result<ScrollPage> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter.to_wire();
        }
        if let Some(offset) = offset {
            body["offset"] = Value::String(offset.to_string());
        }
        let response = self
            .request(reqwest::Method::POST, self.url("/points/scroll"), Some(body))
            .await?;
        let points = response["result"]["points"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|raw| Self::parse_point(raw, false))
                    .collect()
            })
            .unwrap_or_default();
        let next_offset = match &response["result"]["next_page_offset"] {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        Ok(ScrollPage { points, next_offset })
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "params": {"hnsw_ef": self.config.hnsw_ef_search},
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter.to_wire();
        }
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = Value::from(threshold);
        }
        if self.config.quantization {
            body["params"]["quantization"] = json!({"rescore": true, "oversampling": 2.0});
        }
        let response = self
            .request(reqwest::Method::POST, self.url("/points/search"), Some(body))
            .await?;
        Ok(response["result"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|raw| {
                        let point = Self::parse_point(raw, false)?;
                        let score = raw["score"].as_f64()? as f32;
                        Some(SearchHit { point, score })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, filter: Option<&Filter>, exact: bool) -> Result<u64> {
        let mut body = json!({"exact": exact});
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter.to_wire();
        }
        let response = self
            .request(reqwest::Method::POST, self.url("/points/count"), Some(body))
            .await?;
        Ok(response["result"]["count"].as_u64().unwrap_or(0))
    }

    async fn delete(&self, selector: DeleteSelector) -> Result<()> {
        let body = match selector {
            DeleteSelector::Ids(ids) => json!({"points": ids}),
            DeleteSelector::Filter(filter) => json!({"filter": filter.to_wire()}),
        };
        self.request(
            reqwest::Method::POST,
            self.url("/points/delete?wait=true"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn create_payload_index(&self, field: &str, index_type: IndexType) -> Result<()> {
        let body = json!({
            "field_name": field,
            "field_schema": index_type.as_str(),
        });
        match self
            .request(
                reqwest::Method::PUT,
                self.url("/index?wait=true"),
                Some(body),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Duplicate index creation must be idempotent.
            Err(NexsusError::Rejected { message, .. })
                if message.contains("already exists") || message.contains("409") =>
            {
                debug!(field, "payload index already present");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let response = self.request(reqwest::Method::GET, self.url(""), None).await?;
        let result = &response["result"];
        let indexed_fields = result["payload_schema"]
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        Ok(CollectionInfo {
            points_count: result["points_count"].as_u64().unwrap_or(0),
            vector_size: result["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(0) as usize,
            indexed_fields,
            status: result["status"].as_str().unwrap_or("unknown").to_string(),
        })
    }
}
