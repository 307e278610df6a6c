//! Odoo JSON-RPC record source.
//!
//! Speaks the `/jsonrpc` endpoint (`service=common` for authentication,
//! `service=object` + `execute_kw` for data): `search_read`,
//! `search_count`, `fields_get`, and `ir.model` listing. Archived records
//! are excluded unless the active-test context is disabled.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use nexsus_core::error::{NexsusError, Result};

use crate::source::{Domain, RawRecord, RecordSource, SourceField, SourceModel};

pub const SERVICE: &str = "record_source";

#[derive(Debug, Clone)]
pub struct OdooConfig {
    pub url: String,
    pub db: String,
    pub user: String,
    pub password: String,
    pub include_archived: bool,
    pub timeout: Duration,
}

pub struct OdooClient {
    client: Client,
    config: OdooConfig,
    uid: OnceCell<i64>,
}

impl OdooClient {
    pub fn new(config: OdooConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NexsusError::Config(format!("odoo http client: {e}")))?;
        Ok(Self {
            client,
            config,
            uid: OnceCell::new(),
        })
    }

    async fn rpc(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        let url = format!("{}/jsonrpc", self.config.url.trim_end_matches('/'));
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {"service": service, "method": method, "args": args},
            "id": 1,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NexsusError::transient(SERVICE, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(NexsusError::transient(SERVICE, status.to_string()));
        }
        if status.is_client_error() {
            return Err(NexsusError::rejected(SERVICE, status.to_string()));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| NexsusError::transient(SERVICE, format!("bad response body: {e}")))?;
        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            let message = error["data"]["message"]
                .as_str()
                .or_else(|| error["message"].as_str())
                .unwrap_or("unknown odoo error");
            return Err(NexsusError::rejected(SERVICE, message.to_string()));
        }
        Ok(parsed["result"].clone())
    }

    async fn uid(&self) -> Result<i64> {
        self.uid
            .get_or_try_init(|| async {
                let result = self
                    .rpc(
                        "common",
                        "authenticate",
                        json!([
                            self.config.db,
                            self.config.user,
                            self.config.password,
                            {}
                        ]),
                    )
                    .await?;
                let uid = result.as_i64().filter(|uid| *uid > 0).ok_or_else(|| {
                    NexsusError::Config("odoo authentication failed (bad credentials?)".into())
                })?;
                info!(uid, db = %self.config.db, "odoo session authenticated");
                Ok(uid)
            })
            .await
            .copied()
    }

    async fn execute_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> Result<Value> {
        let uid = self.uid().await?;
        self.rpc(
            "object",
            "execute_kw",
            json!([
                self.config.db,
                uid,
                self.config.password,
                model,
                method,
                args,
                kwargs
            ]),
        )
        .await
    }

    fn context(&self) -> Value {
        // active_test=false makes search include archived records.
        json!({"active_test": !self.config.include_archived})
    }

    fn domain_wire(domain: &Domain) -> Value {
        Value::Array(domain.iter().map(|leaf| leaf.to_wire()).collect())
    }
}

#[async_trait]
impl RecordSource for OdooClient {
    async fn fetch(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>> {
        let kwargs = json!({
            "fields": fields,
            "offset": offset,
            "limit": limit,
            "order": "id asc",
            "context": self.context(),
        });
        let result = self
            .execute_kw(model, "search_read", json!([Self::domain_wire(domain)]), kwargs)
            .await?;
        debug!(model, offset, limit, fetched = result.as_array().map_or(0, Vec::len), "search_read");
        Ok(result
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .filter_map(Value::as_object)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, model: &str, domain: &Domain) -> Result<u64> {
        let result = self
            .execute_kw(
                model,
                "search_count",
                json!([Self::domain_wire(domain)]),
                json!({"context": self.context()}),
            )
            .await?;
        Ok(result.as_u64().unwrap_or(0))
    }

    async fn list_models(&self) -> Result<Vec<SourceModel>> {
        let result = self
            .execute_kw(
                "ir.model",
                "search_read",
                json!([[]]),
                json!({"fields": ["id", "model"], "context": self.context()}),
            )
            .await?;
        Ok(result
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| {
                        Some(SourceModel {
                            name: m["model"].as_str()?.to_string(),
                            model_id: m["id"].as_u64()? as u32,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn schema(&self, model: &str) -> Result<Vec<SourceField>> {
        // fields_get carries no numeric ids, so pull ir.model.fields rows.
        let result = self
            .execute_kw(
                "ir.model.fields",
                "search_read",
                json!([[["model", "=", model]]]),
                json!({
                    "fields": ["id", "name", "field_description", "ttype", "store", "relation"],
                    "context": self.context(),
                }),
            )
            .await?;
        let fields: Vec<SourceField> = result
            .as_array()
            .map(|rows| rows.iter().filter_map(parse_field_row).collect())
            .unwrap_or_default();
        if fields.is_empty() {
            return Err(NexsusError::ModelNotFound(model.to_string()));
        }
        Ok(fields)
    }
}

fn parse_field_row(row: &Value) -> Option<SourceField> {
    let obj: &Map<String, Value> = row.as_object()?;
    Some(SourceField {
        field_id: obj.get("id")?.as_u64()?,
        name: obj.get("name")?.as_str()?.to_string(),
        label: obj
            .get("field_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ttype: obj.get("ttype")?.as_str()?.to_string(),
        stored: obj.get("store").and_then(Value::as_bool).unwrap_or(true),
        relation: obj
            .get("relation")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
    })
}
