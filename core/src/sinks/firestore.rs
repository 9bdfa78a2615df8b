//! Firestore REST client for the append-only collections.
//!
//! Documents are created through `documents:commit` with a client-generated
//! id, a `currentDocument.exists = false` precondition and a `REQUEST_TIME`
//! transform filling `server_timestamp`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::store::{Collection, DocumentStore, StoreError};
use crate::config::BackendConfig;

pub const SERVER_TIMESTAMP_FIELD: &str = "server_timestamp";

pub struct FirestoreStore {
    client: Client,
    endpoint: String,
    project_id: String,
    database_id: String,
    api_key: String,
}

impl FirestoreStore {
    pub fn new(client: Client, config: &BackendConfig) -> Self {
        Self {
            client,
            endpoint: config.firestore_endpoint().trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            database_id: config.database_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}",
            self.project_id, self.database_id
        )
    }

    fn commit_url(&self) -> String {
        format!("{}/{}/documents:commit", self.endpoint, self.database_path())
    }

    fn commit_body(&self, collection: Collection, id: &str, document: Map<String, Value>) -> Value {
        let fields: Map<String, Value> = document
            .iter()
            .map(|(key, value)| (key.clone(), to_firestore_value(value)))
            .collect();
        json!({
            "writes": [{
                "update": {
                    "name": format!("{}/documents/{}/{}", self.database_path(), collection, id),
                    "fields": fields,
                },
                "currentDocument": { "exists": false },
                "updateTransforms": [{
                    "fieldPath": SERVER_TIMESTAMP_FIELD,
                    "setToServerValue": "REQUEST_TIME",
                }],
            }]
        })
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn append(
        &self,
        collection: Collection,
        document: Map<String, Value>,
    ) -> Result<String, StoreError> {
        let id = generate_document_id();
        let body = self.commit_body(collection, &id, document);
        let response = self
            .client
            .post(self.commit_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(id);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &text))
    }
}

/// Auto-id in the same 20 character shape Firestore uses.
pub fn generate_document_id() -> String {
    Uuid::new_v4().simple().to_string()[..20].to_string()
}

fn classify_failure(status: StatusCode, body: &str) -> StoreError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| body.trim().to_string());
    let denied = status == StatusCode::FORBIDDEN
        || error
            .and_then(|e| e.get("status"))
            .and_then(|s| s.as_str())
            == Some("PERMISSION_DENIED");
    if denied {
        StoreError::PermissionDenied(message)
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Encode plain JSON as Firestore typed values.
pub fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or_default() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(to_firestore_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_firestore_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}
