use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::task::spawn_blocking;

use super::{Sink, SinkError};
use crate::db::DbPool;
use crate::events::Event;
use crate::logging::log_event;

/// Contact details never leave the hosted store; the local log keeps only
/// the shape of the submission.
const REDACTED_KEYS: &[&str] = &["name", "email", "message"];

pub const EVENTS_MODULE: &str = "tracking.events";

/// Keeps a copy of every event in the SQLite diagnostic log.
pub struct LocalLogSink {
    pool: DbPool,
}

impl LocalLogSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn redacted_payload(event: &Event) -> Value {
    let mut attributes = Map::new();
    for (key, value) in event.attributes() {
        if REDACTED_KEYS.contains(&key.as_str()) {
            attributes.insert(key.clone(), Value::from("[redacted]"));
        } else {
            attributes.insert(key.clone(), value.to_json());
        }
    }
    json!({
        "kind": event.kind().as_str(),
        "page": event.page(),
        "session_id": event.session_id(),
        "client_timestamp": event.timestamp_rfc3339(),
        "attributes": attributes,
    })
}

#[async_trait]
impl Sink for LocalLogSink {
    fn name(&self) -> &'static str {
        "local_log"
    }

    async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        let pool = self.pool.clone();
        let kind = event.kind();
        let data = redacted_payload(event);
        spawn_blocking(move || {
            let conn = pool.get().map_err(|e| SinkError::Local(e.to_string()))?;
            log_event(
                &conn,
                "info",
                None,
                EVENTS_MODULE,
                &format!("{kind} recorded"),
                None,
                Some(data),
            )
            .map_err(|e| SinkError::Local(e.to_string()))
        })
        .await
        .map_err(|e| SinkError::Local(e.to_string()))?
    }
}
