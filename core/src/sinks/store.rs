use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{Sink, SinkError};
use crate::events::Event;

/// Named append-only collections in the hosted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    AnalyticsEvents,
    ContactSubmissions,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyticsEvents => "analytics_events",
            Self::ContactSubmissions => "contact_submissions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("write rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("document could not be encoded: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "BKD-1003",
            Self::Rejected { .. } => "BKD-1002",
            Self::Transport(_) => "BKD-1001",
            Self::Serialization(_) => "BKD-1004",
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Append-only document store. The store assigns the server timestamp; the
/// caller supplies everything else.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the generated document id.
    async fn append(
        &self,
        collection: Collection,
        document: Map<String, Value>,
    ) -> Result<String, StoreError>;
}

/// Writes every event it receives to `analytics_events`.
pub struct StoreSink {
    store: Arc<dyn DocumentStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Sink for StoreSink {
    fn name(&self) -> &'static str {
        "document_store"
    }

    async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        let id = self
            .store
            .append(Collection::AnalyticsEvents, event.to_document())
            .await?;
        log::debug!("stored {} event as {id}", event.kind());
        Ok(())
    }
}
