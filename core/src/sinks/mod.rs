//! Delivery targets for tracked events.
//!
//! - [`console`] writes a one-line summary through the `log` facade.
//! - [`local`] keeps a redacted copy in the SQLite diagnostic log.
//! - [`measurement`] forwards to the metrics stream and the hosted analytics
//!   stream over the Measurement Protocol.
//! - [`store`] and [`firestore`] append documents to the hosted store.
//!
//! Every sink is called independently; one failing never stops the others.

pub mod console;
pub mod firestore;
pub mod local;
pub mod measurement;
pub mod store;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::Event;

pub use console::ConsoleSink;
pub use firestore::FirestoreStore;
pub use local::LocalLogSink;
pub use measurement::{MeasurementSink, PayloadStyle};
pub use store::{Collection, DocumentStore, StoreError, StoreSink};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("local log unavailable: {0}")]
    Local(String),
}

impl SinkError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "SNK-1001",
            Self::Rejected { .. } => "SNK-1002",
            Self::Store(err) => err.code(),
            Self::Local(_) => "DB-1001",
        }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &Event) -> Result<(), SinkError>;
}
