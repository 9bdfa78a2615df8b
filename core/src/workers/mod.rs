//! Ordered delivery of events to the asynchronous sinks.
//!
//! Record calls enqueue a job and return immediately. Every sink gets its
//! own lane: one queue drained by one task, so each sink observes events in
//! the order the user produced them while a slow sink never holds up the
//! others. A failure is logged and is terminal for that event on that sink
//! only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::db::DbPool;
use crate::events::Event;
use crate::logging::log_event;
use crate::sinks::{Sink, SinkError};

pub const DELIVERY_MODULE: &str = "tracking.delivery";

enum Job {
    Deliver(Arc<Event>),
    Flush(oneshot::Sender<()>),
}

/// Lanes are keyed by sink identity, not name; two sinks may share a name.
type LaneKey = usize;

fn lane_key(sink: &Arc<dyn Sink>) -> LaneKey {
    Arc::as_ptr(sink) as *const () as usize
}

/// Handle to the per-sink delivery lanes. Lanes are spawned on the current
/// tokio runtime the first time a sink is used. Dropping every handle stops
/// the lane tasks once their queues are drained.
#[derive(Clone)]
pub struct DeliveryWorker {
    lanes: Arc<Mutex<HashMap<LaneKey, mpsc::UnboundedSender<Job>>>>,
    diagnostics: Option<DbPool>,
}

impl DeliveryWorker {
    /// Failures are additionally written to `diagnostics` when a pool is
    /// given.
    pub fn new(diagnostics: Option<DbPool>) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            diagnostics,
        }
    }

    pub fn submit(&self, event: Arc<Event>, sinks: Vec<Arc<dyn Sink>>) {
        if sinks.is_empty() {
            return;
        }
        let Ok(mut lanes) = self.lanes.lock() else {
            log::warn!("delivery lanes poisoned; dropping {} event", event.kind());
            return;
        };
        for sink in sinks {
            let key = lane_key(&sink);
            let name = sink.name();
            let lane = match lanes.get(&key) {
                Some(lane) => lane.clone(),
                None => match self.spawn_lane(sink) {
                    Some(lane) => {
                        lanes.insert(key, lane.clone());
                        lane
                    }
                    None => continue,
                },
            };
            if lane.send(Job::Deliver(event.clone())).is_err() {
                log::warn!("{name} lane stopped; dropping {} event", event.kind());
            }
        }
    }

    /// Resolve once everything submitted before this call has been handled
    /// by every sink.
    pub async fn flush(&self) {
        let lanes: Vec<mpsc::UnboundedSender<Job>> = match self.lanes.lock() {
            Ok(lanes) => lanes.values().cloned().collect(),
            Err(_) => return,
        };
        let mut pending = Vec::with_capacity(lanes.len());
        for lane in lanes {
            let (ack, done) = oneshot::channel();
            if lane.send(Job::Flush(ack)).is_ok() {
                pending.push(done);
            }
        }
        for done in pending {
            let _ = done.await;
        }
    }

    fn spawn_lane(&self, sink: Arc<dyn Sink>) -> Option<mpsc::UnboundedSender<Job>> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                log::warn!("no tokio runtime; dropping event for {} sink", sink.name());
                return None;
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_lane(sink, rx, self.diagnostics.clone()));
        Some(tx)
    }
}

async fn run_lane(
    sink: Arc<dyn Sink>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    diagnostics: Option<DbPool>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Deliver(event) => {
                if let Err(err) = sink.deliver(&event).await {
                    log::warn!(
                        "{} sink failed for {} event ({}): {err}",
                        sink.name(),
                        event.kind(),
                        err.code()
                    );
                    if let Some(pool) = &diagnostics {
                        log_delivery_failure(pool, sink.name(), &event, &err);
                    }
                }
            }
            Job::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    log::debug!("{} lane stopped", sink.name());
}

fn log_delivery_failure(pool: &DbPool, sink: &str, event: &Event, error: &SinkError) {
    let pool = pool.clone();
    let code = error.code();
    let data = json!({
        "sink": sink,
        "kind": event.kind().as_str(),
        "page": event.page(),
        "error": error.to_string(),
    });
    tokio::task::spawn_blocking(move || {
        let conn = match pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                log::debug!("diagnostic log unavailable: {err}");
                return;
            }
        };
        if let Err(err) = log_event(
            &conn,
            "warn",
            Some(code),
            DELIVERY_MODULE,
            "sink delivery failed",
            Some("Event dropped for this sink; other sinks unaffected"),
            Some(data),
        ) {
            log::debug!("failed to record delivery failure: {err}");
        }
    });
}
