//! The tracking client: one per page load, passed to every component that
//! reports interactions.
//!
//! Every record method funnels through [`TrackingClient::dispatch`], which
//! stamps the event, logs it synchronously and hands the asynchronous sinks
//! to the delivery worker. Hosted sinks are only included once the backend
//! connection is ready; events produced earlier are not buffered for them.

use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};

use crate::attrs;
use crate::backend::{BackendConnection, BackendConnector, BackendStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigSource, InitPolicy};
use crate::contact::{ContactOutcome, ContactSubmission};
use crate::db::DbPool;
use crate::events::{Attributes, Event, EventKind, PageLocation, ProgramAction};
use crate::session::{MemorySessionStore, Session, SessionStore};
use crate::sinks::{Collection, ConsoleSink, LocalLogSink, Sink};
use crate::workers::DeliveryWorker;

/// Whether an event is also appended to `analytics_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    No,
    AnalyticsEvents,
}

pub struct TrackingClientBuilder {
    location: PageLocation,
    session_store: Option<Arc<dyn SessionStore>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<dyn Sink>>,
    diagnostics: Option<DbPool>,
    console: bool,
}

impl TrackingClientBuilder {
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// First-party metrics sink. Absent means the metrics SDK is not on the
    /// page; only that sink is skipped.
    pub fn metrics_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Keep a redacted copy of every event and every sink failure in the
    /// local diagnostic log.
    pub fn diagnostics(mut self, pool: DbPool) -> Self {
        self.diagnostics = Some(pool);
        self
    }

    pub fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Delivery lanes are spawned lazily on the runtime current at the first
    /// record call; without one, asynchronous sinks are skipped with a warning.
    pub fn build(self) -> TrackingClient {
        let backend = if self.location.is_local() {
            log::info!(
                "running on development host {}; hosted backend disabled",
                self.location.host
            );
            BackendConnection::disabled()
        } else {
            BackendConnection::new()
        };
        let local_log: Option<Arc<dyn Sink>> = self
            .diagnostics
            .clone()
            .map(|pool| Arc::new(LocalLogSink::new(pool)) as Arc<dyn Sink>);
        let page = self.location.page_name();
        TrackingClient {
            inner: Arc::new(Inner {
                page,
                location: self.location,
                session_store: self
                    .session_store
                    .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
                session: OnceLock::new(),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                backend,
                console: self.console.then_some(ConsoleSink),
                metrics: self.metrics,
                local_log,
                worker: DeliveryWorker::new(self.diagnostics),
            }),
        }
    }
}

struct Inner {
    location: PageLocation,
    page: String,
    session_store: Arc<dyn SessionStore>,
    session: OnceLock<Session>,
    clock: Arc<dyn Clock>,
    backend: BackendConnection,
    console: Option<ConsoleSink>,
    metrics: Option<Arc<dyn Sink>>,
    local_log: Option<Arc<dyn Sink>>,
    worker: DeliveryWorker,
}

#[derive(Clone)]
pub struct TrackingClient {
    inner: Arc<Inner>,
}

impl TrackingClient {
    pub fn builder(location: PageLocation) -> TrackingClientBuilder {
        TrackingClientBuilder {
            location,
            session_store: None,
            clock: None,
            metrics: None,
            diagnostics: None,
            console: true,
        }
    }

    pub fn location(&self) -> &PageLocation {
        &self.inner.location
    }

    /// Derived page identifier carried by every event.
    pub fn page(&self) -> &str {
        &self.inner.page
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn backend_status(&self) -> BackendStatus {
        self.inner.backend.status()
    }

    /// Session token, created on first use.
    pub fn session_id(&self) -> &str {
        &self
            .inner
            .session
            .get_or_init(|| {
                Session::resolve(self.inner.session_store.as_ref()).unwrap_or_else(|err| {
                    log::warn!("session storage unavailable ({}): {err}", err.code());
                    Session::ephemeral()
                })
            })
            .session_id
    }

    /// Connect the hosted backend with bounded patience. See
    /// [`BackendConnection::initialize`].
    pub async fn initialize(
        &self,
        source: &dyn ConfigSource,
        connector: &dyn BackendConnector,
        policy: InitPolicy,
    ) -> BackendStatus {
        let canary = self.build_event(
            EventKind::Canary,
            attrs! { "purpose" => "permission_check" },
        );
        self.inner
            .backend
            .initialize(source, connector, policy, canary)
            .await
    }

    pub fn record_page_view(&self) {
        let location = &self.inner.location;
        self.dispatch(
            EventKind::PageView,
            attrs! {
                "page_title" => location.title.as_str(),
                "page_location" => location.href.as_str(),
            },
            Persist::No,
        );
    }

    pub fn record_program_interest(&self, program_name: &str, action: &str) {
        let action = ProgramAction::parse(action);
        self.dispatch(
            EventKind::ProgramInterest,
            attrs! {
                "program_name" => program_name,
                "action" => action.as_str(),
            },
            Persist::AnalyticsEvents,
        );
    }

    pub fn record_download(&self, file_name: &str, program_name: Option<&str>) {
        self.dispatch(
            EventKind::FileDownload,
            attrs! {
                "file_name" => file_name,
                "program_name" => program_name,
            },
            Persist::No,
        );
    }

    pub fn record_external_link_click(&self, url: &str) {
        self.dispatch(
            EventKind::ExternalLinkClick,
            attrs! { "url" => url },
            Persist::No,
        );
    }

    /// Emit one scroll checkpoint crossed by the page's scroll observer.
    pub fn record_scroll_checkpoint(&self, percent: u8) {
        self.dispatch(
            EventKind::ScrollDepth,
            attrs! { "percent" => percent },
            Persist::No,
        );
    }

    /// Emit a time-on-page reading in whole seconds of visible time.
    pub fn record_time_on_page(&self, seconds: u64) {
        self.dispatch(
            EventKind::TimeOnPage,
            attrs! { "duration" => seconds },
            Persist::No,
        );
    }

    /// Record a validated contact submission. Metrics sinks get the
    /// conversion event; the full submission goes to `contact_submissions`
    /// when the backend is ready. Never fails: a rejected write degrades to
    /// [`ContactOutcome::LocalOnly`].
    pub async fn record_contact_submission(&self, submission: &ContactSubmission) -> ContactOutcome {
        let event = self.dispatch(
            EventKind::ContactFormSubmit,
            attrs! {
                "name" => submission.name(),
                "email" => submission.email(),
                "subject" => submission.subject(),
                "message" => submission.message(),
                "conversion" => true,
            },
            Persist::No,
        );

        let Some(handle) = self.inner.backend.handle() else {
            log::debug!("backend not ready; contact submission kept to metrics sinks");
            return ContactOutcome::Accepted { document_id: None };
        };

        let document = self.contact_document(submission, &event);
        match handle
            .store()
            .append(Collection::ContactSubmissions, document)
            .await
        {
            Ok(id) => {
                log::info!("contact submission stored as {id}");
                ContactOutcome::Accepted {
                    document_id: Some(id),
                }
            }
            Err(err) => {
                log::warn!("contact submission not stored ({}): {err}", err.code());
                ContactOutcome::LocalOnly {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Wait for every queued delivery to finish.
    pub async fn flush(&self) {
        self.inner.worker.flush().await;
    }

    fn contact_document(&self, submission: &ContactSubmission, event: &Event) -> Map<String, Value> {
        let location = &self.inner.location;
        let mut doc = Map::new();
        doc.insert("name".into(), Value::from(submission.name()));
        doc.insert("email".into(), Value::from(submission.email()));
        doc.insert("subject".into(), Value::from(submission.subject()));
        doc.insert("message".into(), Value::from(submission.message()));
        doc.insert("timestamp".into(), Value::from(event.timestamp_rfc3339()));
        doc.insert("page".into(), Value::from(event.page()));
        doc.insert("session_id".into(), Value::from(event.session_id()));
        doc.insert("user_agent".into(), Value::from(location.user_agent.as_str()));
        doc.insert("referrer".into(), Value::from(location.referrer_or_direct()));
        doc
    }

    fn build_event(&self, kind: EventKind, attributes: Attributes) -> Event {
        Event::new(
            kind,
            attributes,
            self.inner.page.clone(),
            self.inner.clock.now_utc(),
            self.session_id(),
        )
    }

    fn dispatch(&self, kind: EventKind, attributes: Attributes, persist: Persist) -> Arc<Event> {
        let event = Arc::new(self.build_event(kind, attributes));
        if let Some(console) = &self.inner.console {
            console.write(&event);
        }

        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        if let Some(local) = &self.inner.local_log {
            sinks.push(local.clone());
        }
        if let Some(metrics) = &self.inner.metrics {
            sinks.push(metrics.clone());
        }
        match self.inner.backend.handle() {
            Some(handle) => {
                if let Some(analytics) = handle.analytics() {
                    sinks.push(analytics.clone());
                }
                if persist == Persist::AnalyticsEvents {
                    sinks.push(handle.events_sink().clone());
                }
            }
            None => log::debug!("backend not ready; {kind} event skips hosted sinks"),
        }

        self.inner.worker.submit(event.clone(), sinks);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::{FixedConnector, RecordingStore};
    use crate::clock::ManualClock;
    use crate::config::{BackendConfig, StaticConfigSource};
    use crate::contact::ContactForm;
    use crate::events::AttrValue;
    use crate::workers::tests::CapturingSink;
    use std::time::Duration;
    use time::macros::datetime;

    struct Harness {
        client: TrackingClient,
        metrics: Arc<CapturingSink>,
        analytics: Arc<CapturingSink>,
        store: Arc<RecordingStore>,
        connector: FixedConnector,
    }

    fn harness_with_store(path: &str, store: RecordingStore) -> Harness {
        let metrics = Arc::new(CapturingSink::default());
        let analytics = Arc::new(CapturingSink::default());
        let store = Arc::new(store);
        let client = TrackingClient::builder(
            PageLocation::new("stemcareers.example.org", path).with_title("Programs"),
        )
        .clock(Arc::new(ManualClock::new(datetime!(2026-03-01 09:00 UTC))))
        .metrics_sink(metrics.clone())
        .console(false)
        .build();
        let connector = FixedConnector {
            store: store.clone(),
            analytics: Some(analytics.clone() as Arc<dyn Sink>),
        };
        Harness {
            client,
            metrics,
            analytics,
            store,
            connector,
        }
    }

    fn harness(path: &str) -> Harness {
        harness_with_store(path, RecordingStore::default())
    }

    async fn connect(h: &Harness) {
        let source = StaticConfigSource(Some(BackendConfig::new("k", "p")));
        let status = h
            .client
            .initialize(&source, &h.connector, InitPolicy::default())
            .await;
        assert_eq!(status, BackendStatus::Ready);
    }

    #[tokio::test]
    async fn program_interest_reaches_metrics_and_store_identically() {
        let h = harness("/programs");
        connect(&h).await;

        h.client.record_program_interest("Robotics Club", "card_click");
        h.client.flush().await;

        let seen = h.metrics.events();
        assert_eq!(seen.len(), 1);
        let event = &seen[0];
        assert_eq!(event.kind(), EventKind::ProgramInterest);
        assert_eq!(event.page(), "programs");
        assert_eq!(event.attr_str("program_name"), Some("Robotics Club"));
        assert_eq!(event.attr_str("action"), Some("card_click"));
        assert_eq!(event.session_id(), h.client.session_id());
        assert_eq!(h.analytics.events(), seen);

        let writes = h.store.writes.lock().unwrap();
        // canary + the event
        assert_eq!(writes.len(), 2);
        let doc = &writes[1].1;
        assert_eq!(doc["event_type"], "program_interest");
        assert_eq!(doc["program_name"], "Robotics Club");
        assert_eq!(doc["session_id"], Value::from(h.client.session_id()));
    }

    #[tokio::test]
    async fn events_before_ready_skip_hosted_sinks() {
        let h = harness("/programs");
        h.client.record_program_interest("Coding Camp", "view");
        h.client.flush().await;
        assert_eq!(h.metrics.kinds(), vec![EventKind::ProgramInterest]);

        connect(&h).await;
        h.client.flush().await;
        assert!(h.analytics.events().is_empty());
        assert_eq!(h.store.collections(), vec![Collection::AnalyticsEvents]);
        let writes = h.store.writes.lock().unwrap();
        assert_eq!(writes[0].1["event_type"], "canary");
    }

    #[tokio::test]
    async fn downloads_and_links_are_not_persisted() {
        let h = harness("/stem-initiatives.html");
        connect(&h).await;
        h.client.record_download("brochure.pdf", Some("Robotics Club"));
        h.client.record_external_link_click("https://nasa.gov");
        h.client.record_page_view();
        h.client.flush().await;

        assert_eq!(
            h.metrics.kinds(),
            vec![
                EventKind::FileDownload,
                EventKind::ExternalLinkClick,
                EventKind::PageView
            ]
        );
        assert_eq!(h.store.writes.lock().unwrap().len(), 1);
        let first = &h.metrics.events()[0];
        assert_eq!(first.page(), "stem-initiatives");
        assert_eq!(
            first.attr("program_name"),
            Some(&AttrValue::Text("Robotics Club".into()))
        );
    }

    #[tokio::test]
    async fn contact_submission_without_backend_is_accepted() {
        let h = harness("/");
        let submission = ContactForm {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            subject: "Mentoring".into(),
            message: "Hello".into(),
        }
        .validate()
        .unwrap();

        let outcome = h.client.record_contact_submission(&submission).await;
        assert_eq!(outcome, ContactOutcome::Accepted { document_id: None });
        h.client.flush().await;
        assert_eq!(h.metrics.kinds(), vec![EventKind::ContactFormSubmit]);
    }

    #[tokio::test]
    async fn contact_submission_is_stored_separately() {
        let h = harness("/");
        connect(&h).await;
        let submission = ContactForm {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            subject: String::new(),
            message: "Hello".into(),
        }
        .validate()
        .unwrap();

        let outcome = h.client.record_contact_submission(&submission).await;
        assert!(matches!(outcome, ContactOutcome::Accepted { document_id: Some(_) }));
        assert_eq!(
            h.store.collections(),
            vec![Collection::AnalyticsEvents, Collection::ContactSubmissions]
        );
        let writes = h.store.writes.lock().unwrap();
        let doc = &writes[1].1;
        assert_eq!(doc["email"], "ada@example.org");
        assert_eq!(doc["referrer"], "direct");
        assert_eq!(doc["page"], "home");
    }

    #[tokio::test]
    async fn denied_store_write_leaves_metrics_delivery_intact() {
        let h = harness_with_store("/", RecordingStore::denying());
        connect(&h).await;
        let submission = ContactForm {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            subject: "Visit".into(),
            message: "Hello".into(),
        }
        .validate()
        .unwrap();

        let outcome = h.client.record_contact_submission(&submission).await;
        assert!(matches!(outcome, ContactOutcome::LocalOnly { .. }));
        assert_eq!(outcome.notice().message, "Message recorded locally. Thank you for your interest!");

        h.client.record_program_interest("Robotics Club", "apply_click");
        h.client.flush().await;
        assert_eq!(
            h.metrics.kinds(),
            vec![EventKind::ContactFormSubmit, EventKind::ProgramInterest]
        );
        assert_eq!(h.analytics.kinds().len(), 2);
    }

    #[tokio::test]
    async fn session_is_shared_across_record_calls_and_pages() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let metrics = Arc::new(CapturingSink::default());
        let home = TrackingClient::builder(PageLocation::new("stem.example.org", "/"))
            .session_store(store.clone())
            .metrics_sink(metrics.clone())
            .console(false)
            .build();
        let programs = TrackingClient::builder(PageLocation::new("stem.example.org", "/programs"))
            .session_store(store.clone())
            .metrics_sink(metrics.clone())
            .console(false)
            .build();

        home.record_page_view();
        home.record_scroll_checkpoint(25);
        programs.record_page_view();
        home.flush().await;
        programs.flush().await;

        let ids: Vec<String> = metrics
            .events()
            .iter()
            .map(|e| e.session_id().to_string())
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id == &ids[0]));

        store.clear().unwrap();
        let fresh = TrackingClient::builder(PageLocation::new("stem.example.org", "/"))
            .session_store(store)
            .console(false)
            .build();
        assert_ne!(fresh.session_id(), ids[0]);
    }

    #[test]
    fn client_built_outside_a_runtime_still_records() {
        let metrics = Arc::new(CapturingSink::default());
        let client = TrackingClient::builder(PageLocation::new("stem.example.org", "/"))
            .metrics_sink(metrics.clone())
            .console(false)
            .build();
        client.record_page_view();
        assert!(client.session_id().starts_with("session_"));
        assert!(metrics.events().is_empty());
    }

    #[tokio::test]
    async fn local_host_never_connects() {
        let metrics = Arc::new(CapturingSink::default());
        let client = TrackingClient::builder(PageLocation::new("localhost:8000", "/"))
            .metrics_sink(metrics.clone())
            .console(false)
            .build();
        let store = Arc::new(RecordingStore::default());
        let connector = FixedConnector { store: store.clone(), analytics: None };
        let source = StaticConfigSource(Some(BackendConfig::new("k", "p")));
        let status = client
            .initialize(&source, &connector, InitPolicy::default())
            .await;
        assert_eq!(status, BackendStatus::Disabled);
        client.record_program_interest("Robotics Club", "view");
        client.flush().await;
        assert_eq!(metrics.kinds(), vec![EventKind::ProgramInterest]);
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_are_stamped_with_the_client_clock() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-03-01 09:00 UTC)));
        let metrics = Arc::new(CapturingSink::default());
        let client = TrackingClient::builder(PageLocation::new("stem.example.org", "/"))
            .clock(clock.clone())
            .metrics_sink(metrics.clone())
            .console(false)
            .build();
        clock.advance(Duration::from_secs(45));
        client.record_time_on_page(45);
        client.flush().await;
        let event = &metrics.events()[0];
        assert_eq!(event.client_timestamp(), datetime!(2026-03-01 09:00:45 UTC));
        assert_eq!(event.attr("duration").and_then(|v| v.as_i64()), Some(45));
    }

    #[tokio::test]
    async fn diagnostics_keep_a_local_copy() {
        let pool = crate::db::open_in_memory().unwrap();
        let client = TrackingClient::builder(PageLocation::new("stem.example.org", "/"))
            .diagnostics(pool.clone())
            .console(false)
            .build();
        client.record_page_view();
        client.flush().await;
        let conn = pool.get().unwrap();
        let rows = crate::logging::recent_events(&conn, Some(crate::sinks::local::EVENTS_MODULE), 5)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "page_view recorded");
    }
}
