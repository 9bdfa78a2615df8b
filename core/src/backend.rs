//! Lifecycle of the hosted backend (analytics SDK + document store).
//!
//! Initialization waits for configuration with bounded patience: at most
//! `max_attempts` reads of the [`ConfigSource`], `retry_delay` apart. Once a
//! configuration shows up the connector is tried exactly once. The resulting
//! status is terminal for the lifetime of the connection; nothing reaches the
//! hosted sinks before it is [`BackendStatus::Ready`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{BackendConfig, ConfigSource, InitPolicy, MetricsConfig};
use crate::errors::TrackingError;
use crate::events::Event;
use crate::sinks::{Collection, DocumentStore, FirestoreStore, MeasurementSink, Sink, StoreSink};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Initialization has not finished yet.
    Pending,
    Ready,
    /// Running on a development host; the hosted backend is never contacted.
    Disabled,
    /// No configuration appeared within the allowed attempts.
    ConfigUnavailable { attempts: u32 },
    Failed { code: &'static str, reason: String },
}

impl BackendStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Opaque handle produced by a successful connection.
#[derive(Clone)]
pub struct BackendHandle {
    store: Arc<dyn DocumentStore>,
    events_sink: Arc<dyn Sink>,
    analytics: Option<Arc<dyn Sink>>,
}

impl BackendHandle {
    pub fn new(store: Arc<dyn DocumentStore>, analytics: Option<Arc<dyn Sink>>) -> Self {
        let events_sink: Arc<dyn Sink> = Arc::new(StoreSink::new(store.clone()));
        Self {
            store,
            events_sink,
            analytics,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Sink appending to `analytics_events`.
    pub fn events_sink(&self) -> &Arc<dyn Sink> {
        &self.events_sink
    }

    pub fn analytics(&self) -> Option<&Arc<dyn Sink>> {
        self.analytics.as_ref()
    }
}

#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, config: &BackendConfig) -> Result<BackendHandle, TrackingError>;
}

/// Connects to Firestore over REST and, when the config names an app id and
/// a Measurement Protocol secret, to the hosted analytics stream.
pub struct HttpBackendConnector {
    client: Client,
}

impl HttpBackendConnector {
    pub fn new() -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("STEM-Tracking/0.1")
            .build()
            .map_err(|err| TrackingError::BackendUnreachable(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// First-party metrics sink sharing this connector's HTTP client.
    pub fn metrics_sink(&self, config: &MetricsConfig) -> MeasurementSink {
        MeasurementSink::metrics(
            self.client.clone(),
            config.endpoint(),
            &config.measurement_id,
            &config.api_secret,
        )
    }
}

#[async_trait]
impl BackendConnector for HttpBackendConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<BackendHandle, TrackingError> {
        config.validate()?;
        let store: Arc<dyn DocumentStore> =
            Arc::new(FirestoreStore::new(self.client.clone(), config));
        let analytics: Option<Arc<dyn Sink>> = match (&config.app_id, &config.api_secret) {
            (Some(app_id), Some(secret)) => Some(Arc::new(MeasurementSink::hosted_analytics(
                self.client.clone(),
                config.measurement_endpoint(),
                app_id,
                secret,
            ))),
            _ => {
                log::debug!("hosted analytics disabled: appId or apiSecret not configured");
                None
            }
        };
        Ok(BackendHandle::new(store, analytics))
    }
}

#[derive(Default)]
pub struct BackendConnection {
    handle: OnceLock<BackendHandle>,
    terminal: OnceLock<BackendStatus>,
    started: AtomicBool,
}

impl BackendConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection that never initializes (development hosts).
    pub fn disabled() -> Self {
        let connection = Self::new();
        let _ = connection.terminal.set(BackendStatus::Disabled);
        connection
    }

    pub fn is_ready(&self) -> bool {
        self.handle.get().is_some()
    }

    pub fn handle(&self) -> Option<&BackendHandle> {
        self.handle.get()
    }

    pub fn status(&self) -> BackendStatus {
        if self.is_ready() {
            return BackendStatus::Ready;
        }
        self.terminal
            .get()
            .cloned()
            .unwrap_or(BackendStatus::Pending)
    }

    /// Run the bounded initialization sequence. Only the first call does any
    /// work; later calls report the current status.
    pub async fn initialize(
        &self,
        source: &dyn ConfigSource,
        connector: &dyn BackendConnector,
        policy: InitPolicy,
        canary: Event,
    ) -> BackendStatus {
        if self.status().is_terminal() || self.started.swap(true, Ordering::SeqCst) {
            return self.status();
        }

        let attempts = policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match source.load() {
                Ok(Some(config)) => return self.connect(&config, connector, canary).await,
                Ok(None) => {
                    log::debug!("backend config not available (attempt {attempt}/{attempts})");
                    if attempt < attempts {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
                Err(err) => return self.fail(err),
            }
        }

        log::warn!("backend config never appeared after {attempts} attempts; tracking stays local");
        let _ = self
            .terminal
            .set(BackendStatus::ConfigUnavailable { attempts });
        self.status()
    }

    async fn connect(
        &self,
        config: &BackendConfig,
        connector: &dyn BackendConnector,
        canary: Event,
    ) -> BackendStatus {
        let handle = match connector.connect(config).await {
            Ok(handle) => handle,
            Err(err) => return self.fail(err),
        };
        let store = handle.store().clone();
        let _ = self.handle.set(handle);
        log::info!("tracking backend ready for project {}", config.project_id);

        match store
            .append(Collection::AnalyticsEvents, canary.to_document())
            .await
        {
            Ok(id) => log::debug!("canary write accepted as {id}"),
            Err(err) => log::warn!("canary write failed ({}): {err}", err.code()),
        }
        BackendStatus::Ready
    }

    fn fail(&self, err: TrackingError) -> BackendStatus {
        log::warn!("tracking backend initialization failed ({}): {err}", err.code());
        let _ = self.terminal.set(BackendStatus::Failed {
            code: err.code(),
            reason: err.to_string(),
        });
        self.status()
    }
}
