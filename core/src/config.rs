//! Tracking configuration.
//!
//! The backend section mirrors the Firebase web config object the site
//! embeds (`apiKey`, `projectId`, `appId`, `measurementId`, ...). It is read
//! through a [`ConfigSource`] on every initialization attempt because the
//! page may supply it after the tracker has started.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::TrackingError;

pub const DEFAULT_FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_MEASUREMENT_ENDPOINT: &str = "https://www.google-analytics.com/mp/collect";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub api_key: String,
    pub project_id: String,
    #[serde(default)]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub measurement_id: Option<String>,
    /// Measurement Protocol secret used by the hosted analytics sink.
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_database_id")]
    pub database_id: String,
    #[serde(default)]
    pub firestore_endpoint: Option<String>,
    #[serde(default)]
    pub measurement_endpoint: Option<String>,
}

fn default_database_id() -> String {
    "(default)".to_string()
}

impl BackendConfig {
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            auth_domain: None,
            app_id: None,
            measurement_id: None,
            api_secret: None,
            database_id: default_database_id(),
            firestore_endpoint: None,
            measurement_endpoint: None,
        }
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.api_key.trim().is_empty() {
            return Err(TrackingError::InvalidConfig("apiKey is empty".into()));
        }
        if self.project_id.trim().is_empty() {
            return Err(TrackingError::InvalidConfig("projectId is empty".into()));
        }
        Ok(())
    }

    pub fn firestore_endpoint(&self) -> &str {
        self.firestore_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_FIRESTORE_ENDPOINT)
    }

    pub fn measurement_endpoint(&self) -> &str {
        self.measurement_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_MEASUREMENT_ENDPOINT)
    }
}

/// First-party metrics stream (the page's gtag property).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub measurement_id: String,
    pub api_secret: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl MetricsConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or(DEFAULT_MEASUREMENT_ENDPOINT)
    }
}

/// Bounds on the startup wait for backend configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitPolicy {
    pub max_attempts: u32,
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_secs(1),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Everything the driver reads from its settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingSettings {
    #[serde(default)]
    pub firebase: Option<BackendConfig>,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub init: InitPolicy,
}

impl TrackingSettings {
    /// Missing file yields defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, TrackingError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                TrackingError::InvalidConfig(format!("{}: {err}", path.display()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(TrackingError::InvalidConfig(format!(
                "{}: {err}",
                path.display()
            ))),
        }
    }
}

/// Supplier of the externally provided backend configuration.
pub trait ConfigSource: Send + Sync {
    /// `Ok(None)` means "not provided yet" and is retried.
    fn load(&self) -> Result<Option<BackendConfig>, TrackingError>;
}

impl<F> ConfigSource for F
where
    F: Fn() -> Result<Option<BackendConfig>, TrackingError> + Send + Sync,
{
    fn load(&self) -> Result<Option<BackendConfig>, TrackingError> {
        self()
    }
}

pub struct StaticConfigSource(pub Option<BackendConfig>);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<Option<BackendConfig>, TrackingError> {
        Ok(self.0.clone())
    }
}

/// Re-reads the `firebase` section of a settings file on every attempt.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Option<BackendConfig>, TrackingError> {
        Ok(TrackingSettings::load(&self.path)?.firebase)
    }
}
