//! Measurement Protocol sinks.
//!
//! The metrics stream and the hosted analytics stream take the same request
//! shape but expect different event names and parameters, so each sink
//! carries a [`PayloadStyle`] that maps an [`Event`] to zero or more
//! protocol events.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{Sink, SinkError};
use crate::events::{engagement_value, Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStyle {
    /// First-party metrics stream (gtag parameter names).
    Metrics,
    /// Hosted analytics SDK (`logEvent` parameter names).
    HostedAnalytics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stream {
    Web { measurement_id: String },
    App { firebase_app_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasuredEvent {
    pub name: String,
    pub params: Map<String, Value>,
}

impl MeasuredEvent {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Map::new(),
        }
    }

    fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

pub struct MeasurementSink {
    client: Client,
    endpoint: String,
    api_secret: String,
    stream: Stream,
    style: PayloadStyle,
}

impl MeasurementSink {
    /// Sink for the page's own metrics property.
    pub fn metrics(
        client: Client,
        endpoint: &str,
        measurement_id: &str,
        api_secret: &str,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_secret: api_secret.to_string(),
            stream: Stream::Web {
                measurement_id: measurement_id.to_string(),
            },
            style: PayloadStyle::Metrics,
        }
    }

    /// Sink for the hosted analytics SDK bound to a Firebase app.
    pub fn hosted_analytics(
        client: Client,
        endpoint: &str,
        firebase_app_id: &str,
        api_secret: &str,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_secret: api_secret.to_string(),
            stream: Stream::App {
                firebase_app_id: firebase_app_id.to_string(),
            },
            style: PayloadStyle::HostedAnalytics,
        }
    }

    fn request_body(&self, event: &Event, events: &[MeasuredEvent]) -> Value {
        let mut body = Map::new();
        let id_field = match self.stream {
            Stream::Web { .. } => "client_id",
            Stream::App { .. } => "app_instance_id",
        };
        body.insert(id_field.into(), Value::from(event.session_id()));
        body.insert(
            "timestamp_micros".into(),
            Value::from((event.client_timestamp().unix_timestamp_nanos() / 1_000) as i64),
        );
        body.insert(
            "events".into(),
            serde_json::to_value(events).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(body)
    }
}

#[async_trait]
impl Sink for MeasurementSink {
    fn name(&self) -> &'static str {
        match self.style {
            PayloadStyle::Metrics => "metrics",
            PayloadStyle::HostedAnalytics => "hosted_analytics",
        }
    }

    async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        let events = match &self.stream {
            Stream::Web { measurement_id } => {
                measured_events(event, self.style, Some(measurement_id))
            }
            Stream::App { .. } => measured_events(event, self.style, None),
        };
        if events.is_empty() {
            return Ok(());
        }

        let (id_param, id_value) = match &self.stream {
            Stream::Web { measurement_id } => ("measurement_id", measurement_id.as_str()),
            Stream::App { firebase_app_id } => ("firebase_app_id", firebase_app_id.as_str()),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[(id_param, id_value), ("api_secret", self.api_secret.as_str())])
            .json(&self.request_body(event, &events))
            .send()
            .await
            .map_err(|err| SinkError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Translate one tracked event into protocol events for the given style.
pub fn measured_events(
    event: &Event,
    style: PayloadStyle,
    measurement_id: Option<&str>,
) -> Vec<MeasuredEvent> {
    match style {
        PayloadStyle::Metrics => metrics_events(event, measurement_id),
        PayloadStyle::HostedAnalytics => hosted_events(event),
    }
}

fn text(event: &Event, key: &str) -> Value {
    event.attr(key).map(|v| v.to_json()).unwrap_or(Value::Null)
}

fn metrics_events(event: &Event, measurement_id: Option<&str>) -> Vec<MeasuredEvent> {
    match event.kind() {
        EventKind::PageView => vec![MeasuredEvent::new("page_view")
            .param("page_title", text(event, "page_title"))
            .param("page_location", text(event, "page_location"))
            .param("page_name", event.page())],
        EventKind::ProgramInterest => {
            let action = event.attr_str("action").unwrap_or("view");
            vec![MeasuredEvent::new("program_interest")
                .param("program_name", text(event, "program_name"))
                .param("engagement_action", action)
                .param("value", engagement_value(action))]
        }
        EventKind::ContactFormSubmit => {
            let label = event
                .attr_str("subject")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("general");
            let mut events = vec![MeasuredEvent::new("contact_form_submit")
                .param("event_category", "engagement")
                .param("event_label", label)
                .param("value", 1)];
            if let Some(id) = measurement_id {
                events.push(
                    MeasuredEvent::new("conversion")
                        .param("send_to", format!("{id}/contact_conversion")),
                );
            }
            events
        }
        EventKind::FileDownload => vec![MeasuredEvent::new("file_download")
            .param("file_name", text(event, "file_name"))
            .param("program_name", text(event, "program_name"))],
        EventKind::ExternalLinkClick => vec![MeasuredEvent::new("click")
            .param("event_category", "outbound")
            .param("event_label", text(event, "url"))
            .param("transport_type", "beacon")],
        EventKind::ScrollDepth => {
            let percent = event.attr("percent").and_then(|v| v.as_i64()).unwrap_or(0);
            vec![MeasuredEvent::new("scroll")
                .param("event_category", "engagement")
                .param("event_label", format!("{percent}%"))
                .param("value", percent)]
        }
        EventKind::TimeOnPage => vec![MeasuredEvent::new("timing_complete")
            .param("name", "time_on_page")
            .param("value", text(event, "duration"))],
        EventKind::Canary => Vec::new(),
    }
}

fn hosted_events(event: &Event) -> Vec<MeasuredEvent> {
    let base = MeasuredEvent::new(event.kind().as_str());
    match event.kind() {
        EventKind::PageView => vec![base
            .param("page_name", event.page())
            .param("page_title", text(event, "page_title"))],
        EventKind::ProgramInterest => vec![base
            .param("program_name", text(event, "program_name"))
            .param("action", text(event, "action"))
            .param("timestamp", event.timestamp_rfc3339())
            .param("page", event.page())],
        EventKind::ContactFormSubmit => vec![base
            .param("form_subject", text(event, "subject"))
            .param("conversion", true)],
        EventKind::FileDownload => vec![base
            .param("file_name", text(event, "file_name"))
            .param("program_name", text(event, "program_name"))
            .param("download_time", event.timestamp_rfc3339())],
        EventKind::ExternalLinkClick => vec![base
            .param("url", text(event, "url"))
            .param("page", event.page())],
        EventKind::ScrollDepth => vec![base
            .param("percent", text(event, "percent"))
            .param("page", event.page())],
        EventKind::TimeOnPage => vec![base
            .param("duration", text(event, "duration"))
            .param("page", event.page())],
        EventKind::Canary => Vec::new(),
    }
}
