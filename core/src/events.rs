//! Event model shared by every sink.
//!
//! An [`Event`] is built once by the client and never mutated afterwards;
//! sinks only ever see it by shared reference.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    ProgramInterest,
    ContactFormSubmit,
    FileDownload,
    ExternalLinkClick,
    ScrollDepth,
    TimeOnPage,
    Canary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::ProgramInterest => "program_interest",
            Self::ContactFormSubmit => "contact_form_submit",
            Self::FileDownload => "file_download",
            Self::ExternalLinkClick => "external_link_click",
            Self::ScrollDepth => "scroll_depth",
            Self::TimeOnPage => "time_on_page",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar attribute value. Nested structures are not allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u8> for AttrValue {
    fn from(value: u8) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

/// Build an [`Attributes`] map from `key => value` pairs.
#[macro_export]
macro_rules! attrs {
    () => { $crate::events::Attributes::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::events::Attributes::new();
        $( map.insert($key.to_string(), $crate::events::AttrValue::from($value)); )+
        map
    }};
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    kind: EventKind,
    attributes: Attributes,
    page: String,
    #[serde(with = "time::serde::rfc3339")]
    client_timestamp: OffsetDateTime,
    session_id: String,
}

impl Event {
    pub fn new(
        kind: EventKind,
        attributes: Attributes,
        page: impl Into<String>,
        client_timestamp: OffsetDateTime,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            attributes,
            page: page.into(),
            client_timestamp,
            session_id: session_id.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(AttrValue::as_str)
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn client_timestamp(&self) -> OffsetDateTime {
        self.client_timestamp
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn timestamp_rfc3339(&self) -> String {
        self.client_timestamp
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default()
    }

    /// Flat document written to the `analytics_events` collection.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("event_type".into(), Value::from(self.kind.as_str()));
        for (key, value) in &self.attributes {
            doc.insert(key.clone(), value.to_json());
        }
        doc.insert("page".into(), Value::from(self.page.clone()));
        doc.insert("session_id".into(), Value::from(self.session_id.clone()));
        doc.insert("timestamp".into(), Value::from(self.timestamp_rfc3339()));
        doc
    }
}

/// Engagement actions recognised on program and initiative cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramAction {
    View,
    CardClick,
    CardExpand,
    ApplyClick,
    FormSubmit,
    Other(String),
}

impl ProgramAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "view" => Self::View,
            "card_click" => Self::CardClick,
            "card_expand" => Self::CardExpand,
            "apply_click" => Self::ApplyClick,
            "form_submit" => Self::FormSubmit,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::View => "view",
            Self::CardClick => "card_click",
            Self::CardExpand => "card_expand",
            Self::ApplyClick => "apply_click",
            Self::FormSubmit => "form_submit",
            Self::Other(other) => other,
        }
    }

    /// Numeric weight reported in the metrics payload's `value` field.
    pub fn engagement_value(&self) -> i64 {
        match self {
            Self::View => 1,
            Self::CardClick => 2,
            Self::CardExpand => 3,
            Self::ApplyClick => 5,
            Self::FormSubmit => 10,
            Self::Other(_) => 1,
        }
    }
}

pub fn engagement_value(action: &str) -> i64 {
    ProgramAction::parse(action).engagement_value()
}

/// Where the tracker is running: the equivalent of `window.location` plus
/// the few document properties the events need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLocation {
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: String,
}

impl PageLocation {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let host = host.into();
        let path = path.into();
        let href = format!("https://{host}{path}");
        Self {
            host,
            path,
            href,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn page_name(&self) -> String {
        page_name(&self.path)
    }

    /// Development hosts never talk to the hosted backend.
    pub fn is_local(&self) -> bool {
        let host = self.host.trim();
        let bare = match host.strip_prefix('[') {
            Some(rest) => rest.split(']').next().unwrap_or_default(),
            None => host.split(':').next().unwrap_or_default(),
        };
        bare.contains("localhost") || matches!(bare, "127.0.0.1" | "::1")
    }

    pub fn referrer_or_direct(&self) -> String {
        match self.referrer.as_deref() {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => "direct".to_string(),
        }
    }
}

/// Derive the page identifier from a URL path.
pub fn page_name(path: &str) -> String {
    if path == "/" || path.contains("index.html") {
        return "home".to_string();
    }
    if path.contains("stem-initiatives") {
        return "stem-initiatives".to_string();
    }
    let name = path.replacen('/', "", 1).replacen(".html", "", 1);
    if name.is_empty() {
        "home".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn page_name_follows_path_rules() {
        assert_eq!(page_name("/"), "home");
        assert_eq!(page_name("/index.html"), "home");
        assert_eq!(page_name("/site/index.html"), "home");
        assert_eq!(page_name("/stem-initiatives.html"), "stem-initiatives");
        assert_eq!(page_name("/programs"), "programs");
        assert_eq!(page_name("/careers.html"), "careers");
        assert_eq!(page_name(""), "home");
    }

    #[test]
    fn engagement_values_match_action_table() {
        assert_eq!(engagement_value("view"), 1);
        assert_eq!(engagement_value("card_click"), 2);
        assert_eq!(engagement_value("card_expand"), 3);
        assert_eq!(engagement_value("apply_click"), 5);
        assert_eq!(engagement_value("form_submit"), 10);
        assert_eq!(engagement_value("cta_click"), 1);
        assert_eq!(engagement_value(""), 1);
    }

    #[test]
    fn local_hosts_are_detected() {
        assert!(PageLocation::new("localhost:8080", "/").is_local());
        assert!(PageLocation::new("127.0.0.1", "/").is_local());
        assert!(PageLocation::new("[::1]:3000", "/").is_local());
        assert!(!PageLocation::new("stemcareers.example.org", "/").is_local());
    }

    #[test]
    fn document_flattens_attributes_and_context() {
        let event = Event::new(
            EventKind::ProgramInterest,
            attrs! { "program_name" => "Robotics Club", "action" => "card_click" },
            "programs",
            datetime!(2026-03-01 09:00 UTC),
            "session_abc",
        );
        let doc = event.to_document();
        assert_eq!(doc["event_type"], "program_interest");
        assert_eq!(doc["program_name"], "Robotics Club");
        assert_eq!(doc["page"], "programs");
        assert_eq!(doc["session_id"], "session_abc");
        assert_eq!(doc["timestamp"], "2026-03-01T09:00:00Z");
    }

    #[test]
    fn optional_attribute_becomes_null() {
        let map = attrs! { "program_name" => None::<String> };
        assert_eq!(map["program_name"], AttrValue::Null);
    }
}
