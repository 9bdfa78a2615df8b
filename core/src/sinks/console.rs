use crate::events::{Event, EventKind};

/// Synchronous one-line summary per event through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn write(&self, event: &Event) {
        log::info!(target: "stem_tracking::events", "{}", describe(event));
    }
}

pub fn describe(event: &Event) -> String {
    let attr = |key: &str| event.attr_str(key).unwrap_or("unknown").to_string();
    match event.kind() {
        EventKind::PageView => format!("page view tracked: {}", event.page()),
        EventKind::ProgramInterest => format!(
            "program interest tracked: {} - {}",
            attr("program_name"),
            attr("action")
        ),
        EventKind::ContactFormSubmit => "contact form submission tracked".to_string(),
        EventKind::FileDownload => format!("download tracked: {}", attr("file_name")),
        EventKind::ExternalLinkClick => format!("external link tracked: {}", attr("url")),
        EventKind::ScrollDepth => format!(
            "scroll depth {}% reached on {}",
            event.attr("percent").and_then(|v| v.as_i64()).unwrap_or(0),
            event.page()
        ),
        EventKind::TimeOnPage => format!(
            "time on page {}s on {}",
            event.attr("duration").and_then(|v| v.as_i64()).unwrap_or(0),
            event.page()
        ),
        EventKind::Canary => "backend canary written".to_string(),
    }
}
