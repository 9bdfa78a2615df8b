//! One page life: routes DOM events to the tracking client and observers.

use serde::{Deserialize, Serialize};

use crate::client::TrackingClient;
use crate::contact::{ContactForm, FieldError, Notice};
use crate::observers::{ScrollDepth, ScrollMetrics, TimeOnPage};

/// A card the click landed inside. `name` is the card heading for program
/// cards and the `data-initiative` value for initiative cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardRef {
    #[serde(default)]
    pub name: Option<String>,
}

impl CardRef {
    fn name_or_unknown(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkRef {
    pub href: String,
    /// The link carries a `download` attribute.
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub program: Option<String>,
}

impl LinkRef {
    fn file_name(&self) -> String {
        let path = self.href.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        path.rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("download")
            .to_string()
    }
}

/// Ancestors of a click target that the router cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickTarget {
    pub program_card: Option<CardRef>,
    pub initiative_card: Option<CardRef>,
    pub apply_button: bool,
    /// Text of the enclosing `.btn`, if any.
    pub button_text: Option<String>,
    pub link: Option<LinkRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickAction {
    ProgramInterest { program: String, action: &'static str },
    ExternalLink(String),
    Download { file_name: String, program: Option<String> },
}

/// Every matching rule fires; a click can produce several actions.
pub fn route_click(target: &ClickTarget) -> Vec<ClickAction> {
    let mut actions = Vec::new();
    if let Some(card) = &target.program_card {
        actions.push(ClickAction::ProgramInterest {
            program: card.name_or_unknown(),
            action: "card_click",
        });
    }
    if let Some(card) = &target.initiative_card {
        actions.push(ClickAction::ProgramInterest {
            program: card.name_or_unknown(),
            action: "card_expand",
        });
    }
    if target.apply_button {
        let program = target
            .initiative_card
            .as_ref()
            .map(CardRef::name_or_unknown)
            .unwrap_or_else(|| "unknown".to_string());
        actions.push(ClickAction::ProgramInterest {
            program,
            action: "apply_click",
        });
    }
    if target
        .button_text
        .as_deref()
        .is_some_and(|text| text.contains("Start"))
    {
        actions.push(ClickAction::ProgramInterest {
            program: "general".to_string(),
            action: "cta_click",
        });
    }
    if let Some(link) = &target.link {
        if link.href.starts_with("http") {
            actions.push(ClickAction::ExternalLink(link.href.clone()));
        }
        if link.download {
            actions.push(ClickAction::Download {
                file_name: link.file_name(),
                program: link.program.clone(),
            });
        }
    }
    actions
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomEvent {
    Click(ClickTarget),
    Scroll(ScrollMetrics),
    AnimationFrame,
    VisibilityChange { visible: bool },
    /// Periodic timer callback.
    Tick,
    Submit(ContactForm),
    Unload,
    /// Resize, keydown and anything else the tracker does not listen to.
    #[serde(other)]
    Ignored,
}

/// One line of a recorded interaction script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Milliseconds since page load.
    #[serde(default)]
    pub at_ms: Option<u64>,
    pub event: DomEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reaction", rename_all = "snake_case")]
pub enum Reaction {
    Handled,
    /// The caller should deliver an `animation_frame` event.
    FrameRequested,
    Notice(Notice),
    InvalidForm { errors: Vec<FieldError> },
    /// The page has unloaded; the event was ignored.
    Closed,
}

pub struct PageSession {
    client: TrackingClient,
    scroll: ScrollDepth,
    timer: TimeOnPage,
    closed: bool,
}

impl PageSession {
    /// Record the page view and start the observers.
    pub fn open(client: TrackingClient) -> Self {
        client.record_page_view();
        let timer = TimeOnPage::start(client.clock().monotonic());
        Self {
            client,
            scroll: ScrollDepth::new(),
            timer,
            closed: false,
        }
    }

    pub fn client(&self) -> &TrackingClient {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn handle(&mut self, event: DomEvent) -> Reaction {
        if self.closed {
            return Reaction::Closed;
        }
        let now = self.client.clock().monotonic();
        match event {
            DomEvent::Click(target) => {
                for action in route_click(&target) {
                    self.apply(action);
                }
                Reaction::Handled
            }
            DomEvent::Scroll(metrics) => {
                if self.scroll.on_scroll(metrics) {
                    Reaction::FrameRequested
                } else {
                    Reaction::Handled
                }
            }
            DomEvent::AnimationFrame => {
                for percent in self.scroll.on_animation_frame() {
                    self.client.record_scroll_checkpoint(percent);
                }
                Reaction::Handled
            }
            DomEvent::VisibilityChange { visible } => {
                self.poll_timer(now);
                self.timer.on_visibility_change(visible, now);
                Reaction::Handled
            }
            DomEvent::Tick => {
                self.poll_timer(now);
                Reaction::Handled
            }
            DomEvent::Submit(form) => match form.validate() {
                Ok(submission) => {
                    let outcome = self.client.record_contact_submission(&submission).await;
                    Reaction::Notice(outcome.notice())
                }
                Err(invalid) => {
                    log::debug!("contact form blocked: {invalid}");
                    Reaction::InvalidForm {
                        errors: invalid.errors,
                    }
                }
            },
            DomEvent::Unload => {
                self.poll_timer(now);
                if let Some(seconds) = self.timer.on_unload(now) {
                    self.client.record_time_on_page(seconds);
                }
                self.closed = true;
                self.client.flush().await;
                Reaction::Handled
            }
            DomEvent::Ignored => Reaction::Handled,
        }
    }

    fn poll_timer(&mut self, now: std::time::Duration) {
        for seconds in self.timer.poll(now) {
            self.client.record_time_on_page(seconds);
        }
    }

    fn apply(&self, action: ClickAction) {
        match action {
            ClickAction::ProgramInterest { program, action } => {
                self.client.record_program_interest(&program, action)
            }
            ClickAction::ExternalLink(url) => self.client.record_external_link_click(&url),
            ClickAction::Download { file_name, program } => {
                self.client.record_download(&file_name, program.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::contact::{ContactField, NoticeLevel};
    use crate::events::{EventKind, PageLocation};
    use crate::workers::tests::CapturingSink;
    use std::sync::Arc;
    use std::time::Duration;
    use time::macros::datetime;

    fn interest(program: &str, action: &'static str) -> ClickAction {
        ClickAction::ProgramInterest {
            program: program.to_string(),
            action,
        }
    }

    fn session() -> (PageSession, Arc<CapturingSink>, Arc<ManualClock>) {
        let sink = Arc::new(CapturingSink::default());
        let clock = Arc::new(ManualClock::new(datetime!(2026-03-01 09:00 UTC)));
        let client = TrackingClient::builder(PageLocation::new("stem.example.org", "/"))
            .clock(clock.clone())
            .metrics_sink(sink.clone())
            .console(false)
            .build();
        (PageSession::open(client), sink, clock)
    }

    #[test]
    fn program_card_click_uses_heading() {
        let target = ClickTarget {
            program_card: Some(CardRef {
                name: Some("Robotics Club".into()),
            }),
            ..Default::default()
        };
        assert_eq!(route_click(&target), vec![interest("Robotics Club", "card_click")]);
    }

    #[test]
    fn apply_button_inside_initiative_fires_both_rules() {
        let target = ClickTarget {
            initiative_card: Some(CardRef {
                name: Some("olympiad".into()),
            }),
            apply_button: true,
            ..Default::default()
        };
        assert_eq!(
            route_click(&target),
            vec![
                interest("olympiad", "card_expand"),
                interest("olympiad", "apply_click")
            ]
        );
    }

    #[test]
    fn unnamed_cards_and_orphan_apply_are_unknown() {
        let target = ClickTarget {
            program_card: Some(CardRef::default()),
            apply_button: true,
            ..Default::default()
        };
        assert_eq!(
            route_click(&target),
            vec![
                interest("unknown", "card_click"),
                interest("unknown", "apply_click")
            ]
        );
    }

    #[test]
    fn only_start_buttons_are_calls_to_action() {
        let start = ClickTarget {
            button_text: Some("Start Exploring".into()),
            ..Default::default()
        };
        let other = ClickTarget {
            button_text: Some("Learn more".into()),
            ..Default::default()
        };
        assert_eq!(route_click(&start), vec![interest("general", "cta_click")]);
        assert!(route_click(&other).is_empty());
    }

    #[test]
    fn links_route_to_external_and_download() {
        let external = ClickTarget {
            link: Some(LinkRef {
                href: "https://nasa.gov/stem".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            route_click(&external),
            vec![ClickAction::ExternalLink("https://nasa.gov/stem".into())]
        );

        let download = ClickTarget {
            link: Some(LinkRef {
                href: "/files/robotics-brochure.pdf?v=2".into(),
                download: true,
                program: Some("Robotics Club".into()),
            }),
            ..Default::default()
        };
        assert_eq!(
            route_click(&download),
            vec![ClickAction::Download {
                file_name: "robotics-brochure.pdf".into(),
                program: Some("Robotics Club".into()),
            }]
        );
    }

    #[test]
    fn script_lines_parse_into_dom_events() {
        let step: ScriptStep = serde_json::from_str(
            r#"{"at_ms": 1200, "event": {"type": "click", "program_card": {"name": "Coding Camp"}}}"#,
        )
        .unwrap();
        assert_eq!(step.at_ms, Some(1200));
        assert!(matches!(step.event, DomEvent::Click(ref t) if t.program_card.is_some()));

        let step: ScriptStep =
            serde_json::from_str(r#"{"event": {"type": "resize"}}"#).unwrap();
        assert_eq!(step.event, DomEvent::Ignored);

        let step: ScriptStep = serde_json::from_str(
            r#"{"event": {"type": "scroll", "scroll_y": 500, "scroll_height": 2000, "viewport_height": 1000}}"#,
        )
        .unwrap();
        assert!(matches!(step.event, DomEvent::Scroll(_)));
    }

    #[tokio::test]
    async fn page_life_produces_ordered_events() {
        let (mut page, sink, clock) = session();
        let scroll = ScrollMetrics {
            scroll_y: 1000.0,
            scroll_height: 2000.0,
            viewport_height: 1000.0,
        };
        assert_eq!(page.handle(DomEvent::Scroll(scroll)).await, Reaction::FrameRequested);
        assert_eq!(page.handle(DomEvent::Scroll(scroll)).await, Reaction::Handled);
        page.handle(DomEvent::AnimationFrame).await;

        clock.advance(Duration::from_secs(31));
        page.handle(DomEvent::Tick).await;
        clock.advance(Duration::from_secs(4));
        page.handle(DomEvent::Unload).await;

        let events = sink.events();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds[0], EventKind::PageView);
        assert_eq!(kinds[1..6], [EventKind::ScrollDepth; 5]);
        assert_eq!(kinds[6..], [EventKind::TimeOnPage, EventKind::TimeOnPage]);
        let durations: Vec<i64> = events[6..]
            .iter()
            .filter_map(|e| e.attr("duration").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(durations, vec![30, 35]);

        assert_eq!(page.handle(DomEvent::Tick).await, Reaction::Closed);
    }

    #[tokio::test]
    async fn hidden_tab_does_not_accumulate_time() {
        let (mut page, sink, clock) = session();
        clock.advance(Duration::from_secs(10));
        page.handle(DomEvent::VisibilityChange { visible: false }).await;
        clock.advance(Duration::from_secs(120));
        page.handle(DomEvent::Tick).await;
        page.handle(DomEvent::VisibilityChange { visible: true }).await;
        clock.advance(Duration::from_secs(5));
        page.handle(DomEvent::Unload).await;

        let times: Vec<i64> = sink
            .events()
            .iter()
            .filter(|e| e.kind() == EventKind::TimeOnPage)
            .filter_map(|e| e.attr("duration").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(times, vec![15]);
    }

    #[tokio::test]
    async fn invalid_form_is_blocked() {
        let (mut page, sink, _) = session();
        let reaction = page
            .handle(DomEvent::Submit(ContactForm {
                name: "Ada".into(),
                email: "not-an-email".into(),
                subject: String::new(),
                message: String::new(),
            }))
            .await;
        let errors = match reaction {
            Reaction::InvalidForm { errors } => errors,
            other => panic!("expected validation errors, got {other:?}"),
        };
        let fields: Vec<ContactField> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec![ContactField::Message, ContactField::Email]);

        page.client().flush().await;
        assert_eq!(sink.kinds(), vec![EventKind::PageView]);
    }

    #[tokio::test]
    async fn valid_form_shows_success_notice() {
        let (mut page, sink, _) = session();
        let reaction = page
            .handle(DomEvent::Submit(ContactForm {
                name: "Ada".into(),
                email: "ada@example.org".into(),
                subject: "Mentoring".into(),
                message: "Hello".into(),
            }))
            .await;
        let notice = match reaction {
            Reaction::Notice(notice) => notice,
            other => panic!("expected a notice, got {other:?}"),
        };
        assert_eq!(notice.level, NoticeLevel::Success);
        page.client().flush().await;
        assert_eq!(
            sink.kinds(),
            vec![EventKind::PageView, EventKind::ContactFormSubmit]
        );
    }
}
