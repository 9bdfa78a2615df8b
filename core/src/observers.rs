//! Continuous engagement observers: scroll depth and time on page.
//!
//! Both are plain state machines fed by the page session; they decide *when*
//! an event is due and leave building it to the client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const SCROLL_CHECKPOINTS: [u8; 5] = [25, 50, 75, 90, 100];

/// Raw scroll geometry captured by a scroll callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_y: f64,
    pub scroll_height: f64,
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// Rounded scroll percentage, or `None` when the page cannot scroll.
    pub fn percent(&self) -> Option<i64> {
        let scrollable = self.scroll_height - self.viewport_height;
        if scrollable <= 0.0 || !scrollable.is_finite() || !self.scroll_y.is_finite() {
            return None;
        }
        Some(((self.scroll_y / scrollable) * 100.0).round() as i64)
    }
}

/// Fires each checkpoint at most once per page life. Scroll callbacks only
/// record the latest geometry; evaluation happens once per animation frame.
#[derive(Debug, Default)]
pub struct ScrollDepth {
    max_percent: i64,
    fired: [bool; SCROLL_CHECKPOINTS.len()],
    latest: Option<ScrollMetrics>,
    frame_pending: bool,
}

impl ScrollDepth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the caller must request an animation frame.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> bool {
        self.latest = Some(metrics);
        if self.frame_pending {
            return false;
        }
        self.frame_pending = true;
        true
    }

    /// Evaluate the coalesced geometry; returns checkpoints crossed for the
    /// first time, ascending.
    pub fn on_animation_frame(&mut self) -> Vec<u8> {
        self.frame_pending = false;
        match self.latest.take() {
            Some(metrics) => self.evaluate(metrics),
            None => Vec::new(),
        }
    }

    fn evaluate(&mut self, metrics: ScrollMetrics) -> Vec<u8> {
        let Some(percent) = metrics.percent() else {
            return Vec::new();
        };
        if percent <= self.max_percent {
            return Vec::new();
        }
        self.max_percent = percent;

        let mut crossed = Vec::new();
        for (idx, checkpoint) in SCROLL_CHECKPOINTS.iter().enumerate() {
            if percent >= i64::from(*checkpoint) && !self.fired[idx] {
                self.fired[idx] = true;
                crossed.push(*checkpoint);
            }
        }
        crossed
    }

    pub fn fired(&self) -> Vec<u8> {
        SCROLL_CHECKPOINTS
            .iter()
            .zip(self.fired.iter())
            .filter_map(|(cp, fired)| fired.then_some(*cp))
            .collect()
    }
}

pub const FIRST_TIME_MARK: Duration = Duration::from_secs(30);
pub const TIME_MARK_INTERVAL: Duration = Duration::from_secs(60);

/// Accumulates visible time from a monotonic clock reading.
///
/// Marks fire at 30 s of visible time and then every 60 s after that
/// (90 s, 150 s, ...). Unload reports the elapsed time once, whatever it is.
#[derive(Debug)]
pub struct TimeOnPage {
    accumulated: Duration,
    visible_since: Option<Duration>,
    next_mark: Duration,
    unloaded: bool,
}

impl TimeOnPage {
    /// Start counting at `now` with the page visible.
    pub fn start(now: Duration) -> Self {
        Self {
            accumulated: Duration::ZERO,
            visible_since: Some(now),
            next_mark: FIRST_TIME_MARK,
            unloaded: false,
        }
    }

    pub fn visible_time(&self, now: Duration) -> Duration {
        match self.visible_since {
            Some(since) => self.accumulated + now.saturating_sub(since),
            None => self.accumulated,
        }
    }

    pub fn on_visibility_change(&mut self, visible: bool, now: Duration) {
        match (visible, self.visible_since) {
            (true, None) => self.visible_since = Some(now),
            (false, Some(since)) => {
                self.accumulated += now.saturating_sub(since);
                self.visible_since = None;
            }
            _ => {}
        }
    }

    /// Marks reached since the last poll, in whole seconds.
    pub fn poll(&mut self, now: Duration) -> Vec<u64> {
        if self.unloaded {
            return Vec::new();
        }
        let visible = self.visible_time(now);
        let mut due = Vec::new();
        while visible >= self.next_mark {
            due.push(self.next_mark.as_secs());
            self.next_mark += TIME_MARK_INTERVAL;
        }
        due
    }

    /// Final reading on unload; `None` if already reported.
    pub fn on_unload(&mut self, now: Duration) -> Option<u64> {
        if self.unloaded {
            return None;
        }
        self.unloaded = true;
        Some(self.visible_time(now).as_secs_f64().round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(scroll_y: f64) -> ScrollMetrics {
        ScrollMetrics {
            scroll_y,
            scroll_height: 2000.0,
            viewport_height: 1000.0,
        }
    }

    fn scroll_to(depth: &mut ScrollDepth, scroll_y: f64) -> Vec<u8> {
        depth.on_scroll(at(scroll_y));
        depth.on_animation_frame()
    }

    #[test]
    fn each_checkpoint_fires_once_for_monotonic_scrolling() {
        let mut depth = ScrollDepth::new();
        let mut all = Vec::new();
        for y in (0..=1000).step_by(7).chain([1000]) {
            all.extend(scroll_to(&mut depth, y as f64));
        }
        assert_eq!(all, SCROLL_CHECKPOINTS.to_vec());
    }

    #[test]
    fn jump_fires_every_crossed_checkpoint_in_order() {
        let mut depth = ScrollDepth::new();
        assert_eq!(scroll_to(&mut depth, 800.0), vec![25, 50, 75]);
        assert_eq!(scroll_to(&mut depth, 1000.0), vec![90, 100]);
    }

    #[test]
    fn scrolling_back_up_never_refires() {
        let mut depth = ScrollDepth::new();
        assert_eq!(scroll_to(&mut depth, 500.0), vec![25, 50]);
        assert!(scroll_to(&mut depth, 100.0).is_empty());
        assert!(scroll_to(&mut depth, 500.0).is_empty());
        assert_eq!(scroll_to(&mut depth, 760.0), vec![75]);
        assert_eq!(depth.fired(), vec![25, 50, 75]);
    }

    #[test]
    fn scroll_events_are_coalesced_per_frame() {
        let mut depth = ScrollDepth::new();
        assert!(depth.on_scroll(at(100.0)));
        assert!(!depth.on_scroll(at(300.0)));
        assert!(!depth.on_scroll(at(600.0)));
        // Only the latest geometry is evaluated.
        assert_eq!(depth.on_animation_frame(), vec![25, 50]);
        assert!(depth.on_animation_frame().is_empty());
        assert!(depth.on_scroll(at(700.0)));
    }

    #[test]
    fn non_scrollable_page_never_fires() {
        let mut depth = ScrollDepth::new();
        depth.on_scroll(ScrollMetrics {
            scroll_y: 0.0,
            scroll_height: 800.0,
            viewport_height: 800.0,
        });
        assert!(depth.on_animation_frame().is_empty());
    }

    #[test]
    fn time_marks_at_thirty_then_every_minute() {
        let mut timer = TimeOnPage::start(Duration::ZERO);
        let mut fired = Vec::new();
        for second in 0..=200 {
            fired.extend(timer.poll(Duration::from_secs(second)));
        }
        assert_eq!(fired, vec![30, 90, 150]);
    }

    #[test]
    fn thirty_second_mark_fires_exactly_once() {
        let mut timer = TimeOnPage::start(Duration::ZERO);
        assert_eq!(timer.poll(Duration::from_secs(30)), vec![30]);
        assert!(timer.poll(Duration::from_secs(31)).is_empty());
        assert!(timer.poll(Duration::from_secs(89)).is_empty());
        assert_eq!(timer.poll(Duration::from_secs(90)), vec![90]);
    }

    #[test]
    fn hidden_time_is_not_counted() {
        let mut timer = TimeOnPage::start(Duration::ZERO);
        timer.on_visibility_change(false, Duration::from_secs(20));
        assert!(timer.poll(Duration::from_secs(100)).is_empty());
        timer.on_visibility_change(true, Duration::from_secs(100));
        assert!(timer.poll(Duration::from_secs(109)).is_empty());
        assert_eq!(timer.poll(Duration::from_secs(110)), vec![30]);
    }

    #[test]
    fn unload_reports_short_visits_once() {
        let mut timer = TimeOnPage::start(Duration::ZERO);
        assert_eq!(timer.on_unload(Duration::from_secs(12)), Some(12));
        assert_eq!(timer.on_unload(Duration::from_secs(40)), None);
        assert!(timer.poll(Duration::from_secs(40)).is_empty());
    }
}
