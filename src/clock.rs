// Playback clock adapter: media time updates -> throttled sync ticks.
// Rule: throttle, not debounce. The first update after a quiet period goes out immediately.
// See DESIGN.md: Playback Clock Adapter

use log::warn;

use crate::services::{EventBus, EVENT_CLOCK_TICK};
use crate::types::Tick;

/// 60fps ceiling.
pub const FRAME_INTERVAL_MS: f64 = 16.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ClockAdapter {
    interval_ms: f64,
    last_published_ms: Option<f64>,
}

impl ClockAdapter {
    pub fn new() -> Self {
        Self::with_interval(FRAME_INTERVAL_MS)
    }

    pub fn with_interval(interval_ms: f64) -> Self {
        ClockAdapter {
            interval_ms,
            last_published_ms: None,
        }
    }

    /// Feed one native time update. Returns the tick to publish, if any.
    pub fn on_time_update(&mut self, current_time: f64, paused: bool, now_ms: f64) -> Option<Tick> {
        if paused || !current_time.is_finite() {
            return None;
        }
        if let Some(last) = self.last_published_ms {
            if now_ms - last < self.interval_ms {
                return None;
            }
        }
        self.last_published_ms = Some(now_ms);
        Some(Tick {
            current_time,
            paused,
            timestamp: now_ms,
        })
    }

    /// Feed one update and publish the resulting tick on `bus`.
    pub fn publish(&mut self, bus: &dyn EventBus, current_time: f64, paused: bool, now_ms: f64) -> bool {
        let Some(tick) = self.on_time_update(current_time, paused, now_ms) else {
            return false;
        };
        match serde_json::to_value(tick) {
            Ok(payload) => {
                bus.emit(EVENT_CLOCK_TICK, &payload);
                true
            }
            Err(err) => {
                warn!("dropping clock tick: {}", err);
                false
            }
        }
    }

    /// Forget the last publish time, e.g. after a seek.
    pub fn reset(&mut self) {
        self.last_published_ms = None;
    }
}

impl Default for ClockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{LocalEventBus, SubscribeOptions};
    use crate::testing::ManualClock;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn throttles_to_frame_interval() {
        let mut clock = ClockAdapter::new();
        assert!(clock.on_time_update(1.0, false, 0.0).is_some());
        assert!(clock.on_time_update(1.01, false, 5.0).is_none());
        assert!(clock.on_time_update(1.02, false, 15.9).is_none());
        let tick = clock.on_time_update(1.03, false, 16.0).unwrap();
        assert_eq!(tick.current_time, 1.03);
        assert_eq!(tick.timestamp, 16.0);
    }

    #[test]
    fn first_update_after_quiet_period_fires_immediately() {
        let mut clock = ClockAdapter::new();
        clock.on_time_update(1.0, false, 0.0);
        assert!(clock.on_time_update(9.0, false, 5_000.0).is_some());
    }

    #[test]
    fn paused_source_never_publishes() {
        let mut clock = ClockAdapter::new();
        assert!(clock.on_time_update(1.0, true, 0.0).is_none());
        // A paused update does not consume the throttle window.
        assert!(clock.on_time_update(1.0, false, 1.0).is_some());
    }

    #[test]
    fn publishes_on_bus() {
        let bus = LocalEventBus::new(Rc::new(ManualClock::new(0.0)));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.on(
            EVENT_CLOCK_TICK,
            Box::new(move |v: &Value| sink.borrow_mut().push(v.clone())),
            SubscribeOptions::default(),
        );

        let mut clock = ClockAdapter::new();
        assert!(clock.publish(&bus, 2.5, false, 100.0));
        assert!(!clock.publish(&bus, 2.6, false, 101.0));

        let ticks = seen.borrow();
        assert_eq!(ticks.len(), 1);
        let tick: Tick = serde_json::from_value(ticks[0].clone()).unwrap();
        assert_eq!(tick.current_time, 2.5);
        assert!(!tick.paused);
    }
}
