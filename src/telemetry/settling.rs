// Settling-time measurement for one channel
//
// Measures "time from the last target change until the position first enters
// the tolerance band". Leaving the band clears the reported time but keeps the
// clock running from the target change; only a new target restarts it.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlingState {
    /// No target seen yet
    Idle,
    /// Clock running, no settling time to report
    Tracking,
    /// Position reached the band; settling time latched
    Settled,
}

#[derive(Debug, Clone)]
pub struct SettlingTracker {
    threshold: f64,
    state: SettlingState,
    target: Option<f64>,
    start: Option<Instant>,
    elapsed: Option<Duration>,
}

impl SettlingTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: SettlingState::Idle,
            target: None,
            start: None,
            elapsed: None,
        }
    }

    /// Feed one `(target, position)` sample taken at `now`. Returns the current
    /// settling time, `None` while unknown.
    pub fn observe(&mut self, target: f64, position: f64, now: Instant) -> Option<Duration> {
        if self.target != Some(target) {
            self.target = Some(target);
            self.start = Some(now);
            self.elapsed = None;
            self.state = SettlingState::Tracking;
        }

        let start = self.start?;

        if (position - target).abs() <= self.threshold {
            if self.elapsed.is_none() {
                self.elapsed = Some(now.saturating_duration_since(start));
                self.state = SettlingState::Settled;
            }
        } else {
            self.elapsed = None;
            self.state = SettlingState::Tracking;
        }

        self.elapsed
    }

    pub fn state(&self) -> SettlingState {
        self.state
    }

    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.start
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}
