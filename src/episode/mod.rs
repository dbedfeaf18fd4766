//! EpisodeStateMachine - Recording Hysteresis
//!
//! ## Responsibilities
//!
//! - Decide when a recording episode starts, continues and ends
//! - Debounce momentary detection gaps with an end delay
//!
//! Two states, Idle and Active. The detect loop feeds `observe` once per
//! cycle; the recorder loop calls `tick` on its own cadence so expiry is
//! also noticed while no frames arrive. A debounced end avoids clip
//! fragmentation: a missed cycle followed by renewed evidence before the
//! delay elapses keeps the episode open.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Idle,
    Active,
}

/// Outcome of feeding the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Started,
    Ended,
}

/// Per-session hysteresis state machine
#[derive(Debug)]
pub struct EpisodeStateMachine {
    state: EpisodeState,
    end_delay: Duration,
    started_at: Option<DateTime<Utc>>,
    last_anomaly: Option<DateTime<Utc>>,
}

impl EpisodeStateMachine {
    pub fn new(end_delay: Duration) -> Self {
        Self {
            state: EpisodeState::Idle,
            end_delay,
            started_at: None,
            last_anomaly: None,
        }
    }

    /// Feed one detection cycle's outcome
    pub fn observe(&mut self, anomaly_present: bool, now: DateTime<Utc>) -> Transition {
        if anomaly_present {
            self.last_anomaly = Some(now);
            match self.state {
                EpisodeState::Idle => {
                    self.state = EpisodeState::Active;
                    self.started_at = Some(now);
                    Transition::Started
                }
                EpisodeState::Active => Transition::None,
            }
        } else {
            self.tick(now)
        }
    }

    /// Apply end hysteresis; safe to call from any loop at any cadence
    pub fn tick(&mut self, now: DateTime<Utc>) -> Transition {
        if self.state != EpisodeState::Active {
            return Transition::None;
        }
        let Some(last) = self.last_anomaly else {
            return Transition::None;
        };
        let quiet = (now - last).to_std().unwrap_or(Duration::ZERO);
        if quiet >= self.end_delay {
            self.go_idle();
            Transition::Ended
        } else {
            Transition::None
        }
    }

    /// Force Active -> Idle regardless of the timer (session teardown)
    pub fn force_idle(&mut self) -> Transition {
        if self.state == EpisodeState::Active {
            self.go_idle();
            Transition::Ended
        } else {
            Transition::None
        }
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == EpisodeState::Active
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    fn go_idle(&mut self) {
        self.state = EpisodeState::Idle;
        self.started_at = None;
        self.last_anomaly = None;
    }
}
