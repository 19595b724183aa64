//! Per-turn countdown for the local participant

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running { deadline: Instant },
    /// Latched until the forfeit lands or the state it was observed on is
    /// replaced
    Expired,
}

/// What a [`TurnTimer::sync`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerChange {
    Started,
    Cancelled,
    Unchanged,
}

/// Runs only while the local side is active and the game is in play
#[derive(Debug, Clone)]
pub struct TurnTimer {
    limit: Duration,
    state: TimerState,
}

impl TurnTimer {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            state: TimerState::Idle,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn is_expired(&self) -> bool {
        self.state == TimerState::Expired
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TimerState::Running { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Start when the local side becomes active while playing; cancel once it
    /// is not. A running timer keeps its deadline.
    pub fn sync(&mut self, active: bool, playing: bool, now: Instant) -> TimerChange {
        match (self.state, active && playing) {
            (TimerState::Expired, _) => TimerChange::Unchanged,
            (TimerState::Idle, true) => {
                self.state = TimerState::Running {
                    deadline: now + self.limit,
                };
                TimerChange::Started
            }
            (TimerState::Running { .. }, false) => {
                self.state = TimerState::Idle;
                TimerChange::Cancelled
            }
            _ => TimerChange::Unchanged,
        }
    }

    /// Give a running timer a fresh full turn
    pub fn restart(&mut self, now: Instant) {
        if self.is_running() {
            self.state = TimerState::Running {
                deadline: now + self.limit,
            };
        }
    }

    /// Stop without expiring, e.g. when the game ends
    pub fn cancel(&mut self) {
        if self.is_running() {
            self.state = TimerState::Idle;
        }
    }

    /// Clear an expiry latch whose forfeit never committed. The next
    /// [`TurnTimer::sync`] decides whether a fresh turn starts.
    pub fn rearm(&mut self) {
        if self.is_expired() {
            self.state = TimerState::Idle;
        }
    }

    /// Transition to `Expired` once the deadline has passed. Returns true on
    /// the single call that observed the expiry.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.state {
            TimerState::Running { deadline } if now >= deadline => {
                self.state = TimerState::Expired;
                true
            }
            _ => false,
        }
    }

    /// Time left on a running timer
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}
