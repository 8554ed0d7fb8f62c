//! Coordinator liveness: `/osc/ping` on an interval, `/reply ("/osc/ping")`
//! back.
//!
//! [`PingMonitor`] is pure bookkeeping. The session client asks it what
//! to do at each tick and tells it when a response arrives; the monitor
//! never touches the socket.

use std::time::Duration;

use tokio::time::Instant;

use crate::PingConfig;

/// What the client should do at this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    /// Nothing is due yet.
    Wait,
    /// Send a ping now.
    Send,
    /// Too many pings went unanswered; the coordinator is gone.
    Expired,
}

/// Tracks pings sent and answered.
#[derive(Debug, Clone)]
pub struct PingMonitor {
    interval: Duration,
    max_missed: u32,
    outstanding: u32,
    last_sent: Option<Instant>,
    last_response: Option<Instant>,
}

impl PingMonitor {
    pub fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            interval,
            max_missed: max_missed.max(1),
            outstanding: 0,
            last_sent: None,
            last_response: None,
        }
    }

    pub fn from_config(config: &PingConfig) -> Self {
        Self::new(config.interval(), config.max_missed)
    }

    /// Decides the action for `now` and, for [`PingAction::Send`],
    /// records the ping as sent.
    ///
    /// The first call always sends. A ping counts as missed once the next
    /// one falls due without a response in between.
    pub fn poll(&mut self, now: Instant) -> PingAction {
        if let Some(sent) = self.last_sent {
            if now.saturating_duration_since(sent) < self.interval {
                return PingAction::Wait;
            }
        }
        if self.outstanding >= self.max_missed {
            return PingAction::Expired;
        }
        self.outstanding += 1;
        self.last_sent = Some(now);
        PingAction::Send
    }

    /// Records a response. Returns the time since the last ping went out.
    pub fn record_response(&mut self, now: Instant) -> Option<Duration> {
        self.outstanding = 0;
        self.last_response = Some(now);
        self.last_sent.map(|sent| now.saturating_duration_since(sent))
    }

    /// Unanswered pings.
    pub fn missed(&self) -> u32 {
        self.outstanding
    }

    pub fn last_response(&self) -> Option<Instant> {
        self.last_response
    }

    /// Forgets all history, e.g. after a new announce.
    pub fn reset(&mut self) {
        self.outstanding = 0;
        self.last_sent = None;
        self.last_response = None;
    }
}
