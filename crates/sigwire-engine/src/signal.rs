//! Signals: named, directioned float parameters, local or remote.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PeerId;

/// Stable handle of a signal in the engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig-{}", self.0)
    }
}

/// Which way values flow through a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

impl Direction {
    /// Parses the wire form. Anything other than `in` or `out` is
    /// bidirectional.
    pub fn parse(s: &str) -> Self {
        match s {
            "in" => Self::Input,
            "out" => Self::Output,
            _ => Self::Bidirectional,
        }
    }

    /// The wire form. The protocol has no word for bidirectional, so it
    /// goes out as `out`.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Input => "in",
            Self::Output | Self::Bidirectional => "out",
        }
    }
}

/// Parameter limits of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl Limits {
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        Self { min, max, default }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }
}

/// Who owns a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalOwner {
    /// Registered by this engine and routed to us.
    Local,
    /// Discovered on a peer.
    Remote(PeerId),
}

/// What happened to a peer's signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    Created,
    Removed,
    Renamed { old: String },
}

/// Called with each value delivered to a local signal.
pub type ValueHandler = Box<dyn FnMut(f32) + Send>;

/// Called when a peer disconnects from a local input signal.
pub type ConnectionCallback = Box<dyn FnMut(&SignalInfo) + Send>;

/// A snapshot of one signal, handed out by queries and callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    pub id: SignalId,
    pub path: String,
    pub direction: Direction,
    pub limits: Limits,
    pub value: f32,
    pub owner: SignalOwner,
}

impl SignalInfo {
    pub fn is_local(&self) -> bool {
        self.owner == SignalOwner::Local
    }
}

/// Arena entry.
pub(crate) struct Signal {
    pub(crate) id: SignalId,
    pub(crate) path: String,
    pub(crate) direction: Direction,
    pub(crate) limits: Limits,
    pub(crate) value: f32,
    pub(crate) owner: SignalOwner,
    pub(crate) handler: Option<ValueHandler>,
    pub(crate) on_connection: Option<ConnectionCallback>,
}

impl Signal {
    pub(crate) fn new(id: SignalId, path: String, direction: Direction, limits: Limits, owner: SignalOwner) -> Self {
        Self {
            id,
            path,
            direction,
            limits,
            value: limits.default,
            owner,
            handler: None,
            on_connection: None,
        }
    }

    pub(crate) fn is_local(&self) -> bool {
        self.owner == SignalOwner::Local
    }

    /// New limits; the value resets to the new default.
    pub(crate) fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
        self.value = limits.default;
    }

    pub(crate) fn info(&self) -> SignalInfo {
        SignalInfo {
            id: self.id,
            path: self.path.clone(),
            direction: self.direction,
            limits: self.limits,
            value: self.value,
            owner: self.owner,
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("direction", &self.direction)
            .field("value", &self.value)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
