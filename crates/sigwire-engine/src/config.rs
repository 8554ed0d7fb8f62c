//! Engine configuration and the peer state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sigwire_transport::EndpointConfig;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Default command channel size for engine actors.
const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Our name on the signal network. Local signal paths are namespaced
    /// under it, and it is announced in every hello. An empty name turns
    /// off hello reciprocation.
    pub name: String,

    /// Where to bind and, optionally, the default destination that
    /// relayed values are sent to.
    pub endpoint: EndpointConfig,

    /// Upper bound on one wait of the receive loop, in milliseconds.
    pub poll_interval_ms: u64,

    /// Depth of the actor's command channel.
    pub channel_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoint: EndpointConfig::default(),
            poll_interval_ms: 100,
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Clamps values the actor can't run with: a zero poll interval would
    /// spin, a zero channel can't be created.
    pub fn validated(mut self) -> Self {
        if self.poll_interval_ms == 0 {
            tracing::warn!("poll interval of 0ms clamped to 1ms");
            self.poll_interval_ms = 1;
        }
        if self.channel_size == 0 {
            self.channel_size = 1;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// PeerState
// ---------------------------------------------------------------------------

/// Discovery state of a remote peer.
///
/// ```text
/// Unknown → Scanning → Known
///              ↑         │
///              └─────────┘  (peer changed address: rescan)
/// ```
///
/// - **Unknown**: not yet tracked. Peers never sit in this state; it is
///   the starting point of the first transition.
/// - **Scanning**: a `/signal/list` request is outstanding and each
///   list record adds a remote signal.
/// - **Known**: the end-of-list reply arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Unknown,
    Scanning,
    Known,
}

impl PeerState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Scanning)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Unknown, Self::Scanning) | (Self::Scanning, Self::Known) | (Self::Known, Self::Scanning)
        )
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Known => write!(f, "Known"),
        }
    }
}
