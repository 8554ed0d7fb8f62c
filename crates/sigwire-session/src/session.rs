//! Session types: configuration, the lifecycle state machine, and the
//! snapshot of what the coordinator has told us.
//!
//! A "session" here is a client's standing with one coordinator. It
//! tracks:
//! - WHERE the coordinator is and WHAT we announce to it
//! - WHICH state the handshake is in (announcing, active, closing)
//! - WHAT the coordinator assigned us (path, display name, client id)
//! - WHETHER we have unsaved changes (the dirty flag and its counter)

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sigwire_protocol::{Capabilities, Capability};
use sigwire_transport::EndpointConfig;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Default command channel size for session actors.
const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Configuration for one session client.
///
/// Sensible defaults are provided; most applications set the names, the
/// capability list and the coordinator URL and leave the rest alone.
/// Durations are stored as milliseconds so the struct reads naturally
/// from JSON or TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// URL of the coordinator, e.g. `osc.udp://host:15000/`. Usually
    /// taken from the `NSM_URL` environment variable.
    pub coordinator_url: Option<String>,

    /// Human-readable application name sent in the announce.
    pub app_name: String,

    /// Executable name sent in the announce. The coordinator uses it to
    /// relaunch us.
    pub exe_name: String,

    /// Our capability list, e.g. `":dirty:message:"`.
    pub capabilities: String,

    /// Where to bind the client's own socket.
    pub endpoint: EndpointConfig,

    /// Upper bound on one wait of the receive loop, in milliseconds.
    /// Also the period of the timeout and ping checks.
    pub poll_interval_ms: u64,

    /// How long to wait for the announce reply before giving up, in
    /// milliseconds.
    pub announce_timeout_ms: u64,

    /// Liveness pings to the coordinator.
    pub ping: PingConfig,

    /// Depth of the actor's command channel.
    pub channel_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            coordinator_url: None,
            app_name: String::new(),
            exe_name: String::new(),
            capabilities: String::new(),
            endpoint: EndpointConfig::default(),
            poll_interval_ms: 100,
            announce_timeout_ms: 5_000,
            ping: PingConfig::default(),
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new(app_name: impl Into<String>, exe_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            exe_name: exe_name.into(),
            ..Self::default()
        }
    }

    /// Builder-style capability list.
    pub fn with_capabilities(mut self, capabilities: impl Into<String>) -> Self {
        self.capabilities = capabilities.into();
        self
    }

    /// Builder-style coordinator URL.
    pub fn with_coordinator(mut self, url: impl Into<String>) -> Self {
        self.coordinator_url = Some(url.into());
        self
    }

    /// Clamps values the actor can't run with.
    pub fn validated(mut self) -> Self {
        if self.poll_interval_ms == 0 {
            tracing::warn!("poll interval of 0ms clamped to 1ms");
            self.poll_interval_ms = 1;
        }
        if self.channel_size == 0 {
            self.channel_size = 1;
        }
        self.ping = self.ping.validated();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn announce_timeout(&self) -> Duration {
        Duration::from_millis(self.announce_timeout_ms)
    }

    /// The parsed capability list.
    pub fn capability_set(&self) -> Capabilities {
        Capabilities::parse(&self.capabilities)
    }
}

/// Settings for the coordinator liveness ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    /// Off by default: not every coordinator answers `/osc/ping`.
    pub enabled: bool,
    /// Time between pings, in milliseconds.
    pub interval_ms: u64,
    /// Unanswered pings tolerated before the session is dropped.
    pub max_missed: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_000,
            max_missed: 3,
        }
    }
}

impl PingConfig {
    pub fn validated(mut self) -> Self {
        self.interval_ms = self.interval_ms.max(1);
        self.max_missed = self.max_missed.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a client is in its handshake with the coordinator.
///
/// ```text
///   Disconnected ──(announce)──→ Announcing ──(reply)──→ Active
///        ↑                           │                     │
///        ├────(error / timeout)──────┘                     │
///        ├──────────────(error / ping loss)────────────────┤
///        │                                                 ▼
///        └──────────────────────────────────────────── Closing
/// ```
///
/// - **Disconnected**: constructed, or the handshake failed, or the
///   coordinator went away. Nothing from the coordinator is acted on.
/// - **Announcing**: the announce is out; waiting for the reply.
/// - **Active**: the coordinator accepted us. Open, save and the rest
///   are dispatched to the hooks.
/// - **Closing**: we are shutting down; incoming commands are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Announcing,
    Active,
    Closing,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Disconnected, Announcing)
                | (Announcing, Active)
                | (Announcing, Disconnected)
                | (Announcing, Closing)
                | (Active, Disconnected)
                | (Active, Closing)
                | (Closing, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Announcing => write!(f, "Announcing"),
            Self::Active => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionInfo
// ---------------------------------------------------------------------------

/// A snapshot of the client's session.
///
/// `active` is true only between an accepted announce reply and the next
/// failure or close, and always agrees with `state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub active: bool,
    /// Whether we have unsaved changes.
    pub dirty: bool,
    /// Number of clean → dirty edges so far. Never decreases.
    pub dirty_count: u64,
    /// The coordinator's name from the announce reply.
    pub manager: String,
    /// The coordinator's capability list from the announce reply.
    pub coordinator_capabilities: String,
    /// Project path from the last successful open.
    pub path: String,
    pub display_name: String,
    pub client_id: String,
    /// Label the coordinator last assigned.
    pub label: String,
}

impl SessionInfo {
    /// Whether the coordinator advertised `cap`.
    pub fn coordinator_has(&self, cap: Capability) -> bool {
        Capabilities::parse(&self.coordinator_capabilities).has(cap)
    }
}
