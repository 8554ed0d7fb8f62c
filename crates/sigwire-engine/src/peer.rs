//! Remote peers discovered through the hello handshake.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{PeerState, SignalId};

/// Stable handle of a peer in the engine's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// A remote participant.
///
/// Peers are never evicted; they live as long as the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    /// Where we send to. Matched against datagram sources by port.
    pub addr: SocketAddr,
    /// The URL the peer advertised in its hello.
    pub url: String,
    pub state: PeerState,
    /// Signals discovered on this peer, in discovery order.
    pub signals: Vec<SignalId>,
}

impl Peer {
    pub(crate) fn new(id: PeerId, name: String, addr: SocketAddr, url: String) -> Self {
        Self {
            id,
            name,
            addr,
            url,
            state: PeerState::Unknown,
            signals: Vec::new(),
        }
    }

    /// Moves to `target` if the transition is legal. Returns whether it
    /// moved.
    pub(crate) fn transition(&mut self, target: PeerState) -> bool {
        if self.state.can_transition_to(target) {
            tracing::debug!(peer = %self.name, from = %self.state, to = %target, "peer state");
            self.state = target;
            true
        } else {
            false
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state.is_scanning()
    }
}
