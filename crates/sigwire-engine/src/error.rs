//! Error types for the engine layer.

use sigwire_protocol::ProtocolError;
use sigwire_transport::TransportError;

use crate::{PeerId, SignalId};

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No signal with this id exists (it was removed, or never created).
    #[error("signal {0} not found")]
    SignalNotFound(SignalId),

    /// The operation needs a local signal but the id names a remote one.
    #[error("signal {0} is owned by a peer")]
    NotLocal(SignalId),

    /// Connections are only made from output signals.
    #[error("signal {0} is not an output")]
    NotAnOutput(SignalId),

    /// No peer with this id exists.
    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    /// The engine's command channel is full or closed.
    #[error("engine is unavailable")]
    Unavailable,

    /// An outgoing message didn't fit its tag's signature.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Binding or sending failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
