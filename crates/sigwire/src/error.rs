//! Unified error type for sigwire.

use sigwire_engine::EngineError;
use sigwire_protocol::ProtocolError;
use sigwire_session::SessionError;
use sigwire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `sigwire` crate, you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute
/// on each variant generates the `From` impls, so `?` converts layer
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SigwireError {
    /// Encoding, decoding, or a message that doesn't fit its tag.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Binding, sending, or a bad URL.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A signal or peer operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The session handshake or a report to the coordinator failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SigwireError {
    /// The numeric form of a transport failure, for callers that want the
    /// "negative byte count" convention. `None` for other errors.
    pub fn transport_code(&self) -> Option<isize> {
        match self {
            Self::Transport(e) => Some(e.code()),
            Self::Engine(EngineError::Transport(e)) | Self::Session(SessionError::Transport(e)) => Some(e.code()),
            _ => None,
        }
    }
}
