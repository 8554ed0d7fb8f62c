//! Error types for the session layer.

use sigwire_protocol::ProtocolError;
use sigwire_transport::TransportError;

use crate::SessionState;

/// Errors that can occur while driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No coordinator URL was configured, so there is nowhere to announce
    /// to or report to.
    #[error("no coordinator address configured")]
    NoCoordinator,

    /// The operation isn't legal in the current state, e.g. announcing
    /// twice.
    #[error("cannot move session from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Every id the format can produce has already been handed out.
    #[error("client id format {0:?} has no unused ids left")]
    ClientIdsExhausted(String),

    /// A controller command name that no coordinator understands.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// The command takes a client, session name or executable and none
    /// was given.
    #[error("command {0:?} needs an argument")]
    MissingArgument(String),

    /// No client in the controller's table has this id or name.
    #[error("no client {0:?} in the session")]
    UnknownClient(String),

    /// The session's command channel is full or closed.
    #[error("session is unavailable")]
    Unavailable,

    /// An outgoing message didn't fit its tag's signature.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Binding or sending failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
