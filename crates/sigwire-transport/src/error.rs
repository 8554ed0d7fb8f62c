use std::net::SocketAddr;

use sigwire_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Creating the local socket failed.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a datagram failed. Never retried.
    #[error("send to {addr} failed: {source}")]
    SendFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// A URL or port name couldn't be parsed or resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// No destination was given and no default address is set.
    #[error("no destination and no default address")]
    NoDestination,

    /// The message couldn't be built or encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// The negative byte count a C-style `send` would have returned.
    pub fn code(&self) -> isize {
        match self {
            Self::Bind { .. } => -1,
            Self::SendFailed { .. } => -2,
            Self::ReceiveFailed(_) => -3,
            Self::InvalidUrl(_) => -4,
            Self::NoDestination => -5,
            Self::Protocol(_) => -6,
        }
    }
}
