//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the problem is in the bytes or the
//! argument list, never in networking or in peer bookkeeping.

/// Errors that can occur while building, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a message to JSON failed.
    #[cfg(feature = "json")]
    #[error("json encode failed: {0}")]
    JsonEncode(serde_json::Error),

    /// Parsing a JSON trace failed.
    #[cfg(feature = "json")]
    #[error("json decode failed: {0}")]
    JsonDecode(serde_json::Error),

    /// A message could not be encoded to the binary wire form.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A datagram is not a well-formed message or bundle.
    ///
    /// Common causes: truncation, a missing `,` before the type string,
    /// an unknown type code, or a string without its terminating NUL.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The requested argument index is past the end of the list.
    #[error("argument {index} missing (message has {len})")]
    MissingArg { index: usize, len: usize },

    /// The argument exists but has a different type. Values are never
    /// coerced.
    #[error("argument {index} has type '{found}', expected '{expected}'")]
    ArgType {
        index: usize,
        expected: char,
        found: char,
    },

    /// The arguments don't match the signature registered for a tag.
    #[error("{address} expects signature '{expected}', got '{found}'")]
    SignatureMismatch {
        address: String,
        expected: String,
        found: String,
    },

    /// The tag has no registry entry.
    #[error("tag is not registered")]
    UnknownTag,

    /// A text form (URL, capability list, direction) didn't parse.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
