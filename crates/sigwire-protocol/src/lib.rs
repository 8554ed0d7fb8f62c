//! Wire protocol for sigwire.
//!
//! This crate defines the "language" that peers and session managers
//! speak:
//!
//! - **Tags** ([`Tag`], [`TagSet`]): the closed catalogue of operations,
//!   each mapped to a wire address and argument signature.
//! - **Values** ([`Value`], [`Message`], [`IntoArgs`]): typed arguments
//!   and the message that carries them.
//! - **Codec** ([`Codec`] trait, [`OscCodec`], [`JsonCodec`]): how
//!   messages are converted to/from datagrams.
//! - **Result codes** ([`ErrorCode`]) and **capabilities**
//!   ([`Capabilities`]) used by the session handshake.
//! - **Errors** ([`ProtocolError`]): what can go wrong while building,
//!   encoding or decoding.
//!
//! # Architecture
//!
//! The protocol layer sits below the transport. It doesn't know about
//! sockets, peers or sessions; it only knows how messages look.
//!
//! ```text
//! Transport (datagrams) → Protocol (Message) → Engine / Session
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod caps;
mod codec;
mod error;
mod error_code;
mod message;
mod tag;
mod value;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use caps::{Capabilities, Capability};
pub use codec::{Codec, OscCodec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use error_code::{API_VERSION_MAJOR, API_VERSION_MINOR, ErrorCode};
pub use message::Message;
pub use tag::{
    MessageSpec, NIL, Signature, SignatureQuery, Tag, TagSet, WILDCARD, dirtiness_tag, nullable,
    visibility_tag,
};
pub use value::{IntoArgs, Value, signature_of};
