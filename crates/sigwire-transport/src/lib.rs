//! Transport layer for sigwire.
//!
//! Owns one UDP endpoint per participant and provides:
//!
//! - [`Endpoint`]: the sending half: URL, default destination, typed
//!   `send` family, `error_send`/`reply_send`, and the dispatch table.
//! - [`Receiver`]: the receiving half, driven by the owner's dispatch
//!   loop: wait for one datagram, drain the rest.
//! - [`Dispatcher`]: address/signature → route table.
//! - [`DispatchTarget`] with [`process_error`] / [`process_reply`]: the
//!   default handling of `/error` and `/reply`.
//! - [`DatagramSink`] and [`MemorySink`]: the seam that lets protocol
//!   logic run without a socket.

mod dispatch;
mod endpoint;
mod error;
mod sink;
mod url;

pub use dispatch::{
    ActiveFlag, DispatchTarget, Dispatcher, Incoming, RouteKey, default_handle_reply, process_error,
    process_reply,
};
pub use endpoint::{Endpoint, EndpointConfig, Receiver};
pub use error::TransportError;
pub use sink::{DatagramSink, MemorySink, SentDatagram};
pub use url::{OscUrl, Protocol, address_matches, port_of};
