//! # sigwire
//!
//! Peer-to-peer control signals and a session-coordinator handshake over
//! OSC/UDP.
//!
//! Processes find each other with a hello, publish named float
//! "signals", connect them across the network, and take part in a
//! session lifecycle (announce → open → save → dirty tracking) run by a
//! coordinator.
//!
//! ## Layers
//!
//! ```text
//! sigwire (this crate): SigwireError, logging, env, prelude
//!     ↕
//! sigwire-engine: peers, signals, translations   sigwire-session: announce, open/save, dirty
//!     ↕                                               ↕
//! sigwire-transport: UDP endpoint, dispatch table, /error and /reply
//!     ↕
//! sigwire-protocol: tags, values, OSC codec, error codes, capabilities
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sigwire::prelude::*;
//!
//! # async fn run() -> Result<(), SigwireError> {
//! sigwire::logging::init();
//!
//! let engine = spawn_engine(EngineConfig::named("mixer"), Box::new(NoHooks)).await?;
//! engine
//!     .add_signal("/gain", Direction::Output, Limits::new(0.0, 1.0, 0.5), None)
//!     .await?;
//! engine.hello("osc.udp://127.0.0.1:9000/").await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub mod env;
pub mod logging;

pub use error::SigwireError;

pub use sigwire_engine as engine;
pub use sigwire_protocol as protocol;
pub use sigwire_session as session;
pub use sigwire_transport as transport;

/// The names most applications need, in one import.
pub mod prelude {
    pub use crate::SigwireError;
    pub use sigwire_engine::{
        Direction, EngineConfig, EngineHandle, EngineHooks, Limits, NoHooks, Peer, PeerState, SignalEvent,
        SignalInfo, spawn_engine,
    };
    pub use sigwire_protocol::{Capabilities, Capability, ErrorCode, Message, Tag, Value};
    pub use sigwire_session::{
        HookFailure, SessionConfig, SessionHandle, SessionHooks, SessionInfo, SessionState, spawn_session,
    };
    pub use sigwire_transport::{DispatchTarget, EndpointConfig};
}
