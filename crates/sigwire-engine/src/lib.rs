//! Peer discovery, signals, translations and relay for sigwire.
//!
//! An engine owns one endpoint and speaks the `/signal/*` protocol on it:
//! it finds peers through the hello handshake, lists their signals,
//! publishes its own, maps incoming addresses onto local signals, and
//! pushes feedback back out without echoing values to where they came
//! from.
//!
//! # Key types
//!
//! - [`EngineCore`]: all engine state; synchronous and directly testable
//! - [`EngineHandle`]: send commands to a running engine actor
//! - [`EngineHooks`]: scan-complete and peer-signal callbacks
//! - [`TranslationTable`]: source address → local signal routing rules
//! - [`PeerState`]: the `Unknown → Scanning → Known` discovery machine
//! - [`EngineConfig`]: name, endpoint and loop settings

mod actor;
mod config;
mod engine;
mod error;
mod hooks;
mod peer;
mod signal;
mod translation;

pub use actor::{EngineHandle, EngineInfo, spawn_core, spawn_engine};
pub use config::{EngineConfig, PeerState};
pub use engine::{EngineCore, HostLookup, MethodHandler, MethodId, Route};
pub use error::EngineError;
pub use hooks::{EngineHooks, NoHooks};
pub use peer::{Peer, PeerId};
pub use signal::{ConnectionCallback, Direction, Limits, SignalEvent, SignalId, SignalInfo, SignalOwner, ValueHandler};
pub use translation::{NO_VALUE, Translation, TranslationTable};
