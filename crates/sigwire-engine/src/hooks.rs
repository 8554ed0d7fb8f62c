//! The `EngineHooks` trait: what an application hears from the engine.
//!
//! The engine calls these on its own task, from inside the dispatch loop.
//! They must not block.

use sigwire_transport::DispatchTarget;

use crate::{Peer, SignalEvent, SignalInfo};

/// Application callbacks for peer activity.
///
/// Every method has a no-op default. The [`DispatchTarget`] supertrait
/// carries the `/error` and `/reply` hooks, so an application can also
/// react to error replies aimed at it.
pub trait EngineHooks: DispatchTarget + Send + 'static {
    /// A peer finished listing its signals (`Scanning → Known`).
    ///
    /// Fires exactly once per completed scan.
    fn on_scan_complete(&mut self, _peer: &Peer) {}

    /// A signal appeared on, vanished from, or was renamed on a peer.
    ///
    /// For [`SignalEvent::Removed`] the signal is still present in the
    /// snapshot and is dropped right after the call.
    fn on_peer_signal(&mut self, _peer: &Peer, _signal: &SignalInfo, _event: SignalEvent) {}
}

/// Hooks that do nothing beyond the default error/reply logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl DispatchTarget for NoHooks {}

impl EngineHooks for NoHooks {}
