//! Session handshake for sigwire clients.
//!
//! This crate handles a client's lifecycle under a session coordinator:
//!
//! 1. **Announce**: introduce ourselves and wait for the reply
//!    ([`SessionClient::announce`], the announce timeout)
//! 2. **Commands**: open, save, label, show/hide, broadcasts, handed to
//!    the application's [`SessionHooks`]
//! 3. **Reports**: dirty/clean, progress, messages and GUI visibility,
//!    each gated on the capability we announced
//! 4. **Liveness**: optional `/osc/ping` checks ([`PingMonitor`])
//!
//! It also carries the other end of the GUI protocol: a
//! [`SessionController`] that watches a coordinator's clients and sends
//! it the user's commands.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)  ← implements SessionHooks
//!     ↕
//! Session Layer (this crate)  ← SessionClient, SessionHandle
//!     ↕
//! Transport Layer (below)  ← Endpoint, dispatch table, /error and /reply
//! ```

mod actor;
mod client;
mod client_id;
mod controller;
mod error;
mod hooks;
mod ping;
mod session;

pub use actor::{SessionHandle, spawn_client, spawn_session};
pub use client::{Route, SessionClient};
pub use client_id::{ClientIdGenerator, generate_client_id};
pub use controller::{ControlledClient, ControllerHooks, Coordinator, NoControllerHooks, SessionController};
pub use error::SessionError;
pub use hooks::{HookFailure, NO_INFO, SessionHooks};
pub use ping::{PingAction, PingMonitor};
pub use session::{PingConfig, SessionConfig, SessionInfo, SessionState};
