//! The application side of the session handshake.
//!
//! sigwire doesn't know how to open or save your project. That is your
//! application's job. Instead it defines [`SessionHooks`]: the
//! coordinator's commands arrive on the session task and are handed to
//! these methods, and the results of `open` and `save` are replied to the
//! coordinator automatically.
//!
//! # Example
//!
//! ```rust
//! use sigwire_protocol::{ErrorCode, Value};
//! use sigwire_session::{HookFailure, SessionHooks};
//! use sigwire_transport::DispatchTarget;
//!
//! #[derive(Default)]
//! struct Editor {
//!     project: Option<String>,
//! }
//!
//! impl DispatchTarget for Editor {}
//!
//! impl SessionHooks for Editor {
//!     fn open(&mut self, path: &str, _display_name: &str, _client_id: &str) -> Result<(), HookFailure> {
//!         self.project = Some(path.to_string());
//!         Ok(())
//!     }
//!
//!     fn save(&mut self) -> Result<(), HookFailure> {
//!         match &self.project {
//!             Some(_) => Ok(()),
//!             None => Err(HookFailure::new(ErrorCode::NoSessionOpen, "nothing to save")),
//!         }
//!     }
//!
//!     fn label(&mut self, _text: &str) {}
//!     fn loaded(&mut self) {}
//!     fn show(&mut self, _path: &str) {}
//!     fn hide(&mut self, _path: &str) {}
//!     fn handle_broadcast(&mut self, _address: &str, _signature: &str, _args: &[Value]) {}
//! }
//! ```

use std::fmt;

use sigwire_protocol::{ErrorCode, Value};
use sigwire_transport::DispatchTarget;

use crate::SessionInfo;

/// Text sent with an error reply when a hook gives none.
pub const NO_INFO: &str = "No info";

/// Why an `open` or `save` hook failed. Sent back to the coordinator as
/// `/error (path, code, message)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl HookFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// A failure without an explanation; replied as [`NO_INFO`].
    pub fn code(code: ErrorCode) -> Self {
        Self { code, message: None }
    }

    pub fn message_or_default(&self) -> &str {
        match self.message.as_deref() {
            Some(m) if !m.is_empty() => m,
            _ => NO_INFO,
        }
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message_or_default())
    }
}

impl std::error::Error for HookFailure {}

/// What a concrete session client must implement.
///
/// # Trait bounds
///
/// - [`DispatchTarget`] carries the `/error` and `/reply` hooks. The
///   announce error, for example, reaches
///   [`handle_error`](DispatchTarget::handle_error) with its code.
/// - `Send + 'static` because the hooks live on the session task for as
///   long as it runs.
///
/// Every method except [`announced`](Self::announced) is required. They
/// run on the session task and must not block.
pub trait SessionHooks: DispatchTarget + Send + 'static {
    /// The coordinator asks us to open (or create) the project at `path`.
    fn open(&mut self, path: &str, display_name: &str, client_id: &str) -> Result<(), HookFailure>;

    /// The coordinator asks us to save.
    fn save(&mut self) -> Result<(), HookFailure>;

    /// The coordinator assigned a new label.
    fn label(&mut self, text: &str);

    /// Every client of the session has been opened.
    fn loaded(&mut self);

    /// Show the optional GUI. `path` is the open project.
    fn show(&mut self, path: &str);

    /// Hide the optional GUI. `path` is the open project.
    fn hide(&mut self, path: &str);

    /// A message nothing else matched, usually one relayed by the
    /// coordinator from another client.
    fn handle_broadcast(&mut self, address: &str, signature: &str, args: &[Value]);

    /// The announce was accepted.
    fn announced(&mut self, _info: &SessionInfo) {}
}
