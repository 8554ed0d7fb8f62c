//! The session client: announce, the coordinator's commands, and the
//! reports we send back.
//!
//! [`SessionClient`] is plain synchronous state over an
//! [`Endpoint`]. The actor in [`crate::spawn_session`] drives it from one
//! task; the tests below drive it directly against a
//! [`MemorySink`](sigwire_transport::MemorySink).
//!
//! # Concurrency note
//!
//! Only the owning task mutates the client, so the dirty flag, the
//! announce deadline and the ping bookkeeping need no lock. The endpoint's
//! [`ActiveFlag`](sigwire_transport::ActiveFlag) is the one piece other
//! tasks may read.

use std::net::SocketAddr;
use std::time::Duration;

use sigwire_protocol::{
    API_VERSION_MAJOR, API_VERSION_MINOR, Capabilities, Capability, IntoArgs, Message, ProtocolError, Tag,
    dirtiness_tag, visibility_tag,
};
use sigwire_transport::{Endpoint, Incoming, Receiver, process_error, process_reply};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::{HookFailure, PingAction, PingMonitor, SessionConfig, SessionError, SessionHooks, SessionInfo, SessionState};

/// What an entry in the client's dispatch table points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A message the client answers itself.
    Builtin(Tag),
    /// Anything else, handed to
    /// [`SessionHooks::handle_broadcast`].
    Broadcast,
}

impl From<Tag> for Route {
    fn from(tag: Tag) -> Self {
        Self::Builtin(tag)
    }
}

/// Tags registered on top of the endpoint's `/error` and `/reply`
/// defaults.
const CLIENT_TAGS: [Tag; 8] = [
    Tag::ServerReply,
    Tag::OscPing,
    Tag::ClientOpen,
    Tag::ClientSave,
    Tag::ClientLabel,
    Tag::ClientLoaded,
    Tag::ClientShowGui,
    Tag::ClientHideGui,
];

/// Text of a successful open or save reply.
const REPLY_OK: &str = "OK";

/// One client's side of the session handshake.
pub struct SessionClient<H> {
    endpoint: Endpoint<Route>,
    hooks: H,
    info: SessionInfo,
    app_name: String,
    exe_name: String,
    capabilities: String,
    capability_set: Capabilities,
    announce_timeout: Duration,
    announce_deadline: Option<Instant>,
    ping: Option<PingMonitor>,
}

impl<H: SessionHooks> SessionClient<H> {
    /// Binds a UDP endpoint and builds a client on it.
    ///
    /// # Errors
    /// [`SessionError::Transport`] if the socket can't be bound or the
    /// coordinator URL doesn't resolve.
    pub async fn bind(config: &SessionConfig, hooks: H) -> Result<(Self, Receiver), SessionError> {
        let (mut endpoint, receiver) = Endpoint::bind(&config.endpoint).await?;
        if let Some(url) = &config.coordinator_url {
            endpoint.set_default_url(url).await?;
        }
        Ok((Self::build(config, endpoint, hooks), receiver))
    }

    /// Builds a client over an existing endpoint and installs its routes.
    ///
    /// The coordinator URL, if any, must name an IP literal here; use
    /// [`bind`](Self::bind) for hostnames.
    ///
    /// # Errors
    /// [`SessionError::Transport`] if the coordinator URL doesn't parse or
    /// needs a name lookup.
    pub fn with_endpoint(config: &SessionConfig, mut endpoint: Endpoint<Route>, hooks: H) -> Result<Self, SessionError> {
        if let Some(url) = &config.coordinator_url {
            endpoint.set_default_numeric_url(url)?;
        }
        Ok(Self::build(config, endpoint, hooks))
    }

    fn build(config: &SessionConfig, mut endpoint: Endpoint<Route>, hooks: H) -> Self {
        for tag in CLIENT_TAGS {
            endpoint.add_dispatch_handler(tag, Route::Builtin(tag));
        }
        // Replies and errors of any other shape still belong to us, not
        // to the broadcast hook.
        endpoint.add_route(Tag::Reply.address(), None, Route::Builtin(Tag::Reply));
        endpoint.add_route(Tag::Error.address(), None, Route::Builtin(Tag::Error));
        endpoint.set_fallback(Route::Broadcast);

        Self {
            endpoint,
            hooks,
            info: SessionInfo::default(),
            app_name: config.app_name.clone(),
            exe_name: config.exe_name.clone(),
            capabilities: config.capabilities.clone(),
            capability_set: config.capability_set(),
            announce_timeout: config.announce_timeout(),
            announce_deadline: None,
            ping: config.ping.enabled.then(|| PingMonitor::from_config(&config.ping)),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.info.state
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// True only after an accepted announce reply.
    pub fn is_active(&self) -> bool {
        self.endpoint.is_active()
    }

    /// The coordinator's name, once active.
    pub fn manager(&self) -> &str {
        &self.info.manager
    }

    pub fn label(&self) -> &str {
        &self.info.label
    }

    pub fn url(&self) -> String {
        self.endpoint.url().to_string()
    }

    pub fn coordinator(&self) -> Option<SocketAddr> {
        self.endpoint.default_addr()
    }

    /// Points the client at a coordinator, e.g. one found after startup.
    pub async fn set_coordinator_url(&mut self, url: &str) -> Result<SocketAddr, SessionError> {
        Ok(self.endpoint.set_default_url(url).await?)
    }

    pub fn endpoint(&self) -> &Endpoint<Route> {
        &self.endpoint
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn ping(&self) -> Option<&PingMonitor> {
        self.ping.as_ref()
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// Moves to `next` if the transition is legal and keeps the active
    /// flag in step. Staying put is always allowed.
    fn set_state(&mut self, next: SessionState) -> bool {
        let current = self.info.state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "illegal session transition ignored");
            return false;
        }
        self.info.state = next;
        self.sync_active();
        info!(from = %current, to = %next, manager = %self.info.manager, "session state changed");
        true
    }

    /// The transport may flip the active flag while processing a reply or
    /// error; the state is authoritative.
    fn sync_active(&mut self) {
        self.info.active = self.info.state.is_active();
        self.endpoint.set_active(self.info.active);
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Sends `/nsm/server/announce (app, caps, exe, major, minor, pid)` to
    /// the coordinator and starts the reply timeout.
    ///
    /// # Errors
    /// [`SessionError::NoCoordinator`] without a coordinator address,
    /// [`SessionError::InvalidTransition`] unless disconnected,
    /// [`SessionError::Transport`] if the send fails.
    pub fn announce(&mut self) -> Result<usize, SessionError> {
        let dest = self.endpoint.default_addr().ok_or(SessionError::NoCoordinator)?;
        let from = self.info.state;
        if !from.can_transition_to(SessionState::Announcing) {
            return Err(SessionError::InvalidTransition {
                from,
                to: SessionState::Announcing,
            });
        }
        let pid = i32::try_from(std::process::id()).unwrap_or(i32::MAX);
        let sent = self.endpoint.send_tag(
            dest,
            Tag::ServerAnnounce,
            (
                self.app_name.as_str(),
                self.capabilities.as_str(),
                self.exe_name.as_str(),
                API_VERSION_MAJOR,
                API_VERSION_MINOR,
                pid,
            ),
        )?;
        self.set_state(SessionState::Announcing);
        self.announce_deadline = Some(Instant::now() + self.announce_timeout);
        if let Some(ping) = &mut self.ping {
            ping.reset();
        }
        info!(coordinator = %dest, app = %self.app_name, caps = %self.capabilities, "announcing");
        Ok(sent)
    }

    /// Stops acting on the coordinator's commands.
    pub fn close(&mut self) -> bool {
        self.announce_deadline = None;
        self.set_state(SessionState::Closing)
    }

    /// Drops back to `Disconnected`, e.g. after a close has finished.
    pub fn disconnect(&mut self) -> bool {
        self.announce_deadline = None;
        self.set_state(SessionState::Disconnected)
    }

    /// Runs the time-based checks: the announce timeout while announcing,
    /// the liveness ping while active.
    pub fn tick(&mut self, now: Instant) {
        match self.info.state {
            SessionState::Announcing => self.check_announce_timeout(now),
            SessionState::Active => self.check_ping(now),
            SessionState::Disconnected | SessionState::Closing => {}
        }
    }

    fn check_announce_timeout(&mut self, now: Instant) {
        let Some(deadline) = self.announce_deadline else {
            return;
        };
        if now >= deadline {
            warn!(timeout_ms = self.announce_timeout.as_millis() as u64, "no announce reply, giving up");
            self.announce_deadline = None;
            self.set_state(SessionState::Disconnected);
        }
    }

    fn check_ping(&mut self, now: Instant) {
        let action = match &mut self.ping {
            Some(ping) => ping.poll(now),
            None => return,
        };
        match action {
            PingAction::Wait => {}
            PingAction::Send => {
                if let Err(e) = self.send_to_coordinator(Tag::OscPing, ()) {
                    warn!(error = %e, "ping not sent");
                }
            }
            PingAction::Expired => {
                let missed = self.ping.as_ref().map_or(0, PingMonitor::missed);
                warn!(missed, manager = %self.info.manager, "coordinator not responding");
                self.set_state(SessionState::Disconnected);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Handles every message of a batch, in order. Returns how many were
    /// handled.
    pub fn dispatch_batch(&mut self, batch: &[Incoming]) -> usize {
        batch.iter().filter(|incoming| self.dispatch(incoming)).count()
    }

    /// Tries each candidate route, most specific first.
    pub fn dispatch(&mut self, incoming: &Incoming) -> bool {
        for route in self.endpoint.route(&incoming.message) {
            if self.handle_route(route, incoming) {
                return true;
            }
        }
        debug!(
            source = %incoming.source,
            address = %incoming.message.address,
            signature = %incoming.message.signature(),
            "unhandled message"
        );
        false
    }

    fn handle_route(&mut self, route: Route, incoming: &Incoming) -> bool {
        let msg = &incoming.message;
        match route {
            Route::Builtin(Tag::Error) => {
                self.on_error(msg);
                true
            }
            Route::Builtin(Tag::Reply | Tag::ReplyEx) => {
                self.on_reply(incoming);
                true
            }
            Route::Builtin(Tag::ServerReply) => {
                if msg.arg_str(0).ok() == Some(Tag::OscPing.address()) {
                    self.on_ping_response();
                } else {
                    self.on_reply(incoming);
                }
                true
            }
            Route::Builtin(Tag::OscPing) => {
                if let Err(e) = self.endpoint.send_tag(incoming.source, Tag::ServerReply, (Tag::OscPing.address(),)) {
                    warn!(source = %incoming.source, error = %e, "ping reply not sent");
                }
                true
            }
            Route::Builtin(tag) if !self.info.state.is_active() => {
                debug!(?tag, state = %self.info.state, "coordinator command ignored");
                true
            }
            Route::Builtin(Tag::ClientOpen) => dropped_if_malformed(self.on_open(msg), msg),
            Route::Builtin(Tag::ClientSave) => {
                let result = self.hooks.save();
                log_unsent(self.save_reply(result));
                true
            }
            Route::Builtin(Tag::ClientLabel) => dropped_if_malformed(self.on_label(msg), msg),
            Route::Builtin(Tag::ClientLoaded) => {
                self.hooks.loaded();
                true
            }
            Route::Builtin(Tag::ClientShowGui) => {
                self.hooks.show(&self.info.path);
                true
            }
            Route::Builtin(Tag::ClientHideGui) => {
                self.hooks.hide(&self.info.path);
                true
            }
            Route::Builtin(tag) => {
                debug!(?tag, "no built-in handling");
                false
            }
            Route::Broadcast => {
                if !self.info.state.is_active() {
                    return false;
                }
                trace!(address = %msg.address, "broadcast");
                self.hooks.handle_broadcast(&msg.address, &msg.signature(), &msg.args);
                true
            }
        }
    }

    fn on_error(&mut self, msg: &Message) {
        let is_announce = msg.signature() == "sis" && msg.arg_str(0).ok() == Some(Tag::ServerAnnounce.address());
        process_error(&mut self.hooks, self.endpoint.active(), msg);
        if is_announce {
            warn!(text = msg.arg_str(2).unwrap_or_default(), "announce rejected");
            self.announce_deadline = None;
            self.set_state(SessionState::Disconnected);
        }
        self.sync_active();
    }

    fn on_reply(&mut self, incoming: &Incoming) {
        let msg = &incoming.message;
        let is_announce = msg.arg_str(0).ok() == Some(Tag::ServerAnnounce.address());
        if is_announce && self.info.state != SessionState::Announcing {
            warn!(source = %incoming.source, state = %self.info.state, "announce reply outside a handshake dropped");
            return;
        }
        let accepted = process_reply(&mut self.hooks, self.endpoint.active(), msg, incoming.source);
        if is_announce && accepted {
            if msg.len() == 4 {
                self.on_announce_accepted(msg);
            } else {
                debug!(args = msg.len(), "announce reply without coordinator details");
            }
        }
        self.sync_active();
    }

    fn on_announce_accepted(&mut self, msg: &Message) {
        self.info.manager = msg.arg_str(2).unwrap_or_default().to_string();
        self.info.coordinator_capabilities = msg.arg_str(3).unwrap_or_default().to_string();
        self.announce_deadline = None;
        if let Some(ping) = &mut self.ping {
            ping.reset();
        }
        if self.set_state(SessionState::Active) {
            info!(
                manager = %self.info.manager,
                caps = %self.info.coordinator_capabilities,
                "session active"
            );
            self.hooks.announced(&self.info);
        }
    }

    fn on_ping_response(&mut self) {
        if let Some(ping) = &mut self.ping {
            let rtt = ping.record_response(Instant::now());
            trace!(?rtt, "ping response");
        }
    }

    fn on_open(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let path = msg.arg_str(0)?;
        let display_name = msg.arg_str(1)?;
        let client_id = msg.arg_str(2)?;
        debug!(path, display_name, client_id, "open requested");

        let result = self.hooks.open(path, display_name, client_id);
        if result.is_ok() {
            self.info.path = path.to_string();
            self.info.display_name = display_name.to_string();
            self.info.client_id = client_id.to_string();
        }
        log_unsent(self.open_reply(result));
        Ok(())
    }

    fn on_label(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let text = msg.arg_str(0)?;
        self.info.label = text.to_string();
        self.hooks.label(text);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reports to the coordinator
    // -----------------------------------------------------------------------

    /// Replies to an open: `/reply ("/nsm/client/open", "OK")` on success,
    /// `/error ("/nsm/client/open", code, message)` otherwise. Success
    /// clears the dirty flag.
    pub fn open_reply(&mut self, result: Result<(), HookFailure>) -> Result<usize, SessionError> {
        self.command_reply(Tag::ClientOpen, result)
    }

    /// Replies to a save, like [`open_reply`](Self::open_reply).
    pub fn save_reply(&mut self, result: Result<(), HookFailure>) -> Result<usize, SessionError> {
        self.command_reply(Tag::ClientSave, result)
    }

    fn command_reply(&mut self, tag: Tag, result: Result<(), HookFailure>) -> Result<usize, SessionError> {
        let path = tag.address();
        match result {
            Ok(()) => {
                self.info.dirty = false;
                Ok(self.endpoint.reply_send(None, path, REPLY_OK)?)
            }
            Err(failure) => {
                warn!(path, code = failure.code.code(), message = failure.message_or_default(), "command failed");
                Ok(self
                    .endpoint
                    .error_send(None, path, failure.code, failure.message_or_default())?)
            }
        }
    }

    /// Updates the dirty flag. Each clean → dirty edge bumps
    /// `dirty_count`. With the `:dirty:` capability and an active session
    /// the change is reported as `/nsm/client/is_dirty` or `/is_clean`.
    ///
    /// Returns whether a report was sent. Setting the current value again
    /// changes nothing.
    pub fn set_dirty(&mut self, dirty: bool) -> Result<bool, SessionError> {
        if self.info.dirty == dirty {
            return Ok(false);
        }
        self.info.dirty = dirty;
        if dirty {
            self.info.dirty_count += 1;
        }
        debug!(dirty, count = self.info.dirty_count, "dirty state changed");
        self.notify(Capability::Dirty, dirtiness_tag(dirty), ())
    }

    /// Reports save/open progress in `0.0..=1.0`. Needs `:progress:`.
    pub fn progress(&mut self, fraction: f32) -> Result<bool, SessionError> {
        self.notify(Capability::Progress, Tag::ClientProgress, (fraction.clamp(0.0, 1.0),))
    }

    /// Sends a status message for the coordinator's user. Needs
    /// `:message:`.
    pub fn message(&mut self, priority: i32, text: &str) -> Result<bool, SessionError> {
        self.notify(Capability::Message, Tag::ClientMessage, (priority, text))
    }

    /// Reports that the optional GUI was shown or hidden. Needs
    /// `:optional-gui:`.
    pub fn set_gui_visible(&mut self, visible: bool) -> Result<bool, SessionError> {
        self.notify(Capability::OptionalGui, visibility_tag(visible), ())
    }

    fn notify(&mut self, cap: Capability, tag: Tag, args: impl IntoArgs) -> Result<bool, SessionError> {
        if !self.capability_set.has(cap) || !self.info.state.is_active() {
            return Ok(false);
        }
        self.send_to_coordinator(tag, args)?;
        Ok(true)
    }

    fn send_to_coordinator(&self, tag: Tag, args: impl IntoArgs) -> Result<usize, SessionError> {
        let dest = self.endpoint.default_addr().ok_or(SessionError::NoCoordinator)?;
        Ok(self.endpoint.send_tag(dest, tag, args)?)
    }
}

fn log_unsent(result: Result<usize, SessionError>) {
    if let Err(e) = result {
        warn!(error = %e, "reply to coordinator not sent");
    }
}

/// Logs a message whose arguments didn't parse. It still counts as
/// handled.
fn dropped_if_malformed(result: Result<(), ProtocolError>, msg: &Message) -> bool {
    if let Err(e) = result {
        warn!(address = %msg.address, signature = %msg.signature(), error = %e, "malformed message dropped");
    }
    true
}

// =========================================================================
// Tests
// =========================================================================
