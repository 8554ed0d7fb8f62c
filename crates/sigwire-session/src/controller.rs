//! The controller: the GUI side of a session coordinator.
//!
//! A [`SessionController`] announces itself with `/nsm/gui/gui_announce`,
//! mirrors the coordinator's client table from the `/nsm/gui/client/*`
//! reports, collects the session list and sends the user's commands
//! (`save`, `open`, `stop <client>`, ...) back. Like [`SessionClient`](crate::SessionClient)
//! it is plain synchronous state over an [`Endpoint`]; the owning task
//! feeds it batches from a [`Receiver`] and calls [`tick`](SessionController::tick).
//!
//! A controller may talk to several coordinators: the one it was pointed
//! at and any that announce themselves as launched on its behalf.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use sigwire_protocol::{IntoArgs, Message, ProtocolError, Tag};
use sigwire_transport::{
    DispatchTarget, Endpoint, Incoming, OscUrl, Receiver, address_matches, process_error,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::{PingAction, PingMonitor, Route, SessionConfig, SessionError};

/// Status text the coordinator sends when a client is gone for good.
const STATUS_REMOVED: &str = "removed";
const STATUS_STOPPED: &str = "stopped";

const CONTROLLER_TAGS: [Tag; 17] = [
    Tag::GuiAnnounceUrl,
    Tag::GuiServerAnnounce,
    Tag::GuiServerMessage,
    Tag::GuiSession,
    Tag::GuiSessionName,
    Tag::GuiSessionRoot,
    Tag::GuiClientNew,
    Tag::GuiClientStatus,
    Tag::GuiClientSwitch,
    Tag::GuiClientProgress,
    Tag::GuiClientDirty,
    Tag::GuiClientHasOptionalGui,
    Tag::GuiClientVisible,
    Tag::GuiClientLabel,
    Tag::ServerReply,
    Tag::ServerBroadcast,
    Tag::OscPing,
];

/// A coordinator the controller talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinator {
    pub addr: SocketAddr,
    /// True if it announced itself with `/nsm/gui/server_announce`, i.e.
    /// it was started for this controller.
    pub launched: bool,
}

/// The controller's view of one client in the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlledClient {
    pub id: String,
    pub name: String,
    pub label: String,
    /// Last status word: `launch`, `open`, `ready`, `save`, `stopped`, ...
    pub status: String,
    pub progress: f32,
    pub dirty: bool,
    pub has_optional_gui: bool,
    pub gui_visible: bool,
    pub stopped: bool,
}

impl ControlledClient {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// What a controller front end hears about. Every method has a no-op
/// default.
pub trait ControllerHooks: DispatchTarget + Send + 'static {
    /// A client was added or one of its fields changed.
    fn client_changed(&mut self, _client: &ControlledClient) {}

    /// The coordinator dropped a client.
    fn client_removed(&mut self, _id: &str) {}

    /// The answer to a `list` command is complete.
    fn session_list(&mut self, _sessions: &[String]) {}

    /// A status line from the coordinator for the user.
    fn server_message(&mut self, _text: &str) {}
}

/// Hooks for a controller nobody watches.
#[derive(Debug, Default)]
pub struct NoControllerHooks;

impl DispatchTarget for NoControllerHooks {}
impl ControllerHooks for NoControllerHooks {}

/// GUI-side state for one or more coordinators.
pub struct SessionController<H> {
    endpoint: Endpoint<Route>,
    hooks: H,
    coordinators: Vec<Coordinator>,
    clients: BTreeMap<String, ControlledClient>,
    sessions: Vec<String>,
    listing: bool,
    session_name: String,
    session_path: String,
    session_root: String,
    ping: Option<PingMonitor>,
}

impl<H: ControllerHooks> SessionController<H> {
    /// Binds a UDP endpoint and builds a controller on it. The
    /// configured coordinator URL, if any, is resolved here.
    ///
    /// Only `endpoint`, `coordinator_url` and `ping` of the config are
    /// used.
    ///
    /// # Errors
    /// [`SessionError::Transport`] if the socket can't be bound or the
    /// coordinator URL doesn't resolve.
    pub async fn bind(config: &SessionConfig, hooks: H) -> Result<(Self, Receiver), SessionError> {
        let (endpoint, receiver) = Endpoint::bind(&config.endpoint).await?;
        let mut controller = Self::build(config, endpoint, hooks);
        if let Some(url) = &config.coordinator_url {
            let addr = OscUrl::parse(url)?.resolve().await?;
            controller.add_coordinator(addr, false);
        }
        Ok((controller, receiver))
    }

    /// Builds a controller over an existing endpoint. The coordinator
    /// URL, if any, must name an IP literal.
    ///
    /// # Errors
    /// [`SessionError::Transport`] if the coordinator URL doesn't parse or
    /// needs a name lookup.
    pub fn with_endpoint(config: &SessionConfig, endpoint: Endpoint<Route>, hooks: H) -> Result<Self, SessionError> {
        let mut controller = Self::build(config, endpoint, hooks);
        if let Some(url) = &config.coordinator_url {
            let addr = OscUrl::parse(url)?.numeric_addr()?;
            controller.add_coordinator(addr, false);
        }
        Ok(controller)
    }

    fn build(config: &SessionConfig, mut endpoint: Endpoint<Route>, hooks: H) -> Self {
        for tag in CONTROLLER_TAGS {
            endpoint.add_dispatch_handler(tag, Route::Builtin(tag));
        }
        endpoint.add_route(Tag::Reply.address(), None, Route::Builtin(Tag::Reply));
        endpoint.add_route(Tag::Error.address(), None, Route::Builtin(Tag::Error));

        Self {
            endpoint,
            hooks,
            coordinators: Vec::new(),
            clients: BTreeMap::new(),
            sessions: Vec::new(),
            listing: false,
            session_name: String::new(),
            session_path: String::new(),
            session_root: String::new(),
            ping: config.ping.enabled.then(|| PingMonitor::from_config(&config.ping)),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// True once a coordinator has answered our announce.
    pub fn is_active(&self) -> bool {
        self.endpoint.is_active()
    }

    pub fn url(&self) -> String {
        self.endpoint.url().to_string()
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

    pub fn coordinators(&self) -> &[Coordinator] {
        &self.coordinators
    }

    /// Adds a coordinator unless one at the same address is known.
    /// Returns true if it was new.
    pub fn add_coordinator(&mut self, addr: SocketAddr, launched: bool) -> bool {
        if self.coordinators.iter().any(|c| c.addr == addr) {
            return false;
        }
        info!(%addr, launched, "coordinator added");
        self.coordinators.push(Coordinator { addr, launched });
        true
    }

    /// Clients in id order.
    pub fn clients(&self) -> impl Iterator<Item = &ControlledClient> {
        self.clients.values()
    }

    pub fn client(&self, id: &str) -> Option<&ControlledClient> {
        self.clients.get(id)
    }

    pub fn client_by_name(&self, name: &str) -> Option<&ControlledClient> {
        self.clients.values().find(|c| c.name == name)
    }

    /// Session names from the last `list`, in the order received.
    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    /// True between a `list` command and the empty entry that ends its
    /// answer.
    pub fn is_listing(&self) -> bool {
        self.listing
    }

    /// The open session, if any.
    pub fn session_name(&self) -> Option<&str> {
        (!self.session_name.is_empty()).then_some(self.session_name.as_str())
    }

    pub fn session_path(&self) -> &str {
        &self.session_path
    }

    pub fn session_root(&self) -> &str {
        &self.session_root
    }

    pub fn ping(&self) -> Option<&PingMonitor> {
        self.ping.as_ref()
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Sends `/nsm/gui/gui_announce` to every known coordinator.
    ///
    /// # Errors
    /// [`SessionError::NoCoordinator`] if there is none,
    /// [`SessionError::Transport`] if a send fails.
    pub fn announce(&mut self) -> Result<usize, SessionError> {
        if let Some(ping) = &mut self.ping {
            ping.reset();
        }
        let sent = self.send_all(Tag::GuiAnnounce, ())?;
        info!(coordinators = self.coordinators.len(), "controller announcing");
        Ok(sent)
    }

    /// Stops acting as a live controller until the next announce reply.
    pub fn deactivate(&mut self) {
        if self.endpoint.is_active() {
            info!("controller deactivated");
        }
        self.endpoint.set_active(false);
        if let Some(ping) = &mut self.ping {
            ping.reset();
        }
    }

    /// Sends a named command.
    ///
    /// Client commands (`stop`, `resume`, `show`, `hide`, `remove`,
    /// `guisave`) take a client id or name and are sent with the client's
    /// id. `add` goes to the first coordinator only; everything else goes
    /// to all of them. `list` also starts a fresh session list.
    ///
    /// # Errors
    /// [`SessionError::UnknownCommand`], [`SessionError::MissingArgument`],
    /// [`SessionError::UnknownClient`], [`SessionError::NoCoordinator`],
    /// or a transport failure.
    pub fn send_command(&mut self, name: &str, arg: Option<&str>) -> Result<usize, SessionError> {
        let tag = Tag::from_command(name);
        if tag == Tag::Illegal {
            return Err(SessionError::UnknownCommand(name.to_string()));
        }
        let arg = if Tag::command_needs_argument(name) {
            let given = arg.filter(|a| !a.is_empty());
            Some(given.ok_or_else(|| SessionError::MissingArgument(name.to_string()))?)
        } else {
            None
        };

        match arg {
            Some(target) if Tag::command_is_client(name) => {
                let id = self
                    .resolve_client(target)
                    .ok_or_else(|| SessionError::UnknownClient(target.to_string()))?;
                info!(command = name, client = %id, "sending client command");
                self.send_all(tag, (id.as_str(),))
            }
            Some(exe) if tag == Tag::ServerAdd => {
                let first = self.coordinators.first().ok_or(SessionError::NoCoordinator)?;
                info!(executable = exe, coordinator = %first.addr, "sending add");
                Ok(self.endpoint.send_tag(first.addr, tag, (exe,))?)
            }
            Some(arg) => {
                info!(command = name, arg, "sending command");
                self.send_all(tag, (arg,))
            }
            None => {
                if tag == Tag::ServerList {
                    self.sessions.clear();
                    self.listing = true;
                }
                if tag == Tag::ServerQuit && self.session_name().is_some() && self.coordinators.iter().any(|c| c.launched) {
                    warn!(session = %self.session_name, "quitting with a session still open");
                }
                info!(command = name, "sending command");
                self.send_all(tag, ())
            }
        }
    }

    fn resolve_client(&self, key: &str) -> Option<String> {
        if self.clients.contains_key(key) {
            return Some(key.to_string());
        }
        self.client_by_name(key).map(|c| c.id.clone())
    }

    fn send_all(&self, tag: Tag, args: impl IntoArgs) -> Result<usize, SessionError> {
        if self.coordinators.is_empty() {
            return Err(SessionError::NoCoordinator);
        }
        let message = Message::for_tag(tag, args)?;
        let mut sent = 0;
        for coordinator in &self.coordinators {
            sent += self.endpoint.send_message(coordinator.addr, &message)?;
        }
        Ok(sent)
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Pings the coordinators while active and gives up on them once too
    /// many pings go unanswered.
    pub fn tick(&mut self, now: Instant) {
        if !self.endpoint.is_active() {
            return;
        }
        let action = match &mut self.ping {
            Some(ping) => ping.poll(now),
            None => return,
        };
        match action {
            PingAction::Wait => {}
            PingAction::Send => {
                if let Err(e) = self.send_all(Tag::OscPing, ()) {
                    warn!(error = %e, "ping not sent");
                }
            }
            PingAction::Expired => {
                let missed = self.ping.as_ref().map_or(0, PingMonitor::missed);
                warn!(missed, "coordinator not responding");
                self.deactivate();
            }
        }
    }

    /// Waits up to `timeout` for messages, handles them, then runs
    /// [`tick`](Self::tick). Returns how many messages were handled.
    pub async fn poll(&mut self, receiver: &mut Receiver, timeout: Duration) -> usize {
        let batch = receiver.wait(timeout).await;
        let handled = self.dispatch_batch(&batch);
        self.tick(Instant::now());
        handled
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    pub fn dispatch_batch(&mut self, batch: &[Incoming]) -> usize {
        batch.iter().filter(|incoming| self.dispatch(incoming)).count()
    }

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
        let Route::Builtin(tag) = route else {
            return false;
        };
        match tag {
            Tag::Error => {
                process_error(&mut self.hooks, self.endpoint.active(), msg);
                true
            }
            Tag::Reply | Tag::ReplyEx => {
                self.on_reply(incoming);
                true
            }
            Tag::ServerReply => {
                if msg.arg_str(0).ok() == Some(Tag::OscPing.address()) {
                    if let Some(ping) = &mut self.ping {
                        let rtt = ping.record_response(Instant::now());
                        trace!(?rtt, "ping response");
                    }
                } else {
                    debug!(path = msg.arg_str(0).unwrap_or_default(), "bare reply");
                }
                true
            }
            Tag::OscPing => {
                if let Err(e) = self.endpoint.send_tag(incoming.source, Tag::ServerReply, (Tag::OscPing.address(),)) {
                    warn!(source = %incoming.source, error = %e, "ping reply not sent");
                }
                true
            }
            Tag::GuiAnnounceUrl => {
                self.on_coordinator_hello(incoming.source, false);
                true
            }
            Tag::GuiServerAnnounce => {
                self.on_coordinator_hello(incoming.source, true);
                true
            }
            Tag::GuiServerMessage => dropped_if_malformed(self.on_server_message(msg), msg),
            Tag::GuiSession => dropped_if_malformed(self.on_session(msg), msg),
            Tag::GuiSessionName => dropped_if_malformed(self.on_session_name(msg), msg),
            Tag::GuiSessionRoot => dropped_if_malformed(self.on_session_root(msg), msg),
            Tag::ServerBroadcast => {
                self.relay_broadcast(incoming);
                true
            }
            Tag::GuiClientNew
            | Tag::GuiClientStatus
            | Tag::GuiClientSwitch
            | Tag::GuiClientProgress
            | Tag::GuiClientDirty
            | Tag::GuiClientHasOptionalGui
            | Tag::GuiClientVisible
            | Tag::GuiClientLabel => dropped_if_malformed(self.on_client_report(tag, msg), msg),
            other => {
                debug!(tag = ?other, "no controller handling");
                false
            }
        }
    }

    /// A coordinator answered our announce, or announced itself. Either
    /// way we are live and ask it for its sessions.
    fn on_coordinator_hello(&mut self, source: SocketAddr, launched: bool) {
        self.endpoint.set_active(true);
        self.add_coordinator(source, launched);
        if let Some(ping) = &mut self.ping {
            ping.reset();
        }
        self.sessions.clear();
        self.listing = true;
        info!(coordinator = %source, launched, "controller active");
        if let Err(e) = self.endpoint.send_tag(source, Tag::ServerList, ()) {
            warn!(coordinator = %source, error = %e, "session list request not sent");
        }
    }

    fn on_reply(&mut self, incoming: &Incoming) {
        let msg = &incoming.message;
        let Ok(path) = msg.arg_str(0) else {
            warn!(source = %incoming.source, "reply without a path dropped");
            return;
        };
        match msg.len() {
            2 if path == Tag::ServerList.address() => {
                let name = msg.arg_str(1).unwrap_or_default().to_string();
                self.on_session_entry(name);
            }
            2 => {
                let text = msg.arg_str(1).unwrap_or_default();
                info!(source = %incoming.source, path, text, "coordinator reply");
                self.hooks.server_message(text);
            }
            4 => {
                info!(
                    source = %incoming.source,
                    path,
                    manager = msg.arg_str(2).unwrap_or_default(),
                    caps = msg.arg_str(3).unwrap_or_default(),
                    "coordinator hello"
                );
            }
            n => debug!(source = %incoming.source, path, args = n, "reply ignored"),
        }
    }

    /// One entry of a session list. An empty name ends the list.
    fn on_session_entry(&mut self, name: String) {
        if name.is_empty() {
            self.listing = false;
            debug!(sessions = self.sessions.len(), "session list complete");
            self.hooks.session_list(&self.sessions);
        } else if !self.sessions.contains(&name) {
            trace!(session = %name, "session listed");
            self.sessions.push(name);
        }
    }

    fn on_server_message(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let text = msg.arg_str(0)?;
        info!(text, "coordinator message");
        self.hooks.server_message(text);
        Ok(())
    }

    fn on_session(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let name = msg.arg_str(0)?;
        if !name.is_empty() && !self.sessions.iter().any(|s| s == name) {
            self.sessions.push(name.to_string());
        }
        Ok(())
    }

    fn on_session_name(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let name = msg.arg_str(0)?;
        let path = msg.arg_str(1)?;
        if name.is_empty() {
            info!("no session open");
            self.clients.clear();
        } else {
            info!(session = name, path, "session open");
        }
        self.session_name = name.to_string();
        self.session_path = path.to_string();
        Ok(())
    }

    fn on_session_root(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        self.session_root = msg.arg_str(0)?.to_string();
        debug!(root = %self.session_root, "session root");
        Ok(())
    }

    fn on_client_report(&mut self, tag: Tag, msg: &Message) -> Result<(), ProtocolError> {
        let id = msg.arg_str(0)?;
        if tag == Tag::GuiClientNew {
            let name = msg.arg_str(1)?;
            let client = self
                .clients
                .entry(id.to_string())
                .and_modify(|c| c.name = name.to_string())
                .or_insert_with(|| {
                    info!(client = id, name, "new client");
                    ControlledClient::new(id, name)
                });
            self.hooks.client_changed(client);
            return Ok(());
        }
        if tag == Tag::GuiClientSwitch {
            return self.on_client_switch(id, msg.arg_str(1)?);
        }
        if tag == Tag::GuiClientStatus && msg.arg_str(1)? == STATUS_REMOVED {
            if self.clients.remove(id).is_some() {
                info!(client = id, "client removed");
                self.hooks.client_removed(id);
            }
            return Ok(());
        }

        let Some(client) = self.clients.get_mut(id) else {
            debug!(address = %msg.address, client = id, "report for unknown client");
            return Ok(());
        };
        match tag {
            Tag::GuiClientStatus => {
                let status = msg.arg_str(1)?;
                client.stopped = status == STATUS_STOPPED;
                client.status = status.to_string();
                if status == "ready" {
                    client.progress = 0.0;
                }
            }
            Tag::GuiClientProgress => client.progress = msg.arg_f32(1)?,
            Tag::GuiClientDirty => client.dirty = msg.arg_i32(1)? != 0,
            Tag::GuiClientVisible => client.gui_visible = msg.arg_i32(1)? != 0,
            Tag::GuiClientLabel => client.label = msg.arg_str(1)?.to_string(),
            Tag::GuiClientHasOptionalGui => client.has_optional_gui = true,
            _ => return Ok(()),
        }
        trace!(client = id, ?tag, "client updated");
        self.hooks.client_changed(client);
        Ok(())
    }

    /// A client got a new id, e.g. after the coordinator matched it to a
    /// saved one.
    fn on_client_switch(&mut self, old_id: &str, new_id: &str) -> Result<(), ProtocolError> {
        let Some(mut client) = self.clients.remove(old_id) else {
            debug!(client = old_id, "switch for unknown client");
            return Ok(());
        };
        info!(old = old_id, new = new_id, "client id switched");
        client.id = new_id.to_string();
        self.hooks.client_removed(old_id);
        self.hooks.client_changed(&client);
        self.clients.insert(new_id.to_string(), client);
        Ok(())
    }

    /// Passes a broadcast on to every coordinator except the one it came
    /// from.
    fn relay_broadcast(&mut self, incoming: &Incoming) {
        let msg = &incoming.message;
        if msg.is_empty() {
            debug!(source = %incoming.source, "broadcast without arguments dropped");
            return;
        }
        for coordinator in &self.coordinators {
            if address_matches(coordinator.addr, incoming.source) {
                continue;
            }
            trace!(to = %coordinator.addr, "relaying broadcast");
            if let Err(e) = self.endpoint.send_message(coordinator.addr, msg) {
                warn!(to = %coordinator.addr, error = %e, "broadcast not relayed");
            }
        }
    }
}

fn dropped_if_malformed(result: Result<(), ProtocolError>, msg: &Message) -> bool {
    if let Err(e) = result {
        warn!(address = %msg.address, signature = %msg.signature(), error = %e, "malformed message dropped");
    }
    true
}

// =========================================================================
// Tests
// =========================================================================
