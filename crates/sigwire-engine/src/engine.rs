//! The engine core: peer directory, signal arena, translation table and
//! the handlers behind every `/signal/*` message.
//!
//! [`EngineCore`] is plain synchronous state. It is driven either by the
//! actor in [`crate::spawn_engine`] or directly, which is how the tests
//! below run it against a [`MemorySink`](sigwire_transport::MemorySink).

use std::collections::BTreeMap;
use std::net::SocketAddr;

use sigwire_protocol::{Message, ProtocolError, Tag};
use sigwire_transport::{
    Endpoint, Incoming, OscUrl, Receiver, TransportError, address_matches, process_error, process_reply,
};
use tracing::{debug, info, trace, warn};

use crate::signal::Signal;
use crate::{
    ConnectionCallback, Direction, EngineConfig, EngineError, EngineHooks, Limits, Peer, PeerId, PeerState,
    SignalEvent, SignalId, SignalInfo, SignalOwner, TranslationTable, ValueHandler,
};

/// Handle of an application method registered with
/// [`EngineCore::add_method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

/// Called with each message routed to an application method. Returns
/// whether it handled the message; `false` lets less specific routes
/// have a go.
pub type MethodHandler = Box<dyn FnMut(&Message, SocketAddr) -> bool + Send>;

/// What an entry in the engine's dispatch table points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// One of the protocol's own messages.
    Builtin(Tag),
    /// Values for, or a query of, a local signal.
    Signal(SignalId),
    /// An application method.
    Method(MethodId),
    /// Anything nothing else matched: learning, relay, prefix queries.
    Fallback,
}

impl From<Tag> for Route {
    fn from(tag: Tag) -> Self {
        Self::Builtin(tag)
    }
}

/// Tags the engine answers itself.
const SIGNAL_TAGS: [Tag; 8] = [
    Tag::SignalHello,
    Tag::SignalConnect,
    Tag::SignalCreated,
    Tag::SignalDisconnect,
    Tag::SignalList,
    Tag::SignalRemoved,
    Tag::SignalRenamed,
    Tag::SignalReply,
];

struct Method {
    address: String,
    handler: MethodHandler,
}

/// A peer hello whose URL names a host rather than an IP.
///
/// The core never resolves names itself. It queues these; the owner
/// resolves them off the dispatch path and hands the result back through
/// [`EngineCore::complete_lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLookup {
    pub peer_name: String,
    pub peer_url: String,
    pub url: OscUrl,
}

/// All engine state plus the endpoint it talks through.
///
/// Single-writer: only the task that owns it mutates peers, signals and
/// translations, so the feedback-suppression flag needs no lock.
pub struct EngineCore {
    name: String,
    endpoint: Endpoint<Route>,
    peers: BTreeMap<PeerId, Peer>,
    signals: BTreeMap<SignalId, Signal>,
    methods: BTreeMap<MethodId, Method>,
    translations: TranslationTable,
    learning: Option<String>,
    lookups: Vec<HostLookup>,
    hooks: Box<dyn EngineHooks>,
    next_id: u64,
}

impl EngineCore {
    /// Binds a UDP endpoint and builds an engine on it.
    ///
    /// # Errors
    /// [`EngineError::Transport`] if the endpoint can't be bound.
    pub async fn bind(config: &EngineConfig, hooks: Box<dyn EngineHooks>) -> Result<(Self, Receiver), EngineError> {
        let (endpoint, receiver) = Endpoint::bind(&config.endpoint).await?;
        Ok((Self::with_endpoint(config.name.clone(), endpoint, hooks), receiver))
    }

    /// Builds an engine over an existing endpoint and installs the
    /// `/signal/*` routes and the fallback.
    pub fn with_endpoint(name: impl Into<String>, mut endpoint: Endpoint<Route>, hooks: Box<dyn EngineHooks>) -> Self {
        for tag in SIGNAL_TAGS {
            endpoint.add_dispatch_handler(tag, Route::Builtin(tag));
        }
        endpoint.set_fallback(Route::Fallback);
        Self {
            name: name.into(),
            endpoint,
            peers: BTreeMap::new(),
            signals: BTreeMap::new(),
            methods: BTreeMap::new(),
            translations: TranslationTable::new(),
            learning: None,
            lookups: Vec::new(),
            hooks,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> String {
        self.endpoint.url().to_string()
    }

    pub fn endpoint(&self) -> &Endpoint<Route> {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint<Route> {
        &mut self.endpoint
    }

    /// `path` under our name: `gain` and `/gain` both become
    /// `/mixer/gain` for an engine named `mixer`.
    pub fn namespaced(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        let name = self.name.trim_matches('/');
        if name.is_empty() {
            format!("/{path}")
        } else {
            format!("/{name}/{path}")
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Sends `/signal/hello (name, our_url)` to `url`, whose host must be
    /// an IP literal. [`EngineHandle::hello`](crate::EngineHandle::hello)
    /// resolves names first.
    ///
    /// # Errors
    /// [`EngineError::Transport`] if the URL doesn't parse, needs a name
    /// lookup, or the send fails.
    pub fn hello(&self, url: &str) -> Result<usize, EngineError> {
        self.hello_to(OscUrl::parse(url)?.numeric_addr()?)
    }

    /// Sends our hello to an already-resolved address.
    pub fn hello_to(&self, dest: SocketAddr) -> Result<usize, EngineError> {
        let our_url = self.url();
        Ok(self
            .endpoint
            .send_tag(dest, Tag::SignalHello, (self.name.as_str(), our_url.as_str()))?)
    }

    /// Reacts to a peer's hello.
    ///
    /// A new peer is added and scanned. A known peer at the same address
    /// is left alone and not answered. A known peer at a new address is
    /// moved and rescanned. Otherwise, if we have a name, we hello back.
    ///
    /// A URL with a host name is queued as a [`HostLookup`] and handled
    /// once [`complete_lookup`](Self::complete_lookup) supplies its
    /// address.
    pub fn handle_hello(&mut self, peer_name: &str, peer_url: &str) {
        let url = match OscUrl::parse(peer_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(peer = peer_name, url = peer_url, error = %e, "hello with unusable url dropped");
                return;
            }
        };
        match url.socket_addr() {
            Some(addr) => self.greet(peer_name, peer_url, addr),
            None => {
                debug!(peer = peer_name, host = %url.host, "hello host queued for lookup");
                self.lookups.push(HostLookup {
                    peer_name: peer_name.to_string(),
                    peer_url: peer_url.to_string(),
                    url,
                });
            }
        }
    }

    /// Hands over the lookups queued since the last call.
    pub fn take_lookups(&mut self) -> Vec<HostLookup> {
        std::mem::take(&mut self.lookups)
    }

    /// Finishes a hello that was waiting on a name lookup.
    pub fn complete_lookup(&mut self, lookup: HostLookup, result: Result<SocketAddr, TransportError>) {
        match result {
            Ok(addr) => self.greet(&lookup.peer_name, &lookup.peer_url, addr),
            Err(e) => warn!(peer = %lookup.peer_name, url = %lookup.peer_url, error = %e, "hello host did not resolve"),
        }
    }

    fn greet(&mut self, peer_name: &str, peer_url: &str, addr: SocketAddr) {
        match self.peers.values_mut().find(|p| p.name == peer_name) {
            None => self.scan_peer(peer_name, peer_url, addr),
            Some(peer) => {
                if address_matches(addr, peer.addr) {
                    trace!(peer = peer_name, "hello from known peer");
                    return;
                }
                info!(peer = peer_name, old = %peer.addr, new = %addr, "peer moved, rescanning");
                peer.addr = addr;
                peer.url = peer_url.to_string();
                peer.transition(PeerState::Scanning);
                self.request_list(addr);
            }
        }

        if !self.name.is_empty() {
            if let Err(e) = self.hello_to(addr) {
                warn!(peer = peer_name, error = %e, "hello reply failed");
            }
        }
    }

    fn scan_peer(&mut self, name: &str, url: &str, addr: SocketAddr) {
        let id = PeerId(self.next_id());
        let mut peer = Peer::new(id, name.to_string(), addr, url.to_string());
        peer.transition(PeerState::Scanning);
        info!(peer = name, url, %id, "scanning peer");
        self.peers.insert(id, peer);
        self.request_list(addr);
    }

    fn request_list(&self, addr: SocketAddr) {
        log_unsent(self.endpoint.send_tag(addr, Tag::SignalList, ()), Tag::SignalList.address());
    }

    fn peer_id_by_address(&self, source: SocketAddr) -> Option<PeerId> {
        self.peers
            .values()
            .find(|p| address_matches(p.addr, source))
            .map(|p| p.id)
    }

    fn peer_signal_id(&self, peer: PeerId, path: &str) -> Option<SignalId> {
        self.peers.get(&peer)?.signals.iter().copied().find(|id| {
            self.signals.get(id).is_some_and(|s| s.path == path)
        })
    }

    /// Sends `message` to every known peer. Returns how many sends
    /// succeeded; failures are logged by the endpoint.
    fn broadcast(&self, message: &Message) -> usize {
        self.peers
            .values()
            .filter(|p| self.endpoint.send_message(p.addr, message).is_ok())
            .count()
    }

    // -----------------------------------------------------------------------
    // Local signals
    // -----------------------------------------------------------------------

    /// Creates a local signal at `path` under our name, routes values and
    /// queries for it, and tells every peer.
    pub fn add_signal(
        &mut self,
        path: &str,
        direction: Direction,
        limits: Limits,
        handler: Option<ValueHandler>,
    ) -> Result<SignalId, EngineError> {
        let path = self.namespaced(path);
        let created = Message::for_tag(
            Tag::SignalCreated,
            (path.as_str(), direction.as_wire(), limits.min, limits.max, limits.default),
        )?;

        let id = SignalId(self.next_id());
        self.endpoint.add_route(&path, Some("f"), Route::Signal(id));
        self.endpoint.add_route(&path, Some(""), Route::Signal(id));

        let mut signal = Signal::new(id, path, direction, limits, SignalOwner::Local);
        signal.handler = handler;
        info!(%id, path = %signal.path, ?direction, "signal added");
        self.signals.insert(id, signal);
        self.broadcast(&created);
        Ok(id)
    }

    fn local_signal(&self, id: SignalId) -> Result<&Signal, EngineError> {
        match self.signals.get(&id) {
            Some(s) if s.is_local() => Ok(s),
            Some(_) => Err(EngineError::NotLocal(id)),
            None => Err(EngineError::SignalNotFound(id)),
        }
    }

    fn local_signal_mut(&mut self, id: SignalId) -> Result<&mut Signal, EngineError> {
        match self.signals.get_mut(&id) {
            Some(s) if s.is_local() => Ok(s),
            Some(_) => Err(EngineError::NotLocal(id)),
            None => Err(EngineError::SignalNotFound(id)),
        }
    }

    /// Unroutes a local signal, clears the translations that pointed at
    /// it, tells every peer, and drops it.
    pub fn remove_signal(&mut self, id: SignalId) -> Result<SignalInfo, EngineError> {
        let path = self.local_signal(id)?.path.clone();
        let removed = Message::for_tag(Tag::SignalRemoved, (path.as_str(),))?;

        self.endpoint.remove_routes_where(|r| *r == Route::Signal(id));
        let cleared = self.translations.remove_destination(&path);
        self.broadcast(&removed);
        let info = self
            .signals
            .remove(&id)
            .map(|s| s.info())
            .ok_or(EngineError::SignalNotFound(id))?;
        info!(%id, path = %path, translations = cleared, "signal removed");
        Ok(info)
    }

    /// Moves a local signal to `new_path` (under our name), reroutes it,
    /// tells every peer, and rewrites every translation that pointed at
    /// the old path. Returns the new full path.
    pub fn rename_signal(&mut self, id: SignalId, new_path: &str) -> Result<String, EngineError> {
        let old = self.local_signal(id)?.path.clone();
        let new = self.namespaced(new_path);
        let renamed = Message::for_tag(Tag::SignalRenamed, (old.as_str(), new.as_str()))?;

        self.endpoint.remove_routes_where(|r| *r == Route::Signal(id));
        self.endpoint.add_route(&new, Some("f"), Route::Signal(id));
        self.endpoint.add_route(&new, Some(""), Route::Signal(id));
        self.broadcast(&renamed);
        let rewritten = self.translations.rename_destination(&old, &new);
        self.local_signal_mut(id)?.path.clone_from(&new);
        info!(%id, old = %old, new = %new, translations = rewritten, "signal renamed");
        Ok(new)
    }

    /// Asks every peer to feed `remote_path` from our output signal.
    /// Advisory: success doesn't wait for an acknowledgement.
    ///
    /// # Errors
    /// [`EngineError::NotAnOutput`] unless the signal is an output.
    pub fn connect_signal(&mut self, id: SignalId, remote_path: &str) -> Result<bool, EngineError> {
        let signal = self.local_signal(id)?;
        if signal.direction != Direction::Output {
            return Err(EngineError::NotAnOutput(id));
        }
        let msg = Message::for_tag(Tag::SignalConnect, (signal.path.as_str(), remote_path))?;
        info!(signal = %signal.path, remote = remote_path, "connecting");
        self.broadcast(&msg);
        Ok(true)
    }

    /// The reverse of [`connect_signal`](Self::connect_signal). Returns
    /// `Ok(false)` if the signal isn't an output.
    pub fn disconnect_signal(&mut self, id: SignalId, remote_path: &str) -> Result<bool, EngineError> {
        let signal = self.local_signal(id)?;
        if signal.direction != Direction::Output {
            return Ok(false);
        }
        let msg = Message::for_tag(Tag::SignalDisconnect, (signal.path.as_str(), remote_path))?;
        self.broadcast(&msg);
        Ok(true)
    }

    /// Sets a local signal's value. A changed output value goes to every
    /// peer at the signal's path. Returns whether the value changed.
    pub fn set_value(&mut self, id: SignalId, value: f32) -> Result<bool, EngineError> {
        let signal = self.local_signal_mut(id)?;
        if signal.value == value {
            return Ok(false);
        }
        signal.value = value;
        if signal.direction == Direction::Output {
            let msg = Message::new(signal.path.clone(), (value,));
            self.broadcast(&msg);
        }
        Ok(true)
    }

    /// New limits for a local signal. Its value resets to the new default.
    pub fn set_limits(&mut self, id: SignalId, limits: Limits) -> Result<(), EngineError> {
        self.local_signal_mut(id)?.set_limits(limits);
        Ok(())
    }

    pub fn set_value_handler(&mut self, id: SignalId, handler: ValueHandler) -> Result<(), EngineError> {
        self.local_signal_mut(id)?.handler = Some(handler);
        Ok(())
    }

    pub fn set_connection_callback(&mut self, id: SignalId, callback: ConnectionCallback) -> Result<(), EngineError> {
        self.local_signal_mut(id)?.on_connection = Some(callback);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Application methods
    // -----------------------------------------------------------------------

    /// Routes `address` (with `signature`, or any arguments for `None`) to
    /// `handler`. Registered addresses show up in prefix queries.
    pub fn add_method(&mut self, address: &str, signature: Option<&str>, handler: MethodHandler) -> MethodId {
        let id = MethodId(self.next_id());
        self.endpoint.add_route(address, signature, Route::Method(id));
        self.methods.insert(
            id,
            Method {
                address: address.to_string(),
                handler,
            },
        );
        id
    }

    pub fn remove_method(&mut self, id: MethodId) -> bool {
        self.endpoint.remove_routes_where(|r| *r == Route::Method(id));
        match self.methods.remove(&id) {
            Some(m) => {
                debug!(address = %m.address, "method removed");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Translations and feedback
    // -----------------------------------------------------------------------

    /// Arms a one-shot capture: the next message nothing else handles
    /// becomes a translation onto `path`.
    pub fn learn(&mut self, path: impl Into<String>) {
        let path = path.into();
        info!(path = %path, "learning");
        self.learning = Some(path);
    }

    pub fn learning(&self) -> Option<&str> {
        self.learning.as_deref()
    }

    pub fn add_translation(&mut self, source: &str, destination: &str) {
        self.translations.add(source, destination);
    }

    pub fn remove_translation(&mut self, source: &str) -> bool {
        self.translations.remove(source).is_some()
    }

    pub fn clear_translations(&mut self) {
        self.translations.clear();
    }

    pub fn translation_count(&self) -> usize {
        self.translations.len()
    }

    /// The `n`th translation as `(source, destination)`.
    pub fn translation(&self, n: usize) -> Option<(String, String)> {
        self.translations
            .nth(n)
            .map(|(s, d)| (s.to_string(), d.to_string()))
    }

    /// Sources feeding the signal at `path`.
    pub fn connections(&self, path: &str) -> Vec<String> {
        self.translations.connections(path)
    }

    pub fn translations(&self) -> &TranslationTable {
        &self.translations
    }

    /// Pushes `value` back out along every translation into `path`.
    ///
    /// A translation whose suppress flag is set (a value was just relayed
    /// in through it), or whose cached value already equals `value`, is
    /// skipped. Every other one sends `value` to its source address on
    /// each peer and caches it. The suppress flag is cleared either way.
    /// Returns the number of messages sent.
    pub fn send_feedback(&mut self, path: &str, value: f32) -> usize {
        let peers: Vec<SocketAddr> = self.peers.values().map(|p| p.addr).collect();
        let mut sent = 0;
        for (source, t) in self.translations.feeding_mut(path) {
            if !t.suppress_feedback && t.current_value != value {
                for addr in &peers {
                    match self.endpoint.send(*addr, source, (value,)) {
                        Ok(_) => sent += 1,
                        Err(e) => warn!(address = %source, error = %e, "feedback not sent"),
                    }
                }
                t.current_value = value;
            }
            t.suppress_feedback = false;
        }
        trace!(path, value, sent, "feedback");
        sent
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn find_peer_by_name(&self, name: &str) -> Option<&Peer> {
        self.peers.values().find(|p| p.name == name)
    }

    pub fn find_peer_by_address(&self, addr: SocketAddr) -> Option<&Peer> {
        self.peers.values().find(|p| address_matches(p.addr, addr))
    }

    pub fn signal(&self, id: SignalId) -> Option<SignalInfo> {
        self.signals.get(&id).map(Signal::info)
    }

    /// Our own signals.
    pub fn local_signals(&self) -> Vec<SignalInfo> {
        self.signals
            .values()
            .filter(|s| s.is_local())
            .map(Signal::info)
            .collect()
    }

    /// The local signal at `path`.
    pub fn find_signal(&self, path: &str) -> Option<SignalInfo> {
        self.signals
            .values()
            .find(|s| s.is_local() && s.path == path)
            .map(Signal::info)
    }

    /// Signals discovered on a peer, in discovery order.
    pub fn peer_signals(&self, id: PeerId) -> Result<Vec<SignalInfo>, EngineError> {
        let peer = self.peers.get(&id).ok_or(EngineError::PeerNotFound(id))?;
        Ok(peer
            .signals
            .iter()
            .filter_map(|sid| self.signals.get(sid).map(Signal::info))
            .collect())
    }

    pub fn find_peer_signal(&self, peer: PeerId, path: &str) -> Option<SignalInfo> {
        self.peer_signal_id(peer, path)
            .and_then(|id| self.signal(id))
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Handles every message of a batch, in order. Returns how many were
    /// handled.
    pub fn dispatch_batch(&mut self, batch: &[Incoming]) -> usize {
        batch.iter().filter(|incoming| self.dispatch(incoming)).count()
    }

    /// Tries each candidate route, most specific first, until one handles
    /// the message.
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
                process_error(&mut *self.hooks, self.endpoint.active(), msg);
                true
            }
            Route::Builtin(Tag::Reply | Tag::ReplyEx) => {
                if is_list_reply(msg) {
                    return false;
                }
                process_reply(&mut *self.hooks, self.endpoint.active(), msg, incoming.source);
                true
            }
            Route::Builtin(Tag::SignalReply) => self.on_reply(incoming),
            Route::Builtin(Tag::SignalHello) => dropped_if_malformed(self.on_hello(msg), msg),
            Route::Builtin(Tag::SignalList) => {
                self.on_list_request(incoming);
                true
            }
            Route::Builtin(Tag::SignalCreated) => dropped_if_malformed(self.on_created(incoming), msg),
            Route::Builtin(Tag::SignalRemoved) => dropped_if_malformed(self.on_removed(incoming), msg),
            Route::Builtin(Tag::SignalRenamed) => dropped_if_malformed(self.on_renamed(incoming), msg),
            Route::Builtin(Tag::SignalConnect) => dropped_if_malformed(self.on_connect(msg), msg),
            Route::Builtin(Tag::SignalDisconnect) => dropped_if_malformed(self.on_disconnect(msg), msg),
            Route::Builtin(tag) => {
                debug!(?tag, "no built-in handling");
                false
            }
            Route::Signal(id) => self.on_signal_value(id, incoming),
            Route::Method(id) => match self.methods.get_mut(&id) {
                Some(method) => (method.handler)(msg, incoming.source),
                None => false,
            },
            Route::Fallback => self.on_generic(incoming),
        }
    }

    fn on_hello(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let name = msg.arg_str(0)?;
        let url = msg.arg_str(1)?;
        self.handle_hello(name, url);
        Ok(())
    }

    /// `/signal/list [prefix]`: one record per local signal under the
    /// prefix, then the terminator.
    fn on_list_request(&self, incoming: &Incoming) {
        let prefix = incoming.message.arg_str(0).unwrap_or_default();
        let query = Tag::SignalList.address();
        debug!(source = %incoming.source, prefix, "listing signals");
        for s in self.signals.values().filter(|s| s.is_local() && s.path.starts_with(prefix)) {
            log_unsent(
                self.endpoint.send(
                    incoming.source,
                    Tag::SignalReply.address(),
                    (query, s.path.as_str(), s.direction.as_wire(), s.limits.min, s.limits.max, s.limits.default),
                ),
                query,
            );
        }
        log_unsent(self.endpoint.send(incoming.source, Tag::SignalReply.address(), (query,)), query);
    }

    /// Any `/reply`. List replies from a peer drive its scan; everything
    /// else goes through the default reply handling.
    fn on_reply(&mut self, incoming: &Incoming) -> bool {
        let msg = &incoming.message;
        if !is_list_reply(msg) {
            process_reply(&mut *self.hooks, self.endpoint.active(), msg, incoming.source);
            return true;
        }
        let Some(peer_id) = self.peer_id_by_address(incoming.source) else {
            warn!(source = %incoming.source, "list reply from unknown peer");
            return true;
        };
        match msg.len() {
            1 => self.finish_scan(peer_id),
            6 => {
                let result = self.on_list_record(peer_id, msg);
                dropped_if_malformed(result, msg);
            }
            n => warn!(source = %incoming.source, args = n, "list reply with unexpected arity dropped"),
        }
        true
    }

    fn finish_scan(&mut self, peer_id: PeerId) {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        if peer.transition(PeerState::Known) {
            info!(peer = %peer.name, signals = peer.signals.len(), "done scanning");
            self.hooks.on_scan_complete(peer);
        } else {
            debug!(peer = %peer.name, state = %peer.state, "end of list outside a scan");
        }
    }

    fn on_list_record(&mut self, peer_id: PeerId, msg: &Message) -> Result<(), ProtocolError> {
        let path = msg.arg_str(1)?;
        let direction = Direction::parse(msg.arg_str(2)?);
        let limits = Limits::new(msg.arg_f32(3)?, msg.arg_f32(4)?, msg.arg_f32(5)?);
        let scanning = self.peers.get(&peer_id).is_some_and(Peer::is_scanning);
        if !scanning {
            debug!(path, "list record outside a scan ignored");
            return Ok(());
        }
        self.add_remote_signal(peer_id, path, direction, limits);
        Ok(())
    }

    fn add_remote_signal(&mut self, peer_id: PeerId, path: &str, direction: Direction, limits: Limits) {
        if self.peer_signal_id(peer_id, path).is_some() {
            trace!(path, "peer signal already known");
            return;
        }
        let id = SignalId(self.next_id());
        let signal = Signal::new(id, path.to_string(), direction, limits, SignalOwner::Remote(peer_id));
        let info = signal.info();
        self.signals.insert(id, signal);
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.signals.push(id);
            info!(peer = %peer.name, path, direction = direction.as_wire(), "peer signal added");
            self.hooks.on_peer_signal(peer, &info, SignalEvent::Created);
        }
    }

    fn on_created(&mut self, incoming: &Incoming) -> Result<(), ProtocolError> {
        let msg = &incoming.message;
        let path = msg.arg_str(0)?;
        let direction = Direction::parse(msg.arg_str(1)?);
        let limits = Limits::new(msg.arg_f32(2)?, msg.arg_f32(3)?, msg.arg_f32(4)?);
        match self.peer_id_by_address(incoming.source) {
            Some(peer_id) => self.add_remote_signal(peer_id, path, direction, limits),
            None => warn!(source = %incoming.source, path, "signal creation from unknown peer"),
        }
        Ok(())
    }

    fn on_removed(&mut self, incoming: &Incoming) -> Result<(), ProtocolError> {
        let path = incoming.message.arg_str(0)?;
        let Some(peer_id) = self.peer_id_by_address(incoming.source) else {
            warn!(source = %incoming.source, path, "signal removal from unknown peer");
            return Ok(());
        };
        let Some(id) = self.peer_signal_id(peer_id, path) else {
            warn!(path, "removal of unknown peer signal");
            return Ok(());
        };
        let (Some(peer), Some(signal)) = (self.peers.get_mut(&peer_id), self.signals.remove(&id)) else {
            return Ok(());
        };
        info!(peer = %peer.name, path, "peer signal removed");
        self.hooks.on_peer_signal(peer, &signal.info(), SignalEvent::Removed);
        peer.signals.retain(|s| *s != id);
        Ok(())
    }

    fn on_renamed(&mut self, incoming: &Incoming) -> Result<(), ProtocolError> {
        let old = incoming.message.arg_str(0)?;
        let new = incoming.message.arg_str(1)?;
        let Some(peer_id) = self.peer_id_by_address(incoming.source) else {
            warn!(source = %incoming.source, old, "signal rename from unknown peer");
            return Ok(());
        };
        let Some(id) = self.peer_signal_id(peer_id, old) else {
            warn!(old, "rename of unknown peer signal");
            return Ok(());
        };
        self.translations.rename_source(old, new);
        let (Some(peer), Some(signal)) = (self.peers.get(&peer_id), self.signals.get_mut(&id)) else {
            return Ok(());
        };
        new.clone_into(&mut signal.path);
        info!(peer = %peer.name, old, new, "peer signal renamed");
        self.hooks.on_peer_signal(
            peer,
            &signal.info(),
            SignalEvent::Renamed { old: old.to_string() },
        );
        Ok(())
    }

    /// `/signal/connect (src, dst)`: `dst` must be one of ours.
    fn on_connect(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let src = msg.arg_str(0)?;
        let dst = msg.arg_str(1)?;
        if self.find_signal(dst).is_none() {
            warn!(src, dst, "connection request for an unknown signal");
            return Ok(());
        }
        info!(src, dst, "connection requested");
        self.translations.add(src, dst);
        Ok(())
    }

    /// `/signal/disconnect (src, dst)`: only local inputs drop the
    /// translation and notify.
    fn on_disconnect(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let src = msg.arg_str(0)?;
        let dst = msg.arg_str(1)?;
        let Some(signal) = self
            .signals
            .values_mut()
            .find(|s| s.is_local() && s.path == dst)
        else {
            return Ok(());
        };
        if signal.direction == Direction::Input {
            info!(src, dst, "peer disconnected");
            self.translations.remove(src);
            let info = signal.info();
            if let Some(callback) = signal.on_connection.as_mut() {
                callback(&info);
            }
        }
        Ok(())
    }

    /// A value for, or a query of, a local signal.
    fn on_signal_value(&mut self, id: SignalId, incoming: &Incoming) -> bool {
        let Some(signal) = self.signals.get_mut(&id) else {
            warn!(%id, "route to a removed signal");
            return false;
        };
        let msg = &incoming.message;
        if msg.is_empty() {
            log_unsent(
                self.endpoint.send(incoming.source, Tag::SignalReply.address(), (signal.path.as_str(), signal.value)),
                &signal.path,
            );
            return true;
        }
        match msg.arg_f32(0) {
            Ok(value) if msg.len() == 1 => {
                signal.value = value;
                if let Some(handler) = signal.handler.as_mut() {
                    handler(value);
                }
                true
            }
            _ => false,
        }
    }

    /// The fallback: learn, then relay, then prefix queries.
    fn on_generic(&mut self, incoming: &Incoming) -> bool {
        let msg = &incoming.message;
        if !msg.is_empty() {
            if let Some(target) = self.learning.take() {
                info!(source = %msg.address, destination = %target, "learned translation");
                self.translations.add(msg.address.as_str(), target);
                return true;
            }
            if let Some(t) = self.translations.get_mut(&msg.address) {
                if let (Ok(value), "f") = (msg.arg_f32(0), msg.signature().as_str()) {
                    t.current_value = value;
                }
                t.suppress_feedback = true;
                let destination = t.destination.clone();
                self.relay(destination, incoming);
                return true;
            }
        }
        if msg.address.ends_with('/') {
            self.answer_prefix_query(incoming);
            return true;
        }
        false
    }

    /// Forwards a translated message verbatim: to the default address if
    /// one is set, otherwise into our own routes (never the fallback, so
    /// translation cycles can't recurse).
    fn relay(&mut self, destination: String, incoming: &Incoming) {
        let relayed = Message {
            address: destination,
            args: incoming.message.args.clone(),
        };
        if relayed.signature() != "f" {
            debug!(
                source = %incoming.message.address,
                destination = %relayed.address,
                signature = %relayed.signature(),
                "relaying a non-float payload"
            );
        }
        match self.endpoint.default_addr() {
            Some(addr) => {
                log_unsent(self.endpoint.send_message(addr, &relayed), &relayed.address);
            }
            None => {
                let local = Incoming::new(relayed, incoming.source);
                let routes: Vec<Route> = self
                    .endpoint
                    .route(&local.message)
                    .into_iter()
                    .filter(|r| *r != Route::Fallback)
                    .collect();
                if !routes.into_iter().any(|r| self.handle_route(r, &local)) {
                    debug!(destination = %local.message.address, "relay target has no local handler");
                }
            }
        }
    }

    /// `/some/prefix/`: one `/reply (query, address)` per registered
    /// address under the prefix, then `/reply (query)`.
    fn answer_prefix_query(&self, incoming: &Incoming) {
        let query = incoming.message.address.as_str();
        let reply = Tag::SignalReply.address();
        for address in self.endpoint.dispatcher().addresses_with_prefix(query) {
            log_unsent(self.endpoint.send(incoming.source, reply, (query, address.as_str())), query);
        }
        log_unsent(self.endpoint.send(incoming.source, reply, (query,)), query);
    }
}

/// A `/reply` whose first argument names the list request.
fn is_list_reply(msg: &Message) -> bool {
    msg.arg_str(0).ok() == Some(Tag::SignalList.address())
}

/// Logs a send that didn't go out. Write failures are already logged by
/// the endpoint; this also catches messages that failed to encode.
fn log_unsent(result: Result<usize, TransportError>, address: &str) {
    if let Err(e) = result {
        warn!(address, error = %e, "message not sent");
    }
}

/// Logs a handler's argument error. The message counts as handled either
/// way: dropping it is the handling.
fn dropped_if_malformed(result: Result<(), ProtocolError>, msg: &Message) -> bool {
    if let Err(e) = result {
        warn!(address = %msg.address, signature = %msg.signature(), error = %e, "malformed message dropped");
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use sigwire_protocol::{ErrorCode, Value};
    use sigwire_transport::{DispatchTarget, MemorySink, SentDatagram};

    use super::*;
    use crate::NoHooks;

    const A_URL: &str = "osc.udp://127.0.0.1:9000/";

    fn local() -> SocketAddr {
        "127.0.0.1:20000".parse().unwrap()
    }

    fn peer_a() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        ScanComplete(String),
        Signal(String, SignalEvent),
        Error(String, ErrorCode),
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Event>>>);

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }
    }

    impl DispatchTarget for Recorder {
        fn handle_error(&mut self, path: &str, code: ErrorCode, _text: &str) -> bool {
            self.0.lock().unwrap().push(Event::Error(path.to_string(), code));
            !code.is_ok()
        }
    }

    impl EngineHooks for Recorder {
        fn on_scan_complete(&mut self, peer: &Peer) {
            self.0.lock().unwrap().push(Event::ScanComplete(peer.name.clone()));
        }

        fn on_peer_signal(&mut self, _peer: &Peer, signal: &SignalInfo, event: SignalEvent) {
            self.0.lock().unwrap().push(Event::Signal(signal.path.clone(), event));
        }
    }

    fn engine(name: &str) -> (EngineCore, MemorySink) {
        let sink = MemorySink::new();
        let endpoint = Endpoint::with_sink(sink.shared(), local());
        (EngineCore::with_endpoint(name, endpoint, Box::new(NoHooks)), sink)
    }

    fn recorded_engine(name: &str) -> (EngineCore, MemorySink, Recorder) {
        let sink = MemorySink::new();
        let recorder = Recorder::default();
        let endpoint = Endpoint::with_sink(sink.shared(), local());
        let core = EngineCore::with_endpoint(name, endpoint, Box::new(recorder.clone()));
        (core, sink, recorder)
    }

    fn from_a(address: &str, args: Vec<Value>) -> Incoming {
        Incoming::new(Message::new(address, args), peer_a())
    }

    fn list_record(path: &str) -> Incoming {
        Incoming::new(
            Message::new("/reply", ("/signal/list", path, "out", 0.0_f32, 1.0_f32, 0.5_f32)),
            peer_a(),
        )
    }

    fn list_end() -> Incoming {
        Incoming::new(Message::new("/reply", ("/signal/list",)), peer_a())
    }

    /// Engine "B" that already knows peer "A" (scan finished, no signals).
    fn engine_with_known_peer() -> (EngineCore, MemorySink, Recorder) {
        let (mut core, sink, rec) = recorded_engine("B");
        core.dispatch(&from_a("/signal/hello", vec!["A".into(), A_URL.into()]));
        core.dispatch(&list_end());
        sink.take();
        (core, sink, rec)
    }

    fn addresses(sent: &[SentDatagram]) -> Vec<&str> {
        sent.iter().map(|d| d.message.address.as_str()).collect()
    }

    // =======================================================================
    // Discovery
    // =======================================================================

    #[test]
    fn test_hello_sends_name_and_url() {
        let (core, sink) = engine("B");
        core.hello(A_URL).unwrap();
        let sent = sink.take();
        assert_eq!(sent[0].dest, peer_a());
        assert_eq!(sent[0].message.address, "/signal/hello");
        assert_eq!(sent[0].message.args_as_text(), vec!["B", "osc.udp://127.0.0.1:20000/"]);
    }

    #[test]
    fn test_handle_hello_new_peer_scans_and_reciprocates() {
        let (mut core, sink) = engine("B");
        assert!(core.dispatch(&from_a("/signal/hello", vec!["A".into(), A_URL.into()])));

        let peer = core.find_peer_by_name("A").unwrap();
        assert_eq!(peer.state, PeerState::Scanning);
        assert_eq!(peer.addr, peer_a());

        let sent = sink.take();
        assert_eq!(addresses(&sent), vec!["/signal/list", "/signal/hello"]);
        assert!(sent.iter().all(|d| d.dest == peer_a()));
        assert!(sent[0].message.is_empty());
    }

    #[test]
    fn test_handle_hello_without_name_does_not_reciprocate() {
        let (mut core, sink) = engine("");
        core.handle_hello("A", A_URL);
        assert_eq!(addresses(&sink.take()), vec!["/signal/list"]);
    }

    #[test]
    fn test_handle_hello_known_same_address_is_noop() {
        let (mut core, sink, _) = engine_with_known_peer();
        core.handle_hello("A", A_URL);
        assert!(sink.take().is_empty());
        assert_eq!(core.peers().count(), 1);
        assert_eq!(core.find_peer_by_name("A").unwrap().state, PeerState::Known);
    }

    #[test]
    fn test_handle_hello_known_changed_address_rescans() {
        let (mut core, sink, _) = engine_with_known_peer();
        core.handle_hello("A", "osc.udp://127.0.0.1:9001/");

        let peer = core.find_peer_by_name("A").unwrap();
        assert_eq!(peer.state, PeerState::Scanning);
        assert_eq!(peer.addr.port(), 9001);
        let sent = sink.take();
        assert_eq!(addresses(&sent), vec!["/signal/list", "/signal/hello"]);
        assert_eq!(sent[0].dest.port(), 9001);
        assert_eq!(core.peers().count(), 1);
    }

    #[test]
    fn test_handle_hello_bad_url_dropped() {
        let (mut core, sink) = engine("B");
        core.handle_hello("A", "not a url");
        assert_eq!(core.peers().count(), 0);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_handle_hello_hostname_is_queued_for_lookup() {
        let (mut core, sink) = engine("B");
        core.handle_hello("A", "osc.udp://mixer-host.example:9000/");

        assert_eq!(core.peers().count(), 0);
        assert!(sink.take().is_empty());
        let lookups = core.take_lookups();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].peer_name, "A");
        assert_eq!(lookups[0].url.host, "mixer-host.example");
        assert!(core.take_lookups().is_empty());
    }

    #[test]
    fn test_complete_lookup_scans_resolved_peer() {
        let (mut core, sink) = engine("B");
        core.handle_hello("A", "osc.udp://mixer-host.example:9000/");
        let lookup = core.take_lookups().remove(0);

        core.complete_lookup(lookup, Ok(peer_a()));

        let peer = core.find_peer_by_name("A").unwrap();
        assert_eq!(peer.state, PeerState::Scanning);
        assert_eq!(peer.addr, peer_a());
        assert_eq!(peer.url, "osc.udp://mixer-host.example:9000/");
        let sent = sink.take();
        assert_eq!(addresses(&sent), vec!["/signal/list", "/signal/hello"]);
        assert!(sent.iter().all(|d| d.dest == peer_a()));
    }

    #[test]
    fn test_complete_lookup_failure_drops_hello() {
        let (mut core, sink) = engine("B");
        core.handle_hello("A", "osc.udp://mixer-host.example:9000/");
        let lookup = core.take_lookups().remove(0);

        core.complete_lookup(lookup, Err(TransportError::InvalidUrl("no such host".into())));

        assert_eq!(core.peers().count(), 0);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_hello_to_hostname_needs_handle() {
        let (core, sink) = engine("B");
        let result = core.hello("osc.udp://mixer-host.example:9000/");
        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_scan_sample_scenario() {
        let (mut core, sink, rec) = recorded_engine("B");
        core.dispatch(&from_a("/signal/hello", vec!["A".into(), A_URL.into()]));
        assert_eq!(sink.sent_to_address("/signal/list")[0].dest, peer_a());

        core.dispatch(&list_record("sig1"));
        core.dispatch(&list_end());

        let peer = core.find_peer_by_name("A").unwrap();
        assert_eq!(peer.state, PeerState::Known);
        let signals = core.peer_signals(peer.id).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].path, "sig1");
        assert_eq!(signals[0].direction, Direction::Output);
        assert_eq!(signals[0].limits, Limits::new(0.0, 1.0, 0.5));
        assert_eq!(signals[0].owner, SignalOwner::Remote(peer.id));
        assert_eq!(
            rec.events(),
            vec![
                Event::Signal("sig1".into(), SignalEvent::Created),
                Event::ScanComplete("A".into()),
            ]
        );
    }

    #[test]
    fn test_scan_k_records_yields_k_signals_and_one_callback() {
        let (mut core, _sink, rec) = recorded_engine("B");
        core.handle_hello("A", A_URL);
        for i in 0..4 {
            core.dispatch(&list_record(&format!("/A/sig{i}")));
        }
        core.dispatch(&list_end());
        // A stray second terminator is not a second completed scan.
        core.dispatch(&list_end());

        let peer = core.find_peer_by_name("A").unwrap();
        assert_eq!(core.peer_signals(peer.id).unwrap().len(), 4);
        let completes = rec
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::ScanComplete(_)))
            .count();
        assert_eq!(completes, 1);
    }

    #[test]
    fn test_scan_duplicate_record_ignored() {
        let (mut core, _sink, _) = recorded_engine("B");
        core.handle_hello("A", A_URL);
        core.dispatch(&list_record("/A/gain"));
        core.dispatch(&list_record("/A/gain"));
        let peer = core.find_peer_by_name("A").unwrap();
        assert_eq!(core.peer_signals(peer.id).unwrap().len(), 1);
    }

    #[test]
    fn test_list_record_outside_scan_ignored() {
        let (mut core, _sink, _) = engine_with_known_peer();
        core.dispatch(&list_record("/A/late"));
        let peer = core.find_peer_by_name("A").unwrap();
        assert!(core.peer_signals(peer.id).unwrap().is_empty());
    }

    #[test]
    fn test_list_reply_from_unknown_peer_dropped() {
        let (mut core, _sink, rec) = recorded_engine("B");
        assert!(core.dispatch(&list_record("/A/gain")));
        assert!(core.dispatch(&list_end()));
        assert_eq!(core.peers().count(), 0);
        assert!(rec.events().is_empty());
    }

    #[test]
    fn test_list_request_answers_with_local_signals() {
        let (mut core, sink) = engine("B");
        core.add_signal("/gain", Direction::Input, Limits::new(0.0, 2.0, 1.0), None).unwrap();
        core.add_signal("/pan", Direction::Output, Limits::default(), None).unwrap();
        sink.take();

        core.dispatch(&from_a("/signal/list", vec!["/B/g".into()]));
        let sent = sink.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].message,
            Message::new("/reply", ("/signal/list", "/B/gain", "in", 0.0_f32, 2.0_f32, 1.0_f32))
        );
        assert_eq!(sent[1].message, Message::new("/reply", ("/signal/list",)));

        core.dispatch(&from_a("/signal/list", vec![]));
        assert_eq!(sink.take().len(), 3);
    }

    // =======================================================================
    // Peer signal lifecycle
    // =======================================================================

    #[test]
    fn test_peer_signal_created_removed_renamed() {
        let (mut core, _sink, rec) = engine_with_known_peer();
        let peer_id = core.find_peer_by_name("A").unwrap().id;

        core.dispatch(&from_a(
            "/signal/created",
            vec!["/A/gain".into(), "in".into(), 0.0_f32.into(), 1.0_f32.into(), 0.2_f32.into()],
        ));
        let created = core.find_peer_signal(peer_id, "/A/gain").unwrap();
        assert_eq!(created.direction, Direction::Input);
        assert_eq!(created.value, 0.2);

        core.add_translation("/A/gain", "/B/level");
        core.dispatch(&from_a("/signal/renamed", vec!["/A/gain".into(), "/A/volume".into()]));
        assert!(core.find_peer_signal(peer_id, "/A/gain").is_none());
        assert!(core.find_peer_signal(peer_id, "/A/volume").is_some());
        assert_eq!(core.translation(0), Some(("/A/volume".into(), "/B/level".into())));

        core.dispatch(&from_a("/signal/removed", vec!["/A/volume".into()]));
        assert!(core.peer_signals(peer_id).unwrap().is_empty());
        assert!(core.signal(created.id).is_none());

        assert_eq!(
            rec.events()[1..],
            [
                Event::Signal("/A/gain".into(), SignalEvent::Created),
                Event::Signal("/A/volume".into(), SignalEvent::Renamed { old: "/A/gain".into() }),
                Event::Signal("/A/volume".into(), SignalEvent::Removed),
            ]
        );
    }

    #[test]
    fn test_peer_signal_created_from_unknown_peer_dropped() {
        let (mut core, _sink) = engine("B");
        let handled = core.dispatch(&from_a(
            "/signal/created",
            vec!["/A/gain".into(), "in".into(), 0.0_f32.into(), 1.0_f32.into(), 0.2_f32.into()],
        ));
        assert!(handled);
        assert_eq!(core.peers().count(), 0);
        assert!(core.local_signals().is_empty());
    }

    #[test]
    fn test_removal_of_unknown_peer_signal_is_harmless() {
        let (mut core, _sink, rec) = engine_with_known_peer();
        assert!(core.dispatch(&from_a("/signal/removed", vec!["/A/nothing".into()])));
        assert_eq!(rec.events(), vec![Event::ScanComplete("A".into())]);
    }

    // =======================================================================
    // Local signals
    // =======================================================================

    #[test]
    fn test_add_signal_namespaces_and_broadcasts() {
        let (mut core, sink, _) = engine_with_known_peer();
        let id = core
            .add_signal("gain", Direction::Output, Limits::new(0.0, 1.0, 0.5), None)
            .unwrap();

        let info = core.signal(id).unwrap();
        assert_eq!(info.path, "/B/gain");
        assert_eq!(info.value, 0.5);
        assert_eq!(core.find_signal("/B/gain").unwrap().id, id);

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, peer_a());
        assert_eq!(
            sent[0].message,
            Message::new("/signal/created", ("/B/gain", "out", 0.0_f32, 1.0_f32, 0.5_f32))
        );
    }

    #[test]
    fn test_namespaced_paths() {
        let (core, _) = engine("/mixer");
        assert_eq!(core.namespaced("/gain"), "/mixer/gain");
        assert_eq!(core.namespaced("strip/1/gain"), "/mixer/strip/1/gain");
        let (bare, _) = engine("");
        assert_eq!(bare.namespaced("gain"), "/gain");
    }

    #[test]
    fn test_signal_value_sets_and_calls_handler() {
        let (mut core, _sink) = engine("B");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let id = core
            .add_signal(
                "/gain",
                Direction::Input,
                Limits::default(),
                Some(Box::new(move |v| record.lock().unwrap().push(v))),
            )
            .unwrap();

        assert!(core.dispatch(&from_a("/B/gain", vec![0.25_f32.into()])));
        assert_eq!(core.signal(id).unwrap().value, 0.25);
        assert_eq!(*seen.lock().unwrap(), vec![0.25]);
    }

    #[test]
    fn test_signal_query_replies_current_value() {
        let (mut core, sink) = engine("B");
        core.add_signal("/gain", Direction::Input, Limits::new(0.0, 1.0, 0.75), None).unwrap();
        sink.take();

        assert!(core.dispatch(&from_a("/B/gain", vec![])));
        let sent = sink.take();
        assert_eq!(sent[0].dest, peer_a());
        assert_eq!(sent[0].message, Message::new("/reply", ("/B/gain", 0.75_f32)));
    }

    #[test]
    fn test_set_value_broadcasts_changed_output_only() {
        let (mut core, sink, _) = engine_with_known_peer();
        let out = core.add_signal("/out", Direction::Output, Limits::default(), None).unwrap();
        let input = core.add_signal("/in", Direction::Input, Limits::default(), None).unwrap();
        sink.take();

        assert!(core.set_value(out, 0.4).unwrap());
        assert!(!core.set_value(out, 0.4).unwrap());
        assert!(core.set_value(input, 0.4).unwrap());

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, Message::new("/B/out", (0.4_f32,)));
    }

    #[test]
    fn test_set_limits_resets_value() {
        let (mut core, _sink) = engine("B");
        let id = core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.set_value(id, 0.9).unwrap();
        core.set_limits(id, Limits::new(-1.0, 1.0, 0.0)).unwrap();
        let info = core.signal(id).unwrap();
        assert_eq!(info.value, 0.0);
        assert_eq!(info.limits.min, -1.0);
    }

    #[test]
    fn test_remove_signal_unroutes_clears_translations_and_broadcasts() {
        let (mut core, sink, _) = engine_with_known_peer();
        let id = core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.add_translation("/ext/fader", "/B/gain");
        core.add_translation("/ext/other", "/B/pan");
        sink.take();

        let info = core.remove_signal(id).unwrap();
        assert_eq!(info.path, "/B/gain");
        assert!(core.signal(id).is_none());
        assert_eq!(core.translation_count(), 1);
        assert!(core.connections("/B/gain").is_empty());
        assert_eq!(sink.take()[0].message, Message::new("/signal/removed", ("/B/gain",)));

        assert!(!core.dispatch(&from_a("/B/gain", vec![0.5_f32.into()])));
        assert!(matches!(core.remove_signal(id), Err(EngineError::SignalNotFound(_))));
    }

    #[test]
    fn test_rename_signal_reroutes_and_rewrites_every_translation() {
        let (mut core, sink, _) = engine_with_known_peer();
        let id = core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.add_translation("/ext/a", "/B/gain");
        core.add_translation("/ext/b", "/B/gain");
        core.add_translation("/ext/c", "/B/pan");
        sink.take();

        let new = core.rename_signal(id, "/level").unwrap();
        assert_eq!(new, "/B/level");
        assert_eq!(core.translation_count(), 3);
        assert_eq!(core.connections("/B/level"), vec!["/ext/a", "/ext/b"]);
        assert!(core.connections("/B/gain").is_empty());
        assert_eq!(
            sink.take()[0].message,
            Message::new("/signal/renamed", ("/B/gain", "/B/level"))
        );

        assert!(!core.dispatch(&from_a("/B/gain", vec![0.5_f32.into()])));
        assert!(core.dispatch(&from_a("/B/level", vec![0.5_f32.into()])));
        assert_eq!(core.signal(id).unwrap().value, 0.5);
    }

    #[test]
    fn test_remote_signal_is_not_local() {
        let (mut core, _sink, _) = engine_with_known_peer();
        core.dispatch(&from_a(
            "/signal/created",
            vec!["/A/gain".into(), "out".into(), 0.0_f32.into(), 1.0_f32.into(), 0.0_f32.into()],
        ));
        let peer_id = core.find_peer_by_name("A").unwrap().id;
        let remote = core.find_peer_signal(peer_id, "/A/gain").unwrap();
        assert!(matches!(core.set_value(remote.id, 0.3), Err(EngineError::NotLocal(_))));
    }

    // =======================================================================
    // Connections
    // =======================================================================

    #[test]
    fn test_connect_signal_output_broadcasts() {
        let (mut core, sink, _) = engine_with_known_peer();
        let out = core.add_signal("/out", Direction::Output, Limits::default(), None).unwrap();
        let input = core.add_signal("/in", Direction::Input, Limits::default(), None).unwrap();
        sink.take();

        assert!(core.connect_signal(out, "/A/gain").unwrap());
        assert_eq!(sink.take()[0].message, Message::new("/signal/connect", ("/B/out", "/A/gain")));
        assert!(matches!(core.connect_signal(input, "/A/gain"), Err(EngineError::NotAnOutput(_))));

        assert!(core.disconnect_signal(out, "/A/gain").unwrap());
        assert_eq!(sink.take()[0].message.address, "/signal/disconnect");
        assert!(!core.disconnect_signal(input, "/A/gain").unwrap());
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_incoming_connect_records_translation_for_local_signal() {
        let (mut core, _sink) = engine("B");
        core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();

        core.dispatch(&from_a("/signal/connect", vec!["/A/out".into(), "/B/gain".into()]));
        assert_eq!(core.translation(0), Some(("/A/out".into(), "/B/gain".into())));

        core.dispatch(&from_a("/signal/connect", vec!["/A/out2".into(), "/B/missing".into()]));
        assert_eq!(core.translation_count(), 1);
    }

    #[test]
    fn test_incoming_disconnect_on_input_removes_and_notifies() {
        let (mut core, _sink) = engine("B");
        let id = core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let record = notified.clone();
        core.set_connection_callback(id, Box::new(move |s| record.lock().unwrap().push(s.path.clone())))
            .unwrap();
        core.add_translation("/A/out", "/B/gain");

        core.dispatch(&from_a("/signal/disconnect", vec!["/A/out".into(), "/B/gain".into()]));
        assert_eq!(core.translation_count(), 0);
        assert_eq!(*notified.lock().unwrap(), vec!["/B/gain".to_string()]);
    }

    #[test]
    fn test_incoming_disconnect_on_output_keeps_translation() {
        let (mut core, _sink) = engine("B");
        core.add_signal("/out", Direction::Output, Limits::default(), None).unwrap();
        core.add_translation("/A/in", "/B/out");
        core.dispatch(&from_a("/signal/disconnect", vec!["/A/in".into(), "/B/out".into()]));
        assert_eq!(core.translation_count(), 1);
    }

    // =======================================================================
    // Feedback, relay, learning
    // =======================================================================

    #[test]
    fn test_send_feedback_forwards_once_then_suppresses_repeat() {
        let (mut core, sink, _) = engine_with_known_peer();
        core.add_signal("/out", Direction::Output, Limits::default(), None).unwrap();
        core.add_translation("/ext/src", "/B/out");
        sink.take();

        assert_eq!(core.send_feedback("/B/out", 0.7), 1);
        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, peer_a());
        assert_eq!(sent[0].message, Message::new("/ext/src", (0.7_f32,)));

        assert_eq!(core.send_feedback("/B/out", 0.7), 0);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_relay_sets_suppress_so_feedback_does_not_echo() {
        let (mut core, sink, _) = engine_with_known_peer();
        let id = core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.add_translation("/ext/fader", "/B/gain");
        sink.take();

        assert!(core.dispatch(&from_a("/ext/fader", vec![0.4_f32.into()])));
        assert_eq!(core.signal(id).unwrap().value, 0.4);
        let t = core.translations().get("/ext/fader").unwrap();
        assert!(t.suppress_feedback);
        assert_eq!(t.current_value, 0.4);

        assert_eq!(core.send_feedback("/B/gain", 0.4), 0);
        assert!(!core.translations().get("/ext/fader").unwrap().suppress_feedback);
        assert_eq!(core.send_feedback("/B/gain", 0.9), 1);
        assert_eq!(sink.take()[0].message, Message::new("/ext/fader", (0.9_f32,)));
    }

    #[test]
    fn test_send_feedback_reaches_every_peer_once_per_translation() {
        let (mut core, sink, _) = engine_with_known_peer();
        let peer_c: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        core.dispatch(&Incoming::new(
            Message::new("/signal/hello", ("C", "osc.udp://127.0.0.1:9002/")),
            peer_c,
        ));
        core.dispatch(&Incoming::new(Message::new("/reply", ("/signal/list",)), peer_c));
        assert_eq!(core.find_peer_by_name("C").unwrap().state, PeerState::Known);
        core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.add_translation("/ext/fader", "/B/gain");
        sink.take();

        assert_eq!(core.send_feedback("/B/gain", 0.7), 2);
        let mut dests: Vec<SocketAddr> = sink.take().iter().map(|d| d.dest).collect();
        dests.sort();
        assert_eq!(dests, vec![peer_a(), peer_c]);

        assert_eq!(core.send_feedback("/B/gain", 0.7), 0);
        assert!(sink.take().is_empty());

        // One relay silences exactly one push, not one per peer.
        assert!(core.dispatch(&from_a("/ext/fader", vec![0.2_f32.into()])));
        sink.take();
        assert_eq!(core.send_feedback("/B/gain", 0.3), 0);
        assert!(sink.take().is_empty());
        assert_eq!(core.send_feedback("/B/gain", 0.5), 2);
        assert!(sink.take().iter().all(|d| d.message == Message::new("/ext/fader", (0.5_f32,))));
    }

    #[test]
    fn test_relay_to_default_address_is_verbatim() {
        let (mut core, sink) = engine("B");
        let target: SocketAddr = "127.0.0.1:30000".parse().unwrap();
        core.endpoint_mut().set_default_addr(Some(target));
        core.add_translation("/ext/fader", "/B/gain");

        assert!(core.dispatch(&from_a("/ext/fader", vec![0.4_f32.into()])));
        let sent = sink.take();
        assert_eq!(sent[0].dest, target);
        assert_eq!(sent[0].message, Message::new("/B/gain", (0.4_f32,)));
    }

    #[test]
    fn test_relay_send_failure_is_logged_and_still_handled() {
        let (mut core, sink) = engine("B");
        core.endpoint_mut().set_default_addr(Some("127.0.0.1:30000".parse().unwrap()));
        core.add_translation("/ext/name", "/B/name");

        // A NUL can't be encoded, so the relay send fails.
        assert!(core.dispatch(&from_a("/ext/name", vec!["a\0b".into()])));
        assert!(sink.take().is_empty());
        assert!(core.translations().get("/ext/name").unwrap().suppress_feedback);
    }

    #[test]
    fn test_relay_cycle_does_not_recurse() {
        let (mut core, _sink) = engine("B");
        core.add_translation("/x", "/y");
        core.add_translation("/y", "/x");
        assert!(core.dispatch(&from_a("/x", vec![1.0_f32.into()])));
        assert!(core.translations().get("/x").unwrap().suppress_feedback);
        assert!(!core.translations().get("/y").unwrap().suppress_feedback);
    }

    #[test]
    fn test_learn_creates_translation_once() {
        let (mut core, _sink) = engine("B");
        let id = core.add_signal("/target", Direction::Input, Limits::default(), None).unwrap();
        core.learn("/B/target");

        assert!(core.dispatch(&from_a("/external/src", vec![0.5_f32.into()])));
        assert_eq!(core.learning(), None);
        assert_eq!(core.translation(0), Some(("/external/src".into(), "/B/target".into())));
        // The learned message itself is consumed, not relayed.
        assert_eq!(core.signal(id).unwrap().value, 0.0);

        assert!(core.dispatch(&from_a("/external/src", vec![0.6_f32.into()])));
        assert_eq!(core.translation_count(), 1);
        assert_eq!(core.learning(), None);
        assert_eq!(core.signal(id).unwrap().value, 0.6);
    }

    #[test]
    fn test_learn_is_not_triggered_by_routed_messages() {
        let (mut core, _sink) = engine("B");
        core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.learn("/B/gain");
        core.dispatch(&from_a("/B/gain", vec![0.3_f32.into()]));
        assert_eq!(core.learning(), Some("/B/gain"));
        assert_eq!(core.translation_count(), 0);
    }

    #[test]
    fn test_prefix_query_lists_registered_addresses() {
        let (mut core, sink) = engine("B");
        core.add_signal("/gain", Direction::Input, Limits::default(), None).unwrap();
        core.add_signal("/pan", Direction::Input, Limits::default(), None).unwrap();
        core.add_method("/B/reset", Some(""), Box::new(|_, _| true));
        sink.take();

        assert!(core.dispatch(&from_a("/B/", vec![])));
        let texts: Vec<Vec<String>> = sink.take().iter().map(|d| d.message.args_as_text()).collect();
        assert_eq!(
            texts,
            vec![
                vec!["/B/".to_string(), "/B/gain".to_string()],
                vec!["/B/".to_string(), "/B/pan".to_string()],
                vec!["/B/".to_string(), "/B/reset".to_string()],
                vec!["/B/".to_string()],
            ]
        );
    }

    #[test]
    fn test_unmatched_message_is_unhandled() {
        let (mut core, sink) = engine("B");
        assert!(!core.dispatch(&from_a("/nobody/home", vec![1_i32.into()])));
        assert!(sink.take().is_empty());
    }

    // =======================================================================
    // Methods, errors, replies
    // =======================================================================

    #[test]
    fn test_add_method_routes_and_remove_unroutes() {
        let (mut core, _sink) = engine("B");
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let id = core.add_method(
            "/app/reset",
            None,
            Box::new(move |_, _| {
                *counter.lock().unwrap() += 1;
                true
            }),
        );
        assert!(core.dispatch(&from_a("/app/reset", vec![])));
        assert!(core.dispatch(&from_a("/app/reset", vec!["now".into()])));
        assert_eq!(*hits.lock().unwrap(), 2);

        assert!(core.remove_method(id));
        assert!(!core.dispatch(&from_a("/app/reset", vec![])));
        assert!(!core.remove_method(id));
    }

    #[test]
    fn test_error_on_announce_reaches_hooks_and_deactivates() {
        let (mut core, _sink, rec) = recorded_engine("B");
        core.endpoint().set_active(true);
        core.dispatch(&from_a(
            "/error",
            vec!["/nsm/server/announce".into(), (-2_i32).into(), "incompatible API version".into()],
        ));
        assert!(!core.endpoint().is_active());
        assert_eq!(
            rec.events(),
            vec![Event::Error("/nsm/server/announce".into(), ErrorCode::IncompatibleApi)]
        );
    }

    #[test]
    fn test_plain_reply_goes_to_default_handling() {
        let (mut core, _sink, rec) = recorded_engine("B");
        assert!(core.dispatch(&from_a("/reply", vec!["/some/path".into(), "done".into()])));
        assert!(rec.events().is_empty());
        assert_eq!(core.peers().count(), 0);
    }

    #[test]
    fn test_dispatch_batch_counts_handled() {
        let (mut core, _sink) = engine("B");
        let batch = vec![
            from_a("/signal/hello", vec!["A".into(), A_URL.into()]),
            from_a("/nobody", vec![1_i32.into()]),
            list_end(),
        ];
        assert_eq!(core.dispatch_batch(&batch), 2);
        assert_eq!(core.find_peer_by_name("A").unwrap().state, PeerState::Known);
    }
}
