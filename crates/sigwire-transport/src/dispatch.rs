//! Dispatch table and the default `/error` and `/reply` handling.
//!
//! Incoming messages are matched against a table keyed by address and
//! signature. The table stores a *route* value chosen by the owner (an
//! enum naming a built-in operation, a signal handle, an application
//! method id). The owner matches on the route, so no untyped user-data
//! ever leaves this module.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sigwire_protocol::{ErrorCode, Message, Tag};
use tracing::{debug, info, warn};

/// One decoded message together with the address it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub message: Message,
    pub source: SocketAddr,
}

impl Incoming {
    pub fn new(message: Message, source: SocketAddr) -> Self {
        Self { message, source }
    }
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// Key of one registration. `signature: None` accepts any argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub address: String,
    pub signature: Option<String>,
}

impl RouteKey {
    pub fn new(address: impl Into<String>, signature: Option<&str>) -> Self {
        Self {
            address: address.into(),
            signature: signature.map(str::to_string),
        }
    }

    /// The key a tag is registered under.
    pub fn for_tag(tag: Tag) -> Option<Self> {
        let spec = tag.spec()?;
        Some(Self::new(spec.address, spec.signature.as_fixed()))
    }
}

/// Address/signature → route table with an optional fallback.
///
/// Registering the same key twice replaces the earlier route. There is no
/// fan-out at this layer.
#[derive(Debug, Clone)]
pub struct Dispatcher<R> {
    routes: BTreeMap<RouteKey, R>,
    fallback: Option<R>,
}

impl<R> Default for Dispatcher<R> {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
            fallback: None,
        }
    }
}

impl<R: Clone> Dispatcher<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `route` for `key`, returning the route it replaced.
    pub fn insert(&mut self, key: RouteKey, route: R) -> Option<R> {
        self.routes.insert(key, route)
    }

    /// Registers `route` under a tag's address and signature. Returns
    /// false for [`Tag::Illegal`].
    pub fn insert_tag(&mut self, tag: Tag, route: R) -> bool {
        match RouteKey::for_tag(tag) {
            Some(key) => {
                self.routes.insert(key, route);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &RouteKey) -> Option<R> {
        self.routes.remove(key)
    }

    /// Removes every registration whose route satisfies `pred`.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&R) -> bool) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, r| !pred(r));
        before - self.routes.len()
    }

    /// Sets the route used when nothing more specific matches.
    pub fn set_fallback(&mut self, route: R) {
        self.fallback = Some(route);
    }

    pub fn clear_fallback(&mut self) {
        self.fallback = None;
    }

    /// Candidate routes for a message, most specific first: exact address
    /// and signature, then the address with any signature, then the
    /// fallback.
    pub fn candidates(&self, message: &Message) -> Vec<R> {
        let mut out = Vec::with_capacity(3);
        let exact = RouteKey::new(message.address.as_str(), Some(&message.signature()));
        if let Some(r) = self.routes.get(&exact) {
            out.push(r.clone());
        }
        let any = RouteKey::new(message.address.as_str(), None);
        if let Some(r) = self.routes.get(&any) {
            out.push(r.clone());
        }
        if let Some(r) = &self.fallback {
            out.push(r.clone());
        }
        out
    }

    /// Registered addresses starting with `prefix`, sorted, without
    /// duplicates.
    pub fn addresses_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .routes
            .keys()
            .filter(|k| k.address.starts_with(prefix))
            .map(|k| k.address.clone())
            .collect();
        out.dedup();
        out
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, key: &RouteKey) -> bool {
        self.routes.contains_key(key)
    }
}

// ---------------------------------------------------------------------------
// Active flag
// ---------------------------------------------------------------------------

/// Shared "this endpoint has completed its handshake" flag.
///
/// Cloning shares the flag, so a watcher on another task sees changes
/// made by the dispatch task.
#[derive(Debug, Clone, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Default error / reply handling
// ---------------------------------------------------------------------------

/// Hooks for the two messages every endpoint understands.
///
/// Both have default implementations; owners override what they need.
pub trait DispatchTarget {
    /// Called for a well-formed `/error (path, code, text)`.
    ///
    /// Returns true if the error should deactivate the endpoint.
    fn handle_error(&mut self, path: &str, code: ErrorCode, text: &str) -> bool {
        warn!(path, code = code.code(), text, "error reply");
        !code.is_ok()
    }

    /// Called for a `/reply`. Returns true if the reply was accepted.
    fn handle_reply(&mut self, reply: &Message, source: SocketAddr) -> bool {
        default_handle_reply(reply, source)
    }
}

/// The stock reply policy: 2- and 4-value replies are accepted and
/// logged, a bare 1-value reply and every other arity are rejected.
pub fn default_handle_reply(reply: &Message, source: SocketAddr) -> bool {
    let path = reply.arg_str(0).unwrap_or_default();
    match reply.len() {
        1 => {
            warn!(%source, path, "reply without a message");
            false
        }
        2 | 4 => {
            if path == Tag::ServerAnnounce.address() {
                let text = reply.arg_str(1).unwrap_or_default();
                let manager = reply.arg_str(2).unwrap_or_default();
                let caps = reply.arg_str(3).unwrap_or_default();
                info!(%source, text, manager, caps, "successfully registered");
            } else {
                debug!(%source, path, "reply not handled");
            }
            true
        }
        n => {
            warn!(%source, path, args = n, "reply with unexpected arity");
            false
        }
    }
}

/// Processes an incoming `/error`.
///
/// The message must have signature `sis`; anything else is dropped and
/// `false` returned. An error replying to the announce address always
/// clears `active`. Returns the target's should-deactivate verdict.
pub fn process_error<T: DispatchTarget + ?Sized>(target: &mut T, active: &ActiveFlag, message: &Message) -> bool {
    if message.signature() != "sis" {
        warn!(signature = %message.signature(), "malformed error message dropped");
        return false;
    }
    let (Ok(path), Ok(code), Ok(text)) = (message.arg_str(0), message.arg_i32(1), message.arg_str(2))
    else {
        return false;
    };
    if path == Tag::ServerAnnounce.address() {
        active.set(false);
    }
    target.handle_error(path, ErrorCode::from_code(code), text)
}

/// Processes an incoming `/reply`.
///
/// An accepted reply to the announce address sets `active`. Returns the
/// target's verdict.
pub fn process_reply<T: DispatchTarget + ?Sized>(
    target: &mut T,
    active: &ActiveFlag,
    message: &Message,
    source: SocketAddr,
) -> bool {
    if message.arg_str(0).is_err() {
        warn!(%source, "reply without a path dropped");
        return false;
    }
    let accepted = target.handle_reply(message, source);
    if accepted && message.arg_str(0).ok() == Some(Tag::ServerAnnounce.address()) {
        active.set(true);
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SocketAddr {
        "127.0.0.1:15000".parse().unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        errors: Vec<(String, ErrorCode)>,
    }

    impl DispatchTarget for Recorder {
        fn handle_error(&mut self, path: &str, code: ErrorCode, _text: &str) -> bool {
            self.errors.push((path.to_string(), code));
            !code.is_ok()
        }
    }

    // =======================================================================
    // Dispatcher
    // =======================================================================

    #[test]
    fn test_candidates_order_most_specific_first() {
        let mut d = Dispatcher::new();
        d.insert(RouteKey::new("/a", Some("f")), "exact");
        d.insert(RouteKey::new("/a", None), "any");
        d.set_fallback("fallback");

        let msg = Message::new("/a", (1.0_f32,));
        assert_eq!(d.candidates(&msg), vec!["exact", "any", "fallback"]);

        let other = Message::new("/a", ("s",));
        assert_eq!(d.candidates(&other), vec!["any", "fallback"]);
    }

    #[test]
    fn test_insert_last_registration_wins() {
        let mut d = Dispatcher::new();
        assert_eq!(d.insert(RouteKey::new("/x", Some("")), 1), None);
        assert_eq!(d.insert(RouteKey::new("/x", Some("")), 2), Some(1));
        assert_eq!(d.candidates(&Message::flag("/x")), vec![2]);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_insert_tag_uses_registry_shape() {
        let mut d = Dispatcher::new();
        assert!(d.insert_tag(Tag::Error, 'e'));
        assert!(d.insert_tag(Tag::SignalList, 'l'));
        assert!(!d.insert_tag(Tag::Illegal, 'x'));

        let err = Message::new("/error", ("/p", -1, "t"));
        assert_eq!(d.candidates(&err), vec!['e']);
        let list = Message::new("/signal/list", ("/prefix",));
        assert_eq!(d.candidates(&list), vec!['l']);
    }

    #[test]
    fn test_candidates_no_match_is_empty() {
        let d: Dispatcher<u8> = Dispatcher::new();
        assert!(d.candidates(&Message::flag("/nothing")).is_empty());
    }

    #[test]
    fn test_remove_where() {
        let mut d = Dispatcher::new();
        d.insert(RouteKey::new("/a", Some("f")), 1);
        d.insert(RouteKey::new("/a", Some("")), 1);
        d.insert(RouteKey::new("/b", Some("")), 2);
        assert_eq!(d.remove_where(|r| *r == 1), 2);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_addresses_with_prefix_dedups() {
        let mut d = Dispatcher::new();
        d.insert(RouteKey::new("/mix/gain", Some("f")), ());
        d.insert(RouteKey::new("/mix/gain", Some("")), ());
        d.insert(RouteKey::new("/mix/pan", Some("f")), ());
        d.insert(RouteKey::new("/other", None), ());
        assert_eq!(d.addresses_with_prefix("/mix/"), vec!["/mix/gain", "/mix/pan"]);
    }

    // =======================================================================
    // Error and reply processing
    // =======================================================================

    #[test]
    fn test_process_error_announce_deactivates() {
        let active = ActiveFlag::new(true);
        let mut rec = Recorder::default();
        let msg = Message::new("/error", ("/nsm/server/announce", -2, "incompatible API version"));

        assert!(process_error(&mut rec, &active, &msg));
        assert!(!active.get());
        assert_eq!(rec.errors, vec![("/nsm/server/announce".to_string(), ErrorCode::IncompatibleApi)]);
    }

    #[test]
    fn test_process_error_other_path_keeps_active() {
        let active = ActiveFlag::new(true);
        let mut rec = Recorder::default();
        let msg = Message::new("/error", ("/nsm/client/save", -1, "nope"));
        process_error(&mut rec, &active, &msg);
        assert!(active.get());
    }

    #[test]
    fn test_process_error_bad_signature_dropped() {
        let active = ActiveFlag::new(true);
        let mut rec = Recorder::default();
        let msg = Message::new("/error", ("/nsm/server/announce", "x"));
        assert!(!process_error(&mut rec, &active, &msg));
        assert!(rec.errors.is_empty());
        assert!(active.get());
    }

    #[test]
    fn test_process_reply_announce_activates() {
        let active = ActiveFlag::new(false);
        let mut rec = Recorder::default();
        let msg = Message::new(
            "/reply",
            ("/nsm/server/announce", "Acknowledged", "CoordinatorName", ":dirty:broadcast:"),
        );
        assert!(process_reply(&mut rec, &active, &msg, source()));
        assert!(active.get());
    }

    #[test]
    fn test_default_handle_reply_arity() {
        let one = Message::new("/reply", ("/nsm/server/announce",));
        let two = Message::new("/reply", ("/nsm/server/save", "done"));
        let three = Message::new("/reply", ("/a", "b", "c"));
        assert!(!default_handle_reply(&one, source()));
        assert!(default_handle_reply(&two, source()));
        assert!(!default_handle_reply(&three, source()));
    }

    #[test]
    fn test_process_reply_other_path_does_not_activate() {
        let active = ActiveFlag::new(false);
        let mut rec = Recorder::default();
        let msg = Message::new("/reply", ("/nsm/server/save", "done"));
        assert!(process_reply(&mut rec, &active, &msg, source()));
        assert!(!active.get());
    }
}
