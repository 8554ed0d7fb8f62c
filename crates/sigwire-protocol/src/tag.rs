//! The message-tag registry.
//!
//! Every operation the protocol knows about has a [`Tag`]. The registry
//! maps each tag to the wire address and argument signature used to send
//! it, and maps an incoming `(address, signature)` pair back to its tag.
//!
//! The table is a `const` slice, so it exists before `main` runs and can
//! never change afterwards.

use std::fmt;

// ---------------------------------------------------------------------------
// Null sentinel
// ---------------------------------------------------------------------------

/// The textual stand-in for "transport null" in tables and string
/// arguments. It is translated to `None` at the boundary and never sent
/// as payload.
pub const NIL: &str = "-";

/// The reverse-lookup pattern that matches any signature.
pub const WILDCARD: &str = "?";

/// Maps the `-` sentinel to `None`.
///
/// ```
/// use sigwire_protocol::nullable;
///
/// assert_eq!(nullable("-"), None);
/// assert_eq!(nullable("/signal/list"), Some("/signal/list"));
/// ```
pub fn nullable(s: &str) -> Option<&str> {
    if s == NIL { None } else { Some(s) }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// The argument signature stored for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    /// Exactly these type characters, in order. Empty means a flag
    /// message with no payload.
    Fixed(&'static str),

    /// Any argument list. Used for messages whose shape varies, such as
    /// `/signal/list` (optional prefix) or the signal-directory replies.
    Any,
}

impl Signature {
    /// Returns true if an incoming type string is acceptable.
    pub fn accepts(&self, types: &str) -> bool {
        match self {
            Self::Fixed(s) => *s == types,
            Self::Any => true,
        }
    }

    /// The fixed type string, or `None` for [`Signature::Any`].
    pub fn as_fixed(&self) -> Option<&'static str> {
        match self {
            Self::Fixed(s) => Some(s),
            Self::Any => None,
        }
    }

    /// Parses a table-style pattern: `-` is [`Signature::Any`], `?` is the
    /// reverse-lookup wildcard (`None`), anything else is compared as a
    /// type string.
    pub fn from_pattern(pattern: &str) -> Option<SignatureQuery<'_>> {
        match pattern {
            WILDCARD => None,
            NIL => Some(SignatureQuery::Any),
            s => Some(SignatureQuery::Types(s)),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(s) => f.write_str(s),
            Self::Any => f.write_str(NIL),
        }
    }
}

/// A signature to search for during reverse lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureQuery<'a> {
    /// Match entries registered with [`Signature::Any`].
    Any,
    /// Match entries registered with exactly this type string.
    Types(&'a str),
}

impl SignatureQuery<'_> {
    fn matches(&self, sig: &Signature) -> bool {
        match (self, sig) {
            (Self::Any, Signature::Any) => true,
            (Self::Types(t), Signature::Fixed(s)) => t == s,
            _ => false,
        }
    }
}

impl From<Signature> for SignatureQuery<'static> {
    fn from(sig: Signature) -> Self {
        match sig {
            Signature::Fixed(s) => Self::Types(s),
            Signature::Any => Self::Any,
        }
    }
}

impl<'a> From<&'a str> for SignatureQuery<'a> {
    fn from(types: &'a str) -> Self {
        Self::Types(types)
    }
}

/// The wire address and signature registered for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSpec {
    pub address: &'static str,
    pub signature: Signature,
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// A protocol operation.
///
/// Variants are grouped the way the session manager family groups them:
/// messages a session client receives or sends, server control, the GUI
/// protocol, the proxy client, the signal directory, and a few others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    // Session client
    ClientIsClean,
    ClientIsDirty,
    ClientHideGui,
    ClientLabel,
    ClientLoaded,
    ClientMessage,
    ClientOpen,
    ClientProgress,
    ClientSave,
    ClientShowGui,
    GuiIsHidden,
    GuiIsShown,
    Error,
    Reply,
    ReplyEx,

    // Server control
    ServerAbort,
    ServerAdd,
    ServerAnnounce,
    ServerBroadcast,
    ServerClose,
    ServerDuplicate,
    ServerList,
    ServerNew,
    ServerOpen,
    ServerQuit,
    ServerReply,
    ServerSave,

    // GUI protocol
    GuiAnnounce,
    GuiAnnounceUrl,
    GuiControlAnnounce,
    GuiServerAnnounce,
    GuiServerMessage,
    GuiClientDirty,
    GuiClientHide,
    GuiClientLabel,
    GuiClientMessage,
    GuiClientNew,
    GuiClientHasOptionalGui,
    GuiClientProgress,
    GuiClientRemove,
    GuiClientResume,
    GuiClientSave,
    GuiClientShow,
    GuiClientStatus,
    GuiClientStop,
    GuiClientSwitch,
    GuiClientVisible,
    GuiSession,
    GuiSessionName,
    GuiSessionRoot,

    // Proxy client
    ProxyArguments,
    ProxyConfigFile,
    ProxyClientError,
    ProxyExecutable,
    ProxyKill,
    ProxyLabel,
    ProxySaveSignal,
    ProxyStart,
    ProxyStopSignal,
    ProxyUpdate,

    // Signal directory
    SignalHello,
    SignalConnect,
    SignalCreated,
    SignalDisconnect,
    SignalList,
    SignalRemoved,
    SignalRenamed,
    SignalReply,

    // Miscellaneous
    MixerAddStrip,
    NonHello,
    OscPing,
    SessionList,
    SessionName,

    /// Lookup failure. Has no registry entry.
    Illegal,
}

const fn fixed(address: &'static str, types: &'static str) -> MessageSpec {
    MessageSpec {
        address,
        signature: Signature::Fixed(types),
    }
}

const fn any(address: &'static str) -> MessageSpec {
    MessageSpec {
        address,
        signature: Signature::Any,
    }
}

/// The full registry, in search order. Reverse lookups that match several
/// entries (a wildcard query on `/reply`, say) return the first one.
const REGISTRY: &[(Tag, MessageSpec)] = &[
    (Tag::ClientIsClean, fixed("/nsm/client/is_clean", "")),
    (Tag::ClientIsDirty, fixed("/nsm/client/is_dirty", "")),
    (Tag::ClientHideGui, fixed("/nsm/client/hide_optional_gui", "")),
    (Tag::ClientLabel, fixed("/nsm/client/label", "s")),
    (Tag::ClientLoaded, fixed("/nsm/client/session_is_loaded", "")),
    (Tag::ClientMessage, fixed("/nsm/client/message", "is")),
    (Tag::ClientOpen, fixed("/nsm/client/open", "sss")),
    (Tag::ClientProgress, fixed("/nsm/client/progress", "f")),
    (Tag::ClientSave, fixed("/nsm/client/save", "")),
    (Tag::ClientShowGui, fixed("/nsm/client/show_optional_gui", "")),
    (Tag::GuiIsHidden, fixed("/nsm/client/gui_is_hidden", "")),
    (Tag::GuiIsShown, fixed("/nsm/client/gui_is_shown", "")),
    (Tag::Error, fixed("/error", "sis")),
    (Tag::Reply, fixed("/reply", "ss")),
    (Tag::ReplyEx, fixed("/reply", "ssss")),
    (Tag::ServerAbort, fixed("/nsm/server/abort", "")),
    (Tag::ServerAdd, fixed("/nsm/server/add", "s")),
    (Tag::ServerAnnounce, fixed("/nsm/server/announce", "sssiii")),
    (Tag::ServerBroadcast, any("/nsm/server/broadcast")),
    (Tag::ServerClose, fixed("/nsm/server/close", "")),
    (Tag::ServerDuplicate, fixed("/nsm/server/duplicate", "s")),
    (Tag::ServerList, fixed("/nsm/server/list", "")),
    (Tag::ServerNew, fixed("/nsm/server/new", "s")),
    (Tag::ServerOpen, fixed("/nsm/server/open", "s")),
    (Tag::ServerQuit, fixed("/nsm/server/quit", "")),
    (Tag::ServerReply, fixed("/reply", "s")),
    (Tag::ServerSave, fixed("/nsm/server/save", "")),
    (Tag::GuiAnnounce, fixed("/nsm/gui/gui_announce", "")),
    (Tag::GuiAnnounceUrl, fixed("/nsm/gui/gui_announce", "s")),
    (Tag::GuiControlAnnounce, fixed("/nsm/gui/server/announce", "s")),
    (Tag::GuiServerAnnounce, fixed("/nsm/gui/server_announce", "s")),
    (Tag::GuiServerMessage, fixed("/nsm/gui/server/message", "s")),
    (Tag::GuiClientDirty, fixed("/nsm/gui/client/dirty", "si")),
    (Tag::GuiClientHide, fixed("/nsm/gui/client/hide_optional_gui", "s")),
    (Tag::GuiClientLabel, fixed("/nsm/gui/client/label", "ss")),
    (Tag::GuiClientMessage, fixed("/nsm/gui/client/message", "s")),
    (Tag::GuiClientNew, fixed("/nsm/gui/client/new", "ss")),
    (Tag::GuiClientHasOptionalGui, fixed("/nsm/gui/client/has_optional_gui", "s")),
    (Tag::GuiClientProgress, fixed("/nsm/gui/client/progress", "sf")),
    (Tag::GuiClientRemove, fixed("/nsm/gui/client/remove", "s")),
    (Tag::GuiClientResume, fixed("/nsm/gui/client/resume", "s")),
    (Tag::GuiClientSave, fixed("/nsm/gui/client/save", "s")),
    (Tag::GuiClientShow, fixed("/nsm/gui/client/show_optional_gui", "s")),
    (Tag::GuiClientStatus, fixed("/nsm/gui/client/status", "ss")),
    (Tag::GuiClientStop, fixed("/nsm/gui/client/stop", "s")),
    (Tag::GuiClientSwitch, fixed("/nsm/gui/client/switch", "ss")),
    (Tag::GuiClientVisible, fixed("/nsm/gui/client/gui_visible", "si")),
    (Tag::GuiSession, fixed("/nsm/gui/session/session", "s")),
    (Tag::GuiSessionName, fixed("/nsm/gui/session/name", "ss")),
    (Tag::GuiSessionRoot, fixed("/nsm/gui/session/root", "s")),
    (Tag::ProxyArguments, fixed("/nsm/proxy/arguments", "s")),
    (Tag::ProxyConfigFile, fixed("/nsm/proxy/config_file", "s")),
    (Tag::ProxyClientError, fixed("/nsm/proxy/client_error", "s")),
    (Tag::ProxyExecutable, fixed("/nsm/proxy/executable", "s")),
    (Tag::ProxyKill, fixed("/nsm/proxy/kill", "")),
    (Tag::ProxyLabel, fixed("/nsm/proxy/label", "s")),
    (Tag::ProxySaveSignal, fixed("/nsm/proxy/save_signal", "i")),
    (Tag::ProxyStart, fixed("/nsm/proxy/start", "sss")),
    (Tag::ProxyStopSignal, fixed("/nsm/proxy/stop_signal", "i")),
    (Tag::ProxyUpdate, fixed("/nsm/proxy/update", "")),
    (Tag::SignalHello, fixed("/signal/hello", "ss")),
    (Tag::SignalConnect, fixed("/signal/connect", "ss")),
    (Tag::SignalCreated, fixed("/signal/created", "ssfff")),
    (Tag::SignalDisconnect, fixed("/signal/disconnect", "ss")),
    (Tag::SignalList, any("/signal/list")),
    (Tag::SignalRemoved, fixed("/signal/removed", "s")),
    (Tag::SignalRenamed, fixed("/signal/renamed", "ss")),
    (Tag::SignalReply, any("/reply")),
    (Tag::MixerAddStrip, fixed("/non/mixer/add_strip", "")),
    (Tag::NonHello, fixed("/non/hello", "ssss")),
    (Tag::OscPing, fixed("/osc/ping", "")),
    (Tag::SessionList, any("/nsm/session/list")),
    (Tag::SessionName, fixed("/nsm/session/name", "ss")),
];

impl Tag {
    /// Looks up the wire address and signature for this tag.
    ///
    /// Returns `None` only for [`Tag::Illegal`].
    pub fn spec(self) -> Option<MessageSpec> {
        REGISTRY
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, spec)| *spec)
    }

    /// The wire address, or `""` for [`Tag::Illegal`].
    pub fn address(self) -> &'static str {
        self.spec().map(|s| s.address).unwrap_or("")
    }

    /// Finds the tag registered for an address and signature.
    ///
    /// A `None` signature is the wildcard: the first entry with a
    /// matching address wins. Unknown input yields [`Tag::Illegal`].
    ///
    /// ```
    /// use sigwire_protocol::Tag;
    ///
    /// assert_eq!(Tag::reverse_lookup("/error", Some("sis".into())), Tag::Error);
    /// assert_eq!(Tag::reverse_lookup("/nowhere", None), Tag::Illegal);
    /// ```
    pub fn reverse_lookup(address: &str, signature: Option<SignatureQuery<'_>>) -> Tag {
        reverse_lookup_in(REGISTRY.iter().map(|(t, s)| (*t, s)), address, signature)
    }

    /// Reverse lookup with a table-style pattern (`?` wildcard, `-` for
    /// entries that accept any signature).
    pub fn reverse_lookup_pattern(address: &str, pattern: &str) -> Tag {
        Self::reverse_lookup(address, Signature::from_pattern(pattern))
    }

    /// Maps a controller command name (`save`, `open`, `stop`, ...) to its
    /// tag. Unknown names give [`Tag::Illegal`].
    pub fn from_command(name: &str) -> Tag {
        COMMANDS
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.tag)
            .unwrap_or(Tag::Illegal)
    }

    /// Returns true if the named command addresses a single client
    /// rather than the whole session.
    pub fn command_is_client(name: &str) -> bool {
        COMMANDS.iter().any(|c| c.name == name && c.client)
    }

    /// Returns true if the named command takes an argument (a client id,
    /// a session name or an executable).
    pub fn command_needs_argument(name: &str) -> bool {
        Self::command_is_client(name) || matches!(name, "open" | "new" | "duplicate" | "add")
    }

    /// Every registered tag, in table order.
    pub fn all() -> impl Iterator<Item = Tag> {
        REGISTRY.iter().map(|(t, _)| *t)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.spec() {
            Some(spec) => f.write_str(spec.address),
            None => f.write_str("<illegal>"),
        }
    }
}

fn reverse_lookup_in<'s>(
    entries: impl Iterator<Item = (Tag, &'s MessageSpec)>,
    address: &str,
    signature: Option<SignatureQuery<'_>>,
) -> Tag {
    for (tag, spec) in entries {
        if spec.address != address {
            continue;
        }
        match &signature {
            None => return tag,
            Some(query) if query.matches(&spec.signature) => return tag,
            Some(_) => {}
        }
    }
    Tag::Illegal
}

/// Tag reported to the coordinator for a change of dirty state.
pub fn dirtiness_tag(dirty: bool) -> Tag {
    if dirty { Tag::ClientIsDirty } else { Tag::ClientIsClean }
}

/// Tag reported to the coordinator for a change of GUI visibility.
pub fn visibility_tag(visible: bool) -> Tag {
    if visible { Tag::GuiIsShown } else { Tag::GuiIsHidden }
}

// ---------------------------------------------------------------------------
// Subsets
// ---------------------------------------------------------------------------

/// A named subset of the registry.
///
/// Several operations share an address and differ only by role (the
/// `/reply` family, for instance). Restricting a lookup to the set a
/// participant actually speaks avoids false matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagSet {
    All,
    Client,
    Server,
    Signal,
    Gui,
    Proxy,
}

const CLIENT_TAGS: &[Tag] = &[
    Tag::ClientIsClean,
    Tag::ClientIsDirty,
    Tag::ClientHideGui,
    Tag::ClientLabel,
    Tag::ClientLoaded,
    Tag::ClientMessage,
    Tag::ClientOpen,
    Tag::ClientProgress,
    Tag::ClientSave,
    Tag::ClientShowGui,
    Tag::Error,
    Tag::GuiIsHidden,
    Tag::GuiIsShown,
    Tag::Reply,
    Tag::ReplyEx,
];

const SERVER_TAGS: &[Tag] = &[
    Tag::SignalReply,
    Tag::ServerAbort,
    Tag::ServerAdd,
    Tag::ServerAnnounce,
    Tag::ServerBroadcast,
    Tag::ServerClose,
    Tag::ServerDuplicate,
    Tag::ServerList,
    Tag::ServerNew,
    Tag::ServerOpen,
    Tag::ServerQuit,
    Tag::ServerSave,
];

const SIGNAL_TAGS: &[Tag] = &[
    Tag::Reply,
    Tag::SignalConnect,
    Tag::SignalCreated,
    Tag::SignalDisconnect,
    Tag::SignalHello,
    Tag::SignalList,
    Tag::SignalRemoved,
    Tag::SignalRenamed,
    Tag::SignalReply,
];

const GUI_TAGS: &[Tag] = &[
    Tag::GuiAnnounceUrl,
    Tag::GuiClientDirty,
    Tag::GuiClientHide,
    Tag::GuiClientLabel,
    Tag::GuiClientMessage,
    Tag::GuiClientNew,
    Tag::GuiClientHasOptionalGui,
    Tag::GuiClientProgress,
    Tag::GuiClientRemove,
    Tag::GuiClientResume,
    Tag::GuiClientSave,
    Tag::GuiClientShow,
    Tag::GuiClientStatus,
    Tag::GuiClientStop,
    Tag::GuiClientSwitch,
    Tag::GuiClientVisible,
    Tag::GuiSession,
    Tag::GuiSessionName,
    Tag::GuiSessionRoot,
];

const PROXY_TAGS: &[Tag] = &[
    Tag::ProxyArguments,
    Tag::ProxyConfigFile,
    Tag::ProxyClientError,
    Tag::ProxyExecutable,
    Tag::ProxyKill,
    Tag::ProxyLabel,
    Tag::ProxySaveSignal,
    Tag::ProxyStart,
    Tag::ProxyStopSignal,
    Tag::ProxyUpdate,
];

impl TagSet {
    fn members(self) -> Option<&'static [Tag]> {
        match self {
            Self::All => None,
            Self::Client => Some(CLIENT_TAGS),
            Self::Server => Some(SERVER_TAGS),
            Self::Signal => Some(SIGNAL_TAGS),
            Self::Gui => Some(GUI_TAGS),
            Self::Proxy => Some(PROXY_TAGS),
        }
    }

    /// Returns true if `tag` belongs to this set.
    pub fn contains(self, tag: Tag) -> bool {
        match self.members() {
            Some(members) => members.contains(&tag),
            None => tag != Tag::Illegal,
        }
    }

    /// Members of the set, in registry order.
    pub fn tags(self) -> Vec<Tag> {
        Tag::all().filter(|t| self.contains(*t)).collect()
    }

    /// Like [`Tag::spec`], but only for members of this set.
    pub fn lookup(self, tag: Tag) -> Option<MessageSpec> {
        if self.contains(tag) { tag.spec() } else { None }
    }

    /// Like [`Tag::reverse_lookup`], but only among members of this set.
    pub fn reverse_lookup(self, address: &str, signature: Option<SignatureQuery<'_>>) -> Tag {
        reverse_lookup_in(
            REGISTRY
                .iter()
                .filter(|(t, _)| self.contains(*t))
                .map(|(t, s)| (*t, s)),
            address,
            signature,
        )
    }
}

// ---------------------------------------------------------------------------
// Controller command names
// ---------------------------------------------------------------------------

struct Command {
    name: &'static str,
    client: bool,
    tag: Tag,
}

const COMMANDS: &[Command] = &[
    Command { name: "guisave", client: true, tag: Tag::GuiClientSave },
    Command { name: "show", client: true, tag: Tag::GuiClientShow },
    Command { name: "hide", client: true, tag: Tag::GuiClientHide },
    Command { name: "remove", client: true, tag: Tag::GuiClientRemove },
    Command { name: "resume", client: true, tag: Tag::GuiClientResume },
    Command { name: "stop", client: true, tag: Tag::GuiClientStop },
    Command { name: "abort", client: false, tag: Tag::ServerAbort },
    Command { name: "close", client: false, tag: Tag::ServerClose },
    Command { name: "save", client: false, tag: Tag::ServerSave },
    Command { name: "open", client: false, tag: Tag::ServerOpen },
    Command { name: "duplicate", client: false, tag: Tag::ServerDuplicate },
    Command { name: "quit", client: false, tag: Tag::ServerQuit },
    Command { name: "list", client: false, tag: Tag::ServerList },
    Command { name: "new", client: false, tag: Tag::ServerNew },
    Command { name: "add", client: false, tag: Tag::ServerAdd },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    // =======================================================================
    // Forward and reverse lookup
    // =======================================================================

    #[test]
    fn test_reverse_lookup_every_tag_round_trips() {
        for tag in Tag::all() {
            let spec = tag.spec().expect("registered tag must have a spec");
            let found = Tag::reverse_lookup(spec.address, Some(spec.signature.into()));
            assert_eq!(found, tag, "round trip failed for {tag:?}");
        }
    }

    #[test]
    fn test_registry_pairs_are_unique() {
        let mut seen = HashSet::new();
        for tag in Tag::all() {
            let spec = tag.spec().unwrap();
            assert!(
                seen.insert((spec.address, spec.signature)),
                "{tag:?} duplicates another entry"
            );
        }
    }

    #[test]
    fn test_spec_illegal_is_none() {
        assert!(Tag::Illegal.spec().is_none());
        assert_eq!(Tag::Illegal.address(), "");
    }

    #[test]
    fn test_reverse_lookup_unknown_address_is_illegal() {
        assert_eq!(Tag::reverse_lookup("/no/such/thing", None), Tag::Illegal);
        assert_eq!(Tag::reverse_lookup("", Some("".into())), Tag::Illegal);
        assert_eq!(Tag::reverse_lookup("/error", Some("ss".into())), Tag::Illegal);
    }

    #[test]
    fn test_reverse_lookup_wildcard_matches_address_only() {
        assert_eq!(Tag::reverse_lookup("/error", None), Tag::Error);
        // `/reply` has four shapes; the wildcard takes the first.
        assert_eq!(Tag::reverse_lookup("/reply", None), Tag::Reply);
    }

    #[test]
    fn test_reverse_lookup_any_signature_entry() {
        assert_eq!(
            Tag::reverse_lookup("/reply", Some(SignatureQuery::Any)),
            Tag::SignalReply
        );
        assert_eq!(
            Tag::reverse_lookup("/signal/list", Some(SignatureQuery::Any)),
            Tag::SignalList
        );
    }

    #[test]
    fn test_reverse_lookup_pattern_sentinels() {
        assert_eq!(Tag::reverse_lookup_pattern("/reply", "?"), Tag::Reply);
        assert_eq!(Tag::reverse_lookup_pattern("/reply", "-"), Tag::SignalReply);
        assert_eq!(Tag::reverse_lookup_pattern("/reply", "ssss"), Tag::ReplyEx);
    }

    #[test]
    fn test_spec_canonical_shapes() {
        let announce = Tag::ServerAnnounce.spec().unwrap();
        assert_eq!(announce.address, "/nsm/server/announce");
        assert_eq!(announce.signature, Signature::Fixed("sssiii"));

        let created = Tag::SignalCreated.spec().unwrap();
        assert_eq!(created.signature, Signature::Fixed("ssfff"));

        assert_eq!(Tag::ClientSave.spec().unwrap().signature, Signature::Fixed(""));
        assert_eq!(Tag::SignalList.spec().unwrap().signature, Signature::Any);
    }

    // =======================================================================
    // Subsets
    // =======================================================================

    #[test]
    fn test_tagset_lookup_outside_set_is_none() {
        assert!(TagSet::Client.lookup(Tag::ClientOpen).is_some());
        assert!(TagSet::Client.lookup(Tag::ServerAnnounce).is_none());
        assert!(TagSet::Server.lookup(Tag::ServerAnnounce).is_some());
    }

    #[test]
    fn test_tagset_reverse_lookup_respects_role() {
        // `/reply` with one string is a server reply, not a client one.
        assert_eq!(Tag::reverse_lookup("/reply", Some("s".into())), Tag::ServerReply);
        assert_eq!(
            TagSet::Client.reverse_lookup("/reply", Some("s".into())),
            Tag::Illegal
        );
        assert_eq!(TagSet::Server.reverse_lookup("/reply", None), Tag::ServerReply);
        assert_eq!(TagSet::Signal.reverse_lookup("/reply", None), Tag::Reply);
    }

    #[test]
    fn test_tagset_all_has_every_tag() {
        assert_eq!(TagSet::All.tags().len(), REGISTRY.len());
        assert!(!TagSet::All.contains(Tag::Illegal));
    }

    #[test]
    fn test_tagset_members_are_registered() {
        for set in [TagSet::Client, TagSet::Server, TagSet::Signal, TagSet::Gui, TagSet::Proxy] {
            for tag in set.tags() {
                assert!(tag.spec().is_some(), "{tag:?} in {set:?} is unregistered");
            }
        }
    }

    // =======================================================================
    // Commands and helpers
    // =======================================================================

    #[test]
    fn test_from_command_known_and_unknown() {
        assert_eq!(Tag::from_command("save"), Tag::ServerSave);
        assert_eq!(Tag::from_command("stop"), Tag::GuiClientStop);
        assert_eq!(Tag::from_command("explode"), Tag::Illegal);
    }

    #[test]
    fn test_command_needs_argument() {
        assert!(Tag::command_needs_argument("open"));
        assert!(Tag::command_needs_argument("hide"));
        assert!(Tag::command_needs_argument("add"));
        assert!(!Tag::command_needs_argument("quit"));
        assert!(!Tag::command_needs_argument("list"));
        assert!(!Tag::command_needs_argument("bogus"));
    }

    #[test]
    fn test_dirtiness_and_visibility_tags() {
        assert_eq!(dirtiness_tag(true).address(), "/nsm/client/is_dirty");
        assert_eq!(dirtiness_tag(false).address(), "/nsm/client/is_clean");
        assert_eq!(visibility_tag(true), Tag::GuiIsShown);
        assert_eq!(visibility_tag(false), Tag::GuiIsHidden);
    }

    #[test]
    fn test_nullable_translates_sentinel() {
        assert_eq!(nullable(NIL), None);
        assert_eq!(nullable("x"), Some("x"));
    }

    #[test]
    fn test_display_prints_address() {
        assert_eq!(Tag::SignalHello.to_string(), "/signal/hello");
        assert_eq!(Tag::Illegal.to_string(), "<illegal>");
    }
}
