//! Capability strings exchanged during the announce handshake.
//!
//! A capability list is written as colon-delimited names with a colon at
//! each end: `":dirty:message:optional-gui:"`. Clients announce theirs;
//! the coordinator answers with its own (`":server-control:broadcast:"`).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One capability name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Client can switch sessions without restarting.
    Switch,
    /// Client reports dirty/clean state.
    Dirty,
    /// Client sends status messages.
    Message,
    /// Client has a GUI that can be shown and hidden.
    OptionalGui,
    /// Client reports save/open progress.
    Progress,
    /// Coordinator relays `/nsm/server/broadcast`.
    Broadcast,
    /// Coordinator accepts server-control commands from clients.
    ServerControl,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Dirty => "dirty",
            Self::Message => "message",
            Self::OptionalGui => "optional-gui",
            Self::Progress => "progress",
            Self::Broadcast => "broadcast",
            Self::ServerControl => "server-control",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "switch" => Some(Self::Switch),
            "dirty" => Some(Self::Dirty),
            "message" => Some(Self::Message),
            "optional-gui" => Some(Self::OptionalGui),
            "progress" => Some(Self::Progress),
            "broadcast" => Some(Self::Broadcast),
            "server-control" => Some(Self::ServerControl),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of capabilities.
///
/// Unknown names survive a parse/format cycle so a coordinator's newer
/// capabilities are not lost when logged or echoed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    known: BTreeSet<Capability>,
    unknown: Vec<String>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, cap: Capability) -> Self {
        self.known.insert(cap);
        self
    }

    pub fn insert(&mut self, cap: Capability) {
        self.known.insert(cap);
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.known.contains(&cap)
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.unknown.is_empty()
    }

    /// Parses a capability list. Never fails: empty segments are skipped
    /// and unrecognized names are kept verbatim.
    pub fn parse(s: &str) -> Self {
        let mut caps = Self::default();
        for name in s.split(':').filter(|n| !n.is_empty()) {
            match Capability::parse(name) {
                Some(cap) => {
                    caps.known.insert(cap);
                }
                None => {
                    if !caps.unknown.iter().any(|u| u == name) {
                        caps.unknown.push(name.to_string());
                    }
                }
            }
        }
        caps
    }
}

impl FromStr for Capabilities {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str(":")?;
        for cap in &self.known {
            write!(f, "{cap}:")?;
        }
        for name in &self.unknown {
            write!(f, "{name}:")?;
        }
        Ok(())
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            known: iter.into_iter().collect(),
            unknown: Vec::new(),
        }
    }
}
