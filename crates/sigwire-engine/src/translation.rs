//! The translation table: incoming addresses mapped onto local signals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cached value of a translation nothing has flowed through yet.
pub const NO_VALUE: f32 = -1.0;

/// One routing rule. The key it is stored under is the source address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    /// Address of the local signal values are forwarded to.
    pub destination: String,
    /// Last value relayed or fed back.
    pub current_value: f32,
    /// Set when a value is relayed in, consumed by the next feedback push
    /// so the value doesn't echo back to where it came from.
    pub suppress_feedback: bool,
}

impl Translation {
    fn new(destination: String) -> Self {
        Self {
            destination,
            current_value: NO_VALUE,
            suppress_feedback: false,
        }
    }
}

/// Source address → translation. At most one destination per source.
///
/// Iteration is in source order, so [`TranslationTable::nth`] is stable
/// between edits.
#[derive(Debug, Clone, Default)]
pub struct TranslationTable {
    entries: BTreeMap<String, Translation>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `source` at `destination`. An existing entry for `source`
    /// keeps its cached value and flag.
    pub fn add(&mut self, source: impl Into<String>, destination: impl Into<String>) {
        let destination = destination.into();
        self.entries
            .entry(source.into())
            .and_modify(|t| t.destination.clone_from(&destination))
            .or_insert_with(|| Translation::new(destination));
    }

    pub fn remove(&mut self, source: &str) -> Option<Translation> {
        self.entries.remove(source)
    }

    /// Removes every translation pointing at `destination`. Returns how
    /// many went.
    pub fn remove_destination(&mut self, destination: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, t| t.destination != destination);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, source: &str) -> Option<&Translation> {
        self.entries.get(source)
    }

    pub(crate) fn get_mut(&mut self, source: &str) -> Option<&mut Translation> {
        self.entries.get_mut(source)
    }

    /// The `n`th translation as `(source, destination)`.
    pub fn nth(&self, n: usize) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .nth(n)
            .map(|(s, t)| (s.as_str(), t.destination.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sources that feed `destination`.
    pub fn connections(&self, destination: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, t)| t.destination == destination)
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Rewrites every translation whose destination is `old`. Returns how
    /// many changed.
    pub fn rename_destination(&mut self, old: &str, new: &str) -> usize {
        let mut changed = 0;
        for t in self.entries.values_mut().filter(|t| t.destination == old) {
            t.destination = new.to_string();
            changed += 1;
        }
        changed
    }

    /// Moves the entry keyed by `old` to `new`, replacing anything already
    /// at `new`.
    pub fn rename_source(&mut self, old: &str, new: &str) -> bool {
        match self.entries.remove(old) {
            Some(t) => {
                self.entries.insert(new.to_string(), t);
                true
            }
            None => false,
        }
    }

    /// Mutable access to every translation feeding `destination`, with
    /// its source.
    pub(crate) fn feeding_mut<'a>(
        &'a mut self,
        destination: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a mut Translation)> + 'a {
        self.entries.iter_mut().filter(move |(_, t)| t.destination == destination)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Translation)> {
        self.entries.iter().map(|(s, t)| (s.as_str(), t))
    }
}
