//! Random client ids from a format string.
//!
//! Each `-` in the format becomes a random upper-case letter and every
//! other character is kept, so `"n----"` yields ids like `"nQWRT"`.

use std::collections::HashSet;

use rand::Rng;

use crate::SessionError;

/// Fills every `-` in `format` with a random letter `A`–`Z`.
///
/// Returns an empty string when the format has no `-`. Ids from separate
/// calls may collide; use [`ClientIdGenerator`] when they must not.
pub fn generate_client_id(format: &str) -> String {
    if !format.contains('-') {
        return String::new();
    }
    let mut rng = rand::rng();
    format
        .chars()
        .map(|c| if c == '-' { char::from(b'A' + rng.random_range(0..26u8)) } else { c })
        .collect()
}

/// Hands out client ids that are unique for the generator's lifetime.
#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    issued: HashSet<String>,
}

impl ClientIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates an id not handed out before by this generator.
    ///
    /// An empty string when the format has no `-`.
    ///
    /// # Errors
    /// [`SessionError::ClientIdsExhausted`] once every id the format can
    /// produce is taken.
    pub fn generate(&mut self, format: &str) -> Result<String, SessionError> {
        let slots = format.chars().filter(|&c| c == '-').count();
        if slots == 0 {
            return Ok(String::new());
        }
        if self.capacity_reached(format, slots) {
            return Err(SessionError::ClientIdsExhausted(format.to_string()));
        }
        loop {
            let id = generate_client_id(format);
            if self.issued.insert(id.clone()) {
                return Ok(id);
            }
        }
    }

    /// Marks `id` as taken, e.g. one loaded from a saved session.
    pub fn reserve(&mut self, id: impl Into<String>) -> bool {
        self.issued.insert(id.into())
    }

    pub fn is_issued(&self, id: &str) -> bool {
        self.issued.contains(id)
    }

    fn capacity_reached(&self, format: &str, slots: usize) -> bool {
        let Some(capacity) = u32::try_from(slots).ok().and_then(|n| 26usize.checked_pow(n)) else {
            return false;
        };
        let len = format.chars().count();
        let used = self
            .issued
            .iter()
            .filter(|id| id.chars().count() == len && fits(format, id))
            .count();
        used >= capacity
    }
}

/// Whether `id` could have come from `format`.
fn fits(format: &str, id: &str) -> bool {
    format
        .chars()
        .zip(id.chars())
        .all(|(f, c)| if f == '-' { c.is_ascii_uppercase() } else { f == c })
}
