//! Inputs: Identity, Action Model and Per-Frame History
//!
//! Client ids are plain strings ordered lexicographically - that ordering
//! decides both input application order inside a frame and authority
//! selection, so it must be identical on every participant.

pub mod action;
pub mod history;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Participant identity.
///
/// `Ord` is the lexicographic order of the underlying string; everything
/// that iterates clients (input application, authority selection) relies
/// on it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Prefix used for ids minted before a relay assigns one.
    pub const LOCAL_PREFIX: &'static str = "local-";

    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh local id (offline mode, pre-connect).
    pub fn local() -> Self {
        Self(format!("{}{}", Self::LOCAL_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Whether this id was locally minted.
    pub fn is_local(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }

    /// The id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = ClientId::new("alice");
        let b = ClientId::new("bob");
        let numeric = ClientId::new("10");
        let numeric2 = ClientId::new("9");
        assert!(a < b);
        // string order, NOT numeric order
        assert!(numeric < numeric2);
    }

    #[test]
    fn test_local_prefix() {
        let local = ClientId::local();
        assert!(local.is_local());
        assert!(local.as_str().starts_with("local-"));
        assert!(!ClientId::new("relay-42").is_local());
        // two mints never collide
        assert_ne!(ClientId::local(), ClientId::local());
    }
}
