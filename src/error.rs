//! Engine Error Taxonomy
//!
//! A single closed set of failure kinds shared by every subsystem.
//! Propagation policy: errors inside a tick abort the frame (the caller
//! restores its pre-tick snapshot); a failed rollback escalates to a full
//! resync; transient transport failures are retried with backoff.

use thiserror::Error;

/// Closed set of engine failure kinds.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Malformed or incompatible wire data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The deterministic contract was broken (hash mismatch after a
    /// snapshot load, forbidden operation inside a tick).
    #[error("determinism violation: {0}")]
    Determinism(String),

    /// A fixed-capacity resource ran out (entity-id space, ring buffers).
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// API misuse by the embedding game (unregistered component, missing
    /// client-id resolver).
    #[error("programmer error: {0}")]
    Programmer(String),

    /// Recoverable transport failure (relay disconnected).
    #[error("transient transport failure: {0}")]
    Transient(String),
}

/// Discriminant for matching on the failure kind without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad framing or version.
    Protocol,
    /// Broken determinism contract.
    Determinism,
    /// Capacity exhausted.
    Resource,
    /// API misuse.
    Programmer,
    /// Retryable transport failure.
    Transient,
}

impl EngineError {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Protocol(_) => ErrorKind::Protocol,
            EngineError::Determinism(_) => ErrorKind::Determinism,
            EngineError::Resource(_) => ErrorKind::Resource,
            EngineError::Programmer(_) => ErrorKind::Programmer,
            EngineError::Transient(_) => ErrorKind::Transient,
        }
    }

    /// Whether a retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Crate-wide result alias.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            EngineError::Protocol("bad version".into()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            EngineError::Programmer("no resolver".into()).kind(),
            ErrorKind::Programmer
        );
        assert!(EngineError::Transient("relay gone".into()).is_transient());
        assert!(!EngineError::Determinism("hash mismatch".into()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = EngineError::Resource("entity-id space full".into());
        assert_eq!(err.to_string(), "resource exhausted: entity-id space full");
    }
}
