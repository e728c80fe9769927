//! Relay Protocol and Reference Relay
//!
//! The transport itself is an external collaborator; this module pins
//! the contract it must satisfy (message kinds, framing, sequencing) and
//! ships an in-memory reference relay for tests and the demo.

pub mod protocol;
pub mod relay;

pub use protocol::{
    FromRelay, SnapshotEnvelope, TickEnvelope, TickInput, ToRelay, PROTOCOL_VERSION,
};
pub use relay::{MemoryRelay, RelayEndpoint, Transport};
