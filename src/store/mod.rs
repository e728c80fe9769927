//! Entity-Component-Store
//!
//! Columnar world state with deterministic id allocation, ordered
//! queries, a six-phase system scheduler, snapshot serialization and
//! state hashing. The store is the unit of agreement between
//! participants: identical inputs against identical stores produce
//! identical state hashes.

pub mod component;
pub mod entity;
pub mod interner;
pub mod schedule;
pub mod snapshot;
#[allow(clippy::module_inception)]
pub mod store;

pub use component::{ComponentDef, FieldDef, ScalarType, Value};
pub use entity::{EntityId, IdAllocator};
pub use schedule::Phase;
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};
pub use store::{FieldRef, Store, MAX_STORE_ENTITIES};
