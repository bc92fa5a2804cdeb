//! Append-only store for order event streams.
//!
//! One stream per order aggregate. Appends are checked against an
//! `ExpectedVersion`, which is how two racing order transitions are serialized.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
