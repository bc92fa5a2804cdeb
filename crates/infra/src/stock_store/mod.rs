//! Stock counters: the atomic conditional reserve and the idempotent release.
//!
//! Both primitives append their `StockRecord` in the same atomic unit as the
//! counter change, so the audit log can never disagree with the counters.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use storefront_catalog::{Actor, ReleaseRef, StockKey, StockLevel, StockReason, StockRecord};

pub use in_memory::InMemoryStockStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStockStore;

/// Who changed the stock, why, and on behalf of which order or checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMutation {
    pub reason: StockReason,
    pub actor: Actor,
    pub reference: String,
    pub at: DateTime<Utc>,
}

impl StockMutation {
    pub fn new(reason: StockReason, actor: Actor, reference: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            reason,
            actor,
            reference: reference.into(),
            at,
        }
    }
}

/// Outcome of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    Applied(StockRecord),
    /// The release reference was applied before; nothing changed.
    AlreadyApplied,
}

#[derive(Debug, Error)]
pub enum StockStoreError {
    #[error("insufficient stock for {key}: requested {requested}, available {available}")]
    Insufficient {
        key: StockKey,
        requested: u32,
        available: u32,
    },

    #[error("no stock counter for {0}")]
    UnknownKey(StockKey),

    #[error("quantity must be positive")]
    ZeroQuantity,

    #[error("stock store unavailable: {0}")]
    Unavailable(String),
}

pub trait StockStore: Send + Sync {
    /// Decrement stock by `quantity` only if at least `quantity` is available.
    ///
    /// One conditional write: on failure nothing changes and `Insufficient`
    /// carries what was available at that moment.
    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError>;

    /// Give back `quantity` units. Applied at most once per `release_ref`.
    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        release_ref: &ReleaseRef,
        mutation: &StockMutation,
    ) -> Result<Released, StockStoreError>;

    /// Unconditional increment for new inventory.
    fn restock(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError>;

    fn level(&self, key: StockKey) -> Result<Option<StockLevel>, StockStoreError>;

    /// Audit entries for `key`, oldest first.
    fn records(&self, key: StockKey) -> Result<Vec<StockRecord>, StockStoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        (**self).reserve(key, quantity, mutation)
    }

    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        release_ref: &ReleaseRef,
        mutation: &StockMutation,
    ) -> Result<Released, StockStoreError> {
        (**self).release(key, quantity, release_ref, mutation)
    }

    fn restock(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        (**self).restock(key, quantity, mutation)
    }

    fn level(&self, key: StockKey) -> Result<Option<StockLevel>, StockStoreError> {
        (**self).level(key)
    }

    fn records(&self, key: StockKey) -> Result<Vec<StockRecord>, StockStoreError> {
        (**self).records(key)
    }
}
