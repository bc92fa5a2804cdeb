//! Stock Ledger: reservations and releases against the stock store.
//!
//! Reservations are a single conditional write in the store; this layer only
//! names failures in engine terms and logs every mutation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use storefront_catalog::{Actor, ReleaseRef, StockKey, StockLevel, StockReason, StockRecord};
use storefront_core::OrderId;
use storefront_infra::stock_store::{Released, StockMutation, StockStore, StockStoreError};

use crate::error::FulfillmentError;

/// One reserved line to give back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedLine {
    /// Position of the line on the order (and its checkout intent).
    pub index: usize,
    pub key: StockKey,
    pub quantity: u32,
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn StockStore>,
}

impl std::fmt::Debug for StockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockLedger").finish_non_exhaustive()
    }
}

impl StockLedger {
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self { store }
    }

    pub fn reserve(&self, key: StockKey, quantity: u32, mutation: &StockMutation) -> Result<StockRecord, FulfillmentError> {
        match self.store.reserve(key, quantity, mutation) {
            Ok(record) => {
                debug!(
                    product_id = %key.product_id,
                    stock_key = %key,
                    quantity,
                    stock_after = record.stock_after,
                    reference = %mutation.reference,
                    "stock reserved"
                );
                Ok(record)
            }
            Err(err @ StockStoreError::Insufficient { .. }) => {
                info!(stock_key = %key, quantity, reference = %mutation.reference, error = %err, "reservation refused");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Release one line. Re-running with the same `ReleaseRef` changes nothing.
    pub fn release(
        &self,
        key: StockKey,
        quantity: u32,
        release_ref: &ReleaseRef,
        mutation: &StockMutation,
    ) -> Result<Released, FulfillmentError> {
        let released = self.store.release(key, quantity, release_ref, mutation)?;
        match &released {
            Released::Applied(record) => debug!(
                stock_key = %key,
                quantity,
                stock_after = record.stock_after,
                release_ref = %release_ref,
                reason = ?mutation.reason,
                "stock released"
            ),
            Released::AlreadyApplied => debug!(release_ref = %release_ref, "release already applied"),
        }
        Ok(released)
    }

    /// Release every line reserved for `order_id`, last line first.
    ///
    /// Each line is attempted even if an earlier one fails; the first error is
    /// returned after all attempts. Returns how many releases actually applied.
    pub fn release_lines(
        &self,
        order_id: OrderId,
        lines: &[ReservedLine],
        reason: StockReason,
        actor: Actor,
        reference: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<usize, FulfillmentError> {
        let mutation = StockMutation::new(reason, actor, reference, at);
        let mut applied = 0;
        let mut first_error = None;

        for line in lines.iter().rev() {
            let release_ref = ReleaseRef::for_line(order_id, line.index);
            match self.release(line.key, line.quantity, &release_ref, &mutation) {
                Ok(Released::Applied(_)) => applied += 1,
                Ok(Released::AlreadyApplied) => {}
                Err(err) => {
                    warn!(%order_id, release_ref = %release_ref, error = %err, "stock release failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    pub fn level(&self, key: StockKey) -> Result<Option<StockLevel>, FulfillmentError> {
        Ok(self.store.level(key)?)
    }

    pub fn records(&self, key: StockKey) -> Result<Vec<StockRecord>, FulfillmentError> {
        Ok(self.store.records(key)?)
    }
}
