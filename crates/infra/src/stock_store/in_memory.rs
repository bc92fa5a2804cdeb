use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use uuid::Uuid;

use storefront_catalog::{ReleaseRef, StockKey, StockLevel, StockRecord};

use super::{Released, StockMutation, StockStore, StockStoreError};

#[derive(Debug, Default)]
struct Ledger {
    levels: HashMap<StockKey, StockLevel>,
    applied_releases: HashSet<ReleaseRef>,
    records: Vec<StockRecord>,
}

impl Ledger {
    fn append(
        &mut self,
        key: StockKey,
        before: StockLevel,
        after: StockLevel,
        mutation: &StockMutation,
    ) -> StockRecord {
        let record = StockRecord {
            record_id: Uuid::now_v7(),
            key,
            delta: i64::from(after.stock) - i64::from(before.stock),
            stock_before: before.stock,
            stock_after: after.stock,
            reason: mutation.reason,
            actor: mutation.actor.clone(),
            reference: mutation.reference.clone(),
            recorded_at: mutation.at,
        };
        self.records.push(record.clone());
        record
    }
}

/// In-memory stock store. One mutex guards counters, applied release refs and
/// the record log, so each primitive is a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    ledger: Mutex<Ledger>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a counter without writing an audit record.
    pub fn seed(&self, key: StockKey, stock: u32) -> Result<(), StockStoreError> {
        let mut ledger = self.lock()?;
        ledger.levels.insert(key, StockLevel::new(stock));
        Ok(())
    }

    /// Every audit entry across all keys, oldest first.
    pub fn all_records(&self) -> Result<Vec<StockRecord>, StockStoreError> {
        Ok(self.lock()?.records.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Ledger>, StockStoreError> {
        self.ledger
            .lock()
            .map_err(|_| StockStoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl StockStore for InMemoryStockStore {
    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        if quantity == 0 {
            return Err(StockStoreError::ZeroQuantity);
        }
        let mut ledger = self.lock()?;
        let before = *ledger
            .levels
            .get(&key)
            .ok_or(StockStoreError::UnknownKey(key))?;

        let after = before
            .try_reserve(quantity)
            .map_err(|shortfall| StockStoreError::Insufficient {
                key,
                requested: shortfall.requested,
                available: shortfall.available,
            })?;

        ledger.levels.insert(key, after);
        Ok(ledger.append(key, before, after, mutation))
    }

    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        release_ref: &ReleaseRef,
        mutation: &StockMutation,
    ) -> Result<Released, StockStoreError> {
        if quantity == 0 {
            return Err(StockStoreError::ZeroQuantity);
        }
        let mut ledger = self.lock()?;
        if ledger.applied_releases.contains(release_ref) {
            return Ok(Released::AlreadyApplied);
        }
        let before = *ledger
            .levels
            .get(&key)
            .ok_or(StockStoreError::UnknownKey(key))?;
        let after = before.release(quantity);

        ledger.levels.insert(key, after);
        ledger.applied_releases.insert(release_ref.clone());
        Ok(Released::Applied(ledger.append(key, before, after, mutation)))
    }

    fn restock(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        if quantity == 0 {
            return Err(StockStoreError::ZeroQuantity);
        }
        let mut ledger = self.lock()?;
        let before = ledger.levels.get(&key).copied().unwrap_or_default();
        let after = StockLevel {
            stock: before.stock.saturating_add(quantity),
            sales: before.sales,
        };
        ledger.levels.insert(key, after);
        Ok(ledger.append(key, before, after, mutation))
    }

    fn level(&self, key: StockKey) -> Result<Option<StockLevel>, StockStoreError> {
        Ok(self.lock()?.levels.get(&key).copied())
    }

    fn records(&self, key: StockKey) -> Result<Vec<StockRecord>, StockStoreError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| r.key == key)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use storefront_catalog::{Actor, StockReason};
    use storefront_core::ProductId;

    fn mutation(reason: StockReason) -> StockMutation {
        StockMutation::new(reason, Actor::system("test"), "ref", Utc::now())
    }

    fn store_with(stock: u32) -> (InMemoryStockStore, StockKey) {
        let store = InMemoryStockStore::new();
        let key = StockKey::product(ProductId::new());
        store.seed(key, stock).unwrap();
        (store, key)
    }

    #[test]
    fn reserve_refuses_to_oversell_and_leaves_stock_untouched() {
        let (store, key) = store_with(2);

        let err = store
            .reserve(key, 3, &mutation(StockReason::OrderReserved))
            .unwrap_err();
        assert!(matches!(
            err,
            StockStoreError::Insufficient { requested: 3, available: 2, .. }
        ));
        assert_eq!(store.level(key).unwrap(), Some(StockLevel::new(2)));
        assert!(store.records(key).unwrap().is_empty());
    }

    #[test]
    fn release_applies_once_per_reference() {
        let (store, key) = store_with(5);
        store.reserve(key, 2, &mutation(StockReason::OrderReserved)).unwrap();

        let r = ReleaseRef::for_line("order-1", 0);
        let first = store
            .release(key, 2, &r, &mutation(StockReason::OrderCancelled))
            .unwrap();
        let second = store
            .release(key, 2, &r, &mutation(StockReason::OrderCancelled))
            .unwrap();

        assert!(matches!(first, Released::Applied(_)));
        assert_eq!(second, Released::AlreadyApplied);
        assert_eq!(store.level(key).unwrap(), Some(StockLevel::new(5)));

        let records = store.records(key).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().map(|r| r.delta).sum::<i64>(), 0);
        assert_eq!((records[0].stock_before, records[0].stock_after), (5, 3));
    }

    #[test]
    fn unknown_key_is_reported() {
        let store = InMemoryStockStore::new();
        let key = StockKey::product(ProductId::new());
        assert!(matches!(
            store.reserve(key, 1, &mutation(StockReason::OrderReserved)),
            Err(StockStoreError::UnknownKey(_))
        ));
    }

    #[test]
    fn restock_adds_stock_without_touching_sales() {
        let (store, key) = store_with(1);
        store.reserve(key, 1, &mutation(StockReason::OrderReserved)).unwrap();
        store.restock(key, 4, &mutation(StockReason::Restock)).unwrap();
        assert_eq!(store.level(key).unwrap(), Some(StockLevel { stock: 4, sales: 1 }));
    }

    #[test]
    fn concurrent_reservations_never_oversell() {
        let (store, key) = store_with(10);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .reserve(key, 3, &mutation(StockReason::OrderReserved))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(store.level(key).unwrap(), Some(StockLevel { stock: 1, sales: 9 }));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn reserve_then_release_round_trips(stock in 0u32..50, requests in prop::collection::vec(1u32..8, 0..20)) {
            let (store, key) = store_with(stock);
            let mut reserved = Vec::new();
            for (idx, qty) in requests.iter().enumerate() {
                if store.reserve(key, *qty, &mutation(StockReason::OrderReserved)).is_ok() {
                    reserved.push((idx, *qty));
                }
            }

            let level = store.level(key).unwrap().unwrap();
            prop_assert_eq!(level.total(), u64::from(stock));

            for (idx, qty) in reserved {
                let r = ReleaseRef::for_line("prop", idx);
                store.release(key, qty, &r, &mutation(StockReason::OrderCancelled)).unwrap();
                store.release(key, qty, &r, &mutation(StockReason::OrderCancelled)).unwrap();
            }
            prop_assert_eq!(store.level(key).unwrap(), Some(StockLevel::new(stock)));
        }
    }
}
