//! Unique index from human-readable order numbers to order stream ids.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use storefront_core::OrderId;
use storefront_orders::OrderNo;

#[derive(Debug, Error)]
pub enum OrderIndexError {
    #[error("order number {0} is already taken")]
    Duplicate(OrderNo),

    #[error("order index unavailable: {0}")]
    Unavailable(String),
}

pub trait OrderIndex: Send + Sync {
    /// Claim `order_no` for `order_id`; `Duplicate` if another order holds it.
    fn insert(&self, order_no: &OrderNo, order_id: OrderId) -> Result<(), OrderIndexError>;

    fn get(&self, order_no: &OrderNo) -> Result<Option<OrderId>, OrderIndexError>;

    /// Drop an entry whose order was never placed.
    fn remove(&self, order_no: &OrderNo) -> Result<(), OrderIndexError>;
}

impl<S> OrderIndex for Arc<S>
where
    S: OrderIndex + ?Sized,
{
    fn insert(&self, order_no: &OrderNo, order_id: OrderId) -> Result<(), OrderIndexError> {
        (**self).insert(order_no, order_id)
    }

    fn get(&self, order_no: &OrderNo) -> Result<Option<OrderId>, OrderIndexError> {
        (**self).get(order_no)
    }

    fn remove(&self, order_no: &OrderNo) -> Result<(), OrderIndexError> {
        (**self).remove(order_no)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrderIndex {
    entries: RwLock<HashMap<OrderNo, OrderId>>,
}

impl InMemoryOrderIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderIndex for InMemoryOrderIndex {
    fn insert(&self, order_no: &OrderNo, order_id: OrderId) -> Result<(), OrderIndexError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| OrderIndexError::Unavailable("lock poisoned".to_string()))?;
        match entries.get(order_no) {
            Some(existing) if *existing != order_id => Err(OrderIndexError::Duplicate(order_no.clone())),
            Some(_) => Ok(()),
            None => {
                entries.insert(order_no.clone(), order_id);
                Ok(())
            }
        }
    }

    fn get(&self, order_no: &OrderNo) -> Result<Option<OrderId>, OrderIndexError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| OrderIndexError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.get(order_no).copied())
    }

    fn remove(&self, order_no: &OrderNo) -> Result<(), OrderIndexError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| OrderIndexError::Unavailable("lock poisoned".to_string()))?;
        entries.remove(order_no);
        Ok(())
    }
}
