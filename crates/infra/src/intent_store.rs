//! Durable saga log for checkout.
//!
//! A `ReservationIntent` is written before the first stock reservation and
//! records every reservation as it succeeds. If the process dies mid-checkout
//! the intent stays `Pending`, and the reconciliation sweep releases exactly
//! what it lists.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_catalog::StockKey;
use storefront_core::{OrderId, UserCouponId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    /// The order was placed; its own lifecycle owns the reservations now.
    Committed,
    /// Claimed by the reconciliation sweep; the checkout can no longer commit.
    Compensating,
    /// Every recorded reservation has been released.
    Compensated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentLine {
    pub key: StockKey,
    pub quantity: u32,
    pub reserved: bool,
}

/// Keyed by the order id allocated for the checkout, so a line's release
/// reference is the same whether the checkout or the order releases it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationIntent {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<IntentLine>,
    pub user_coupon_id: Option<UserCouponId>,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationIntent {
    pub fn new(order_id: OrderId, user_id: UserId, lines: Vec<(StockKey, u32)>, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            user_id,
            lines: lines
                .into_iter()
                .map(|(key, quantity)| IntentLine {
                    key,
                    quantity,
                    reserved: false,
                })
                .collect(),
            user_coupon_id: None,
            status: IntentStatus::Pending,
            created_at: at,
            updated_at: at,
        }
    }

    /// Reserved lines with their index, in reservation order.
    pub fn reserved_lines(&self) -> impl Iterator<Item = (usize, &IntentLine)> {
        self.lines.iter().enumerate().filter(|(_, l)| l.reserved)
    }
}

#[derive(Debug, Error)]
pub enum IntentStoreError {
    #[error("intent already exists for order {0}")]
    Duplicate(OrderId),

    #[error("no intent for order {0}")]
    NotFound(OrderId),

    #[error("intent for order {order_id} has no line {line}")]
    NoSuchLine { order_id: OrderId, line: usize },

    #[error("intent for order {order_id} is {status:?}, expected pending")]
    NotPending { order_id: OrderId, status: IntentStatus },

    #[error("intent store unavailable: {0}")]
    Unavailable(String),
}

pub trait IntentStore: Send + Sync {
    fn create(&self, intent: ReservationIntent) -> Result<(), IntentStoreError>;

    fn get(&self, order_id: OrderId) -> Result<Option<ReservationIntent>, IntentStoreError>;

    fn record_reservation(&self, order_id: OrderId, line: usize, at: DateTime<Utc>) -> Result<(), IntentStoreError>;

    fn record_coupon(&self, order_id: OrderId, user_coupon_id: UserCouponId, at: DateTime<Utc>) -> Result<(), IntentStoreError>;

    /// Pending → Committed. Fails if the intent is no longer pending.
    fn commit(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError>;

    /// Pending → Compensating, claiming the intent for the reconciliation sweep.
    /// Idempotent for an intent already compensating; fails once committed.
    fn begin_compensation(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError>;

    /// Pending or Compensating → Compensated.
    fn mark_compensated(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError>;

    /// Pending or compensating intents last touched before `cutoff`.
    fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReservationIntent>, IntentStoreError>;
}

impl<S> IntentStore for Arc<S>
where
    S: IntentStore + ?Sized,
{
    fn create(&self, intent: ReservationIntent) -> Result<(), IntentStoreError> {
        (**self).create(intent)
    }

    fn get(&self, order_id: OrderId) -> Result<Option<ReservationIntent>, IntentStoreError> {
        (**self).get(order_id)
    }

    fn record_reservation(&self, order_id: OrderId, line: usize, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        (**self).record_reservation(order_id, line, at)
    }

    fn record_coupon(&self, order_id: OrderId, user_coupon_id: UserCouponId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        (**self).record_coupon(order_id, user_coupon_id, at)
    }

    fn commit(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        (**self).commit(order_id, at)
    }

    fn begin_compensation(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        (**self).begin_compensation(order_id, at)
    }

    fn mark_compensated(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        (**self).mark_compensated(order_id, at)
    }

    fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReservationIntent>, IntentStoreError> {
        (**self).stale_pending(cutoff)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIntentStore {
    intents: RwLock<HashMap<OrderId, ReservationIntent>>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pending<T>(
        &self,
        order_id: OrderId,
        at: DateTime<Utc>,
        change: impl FnOnce(&mut ReservationIntent) -> Result<T, IntentStoreError>,
    ) -> Result<T, IntentStoreError> {
        self.with_status(order_id, at, &[IntentStatus::Pending], change)
    }

    fn with_status<T>(
        &self,
        order_id: OrderId,
        at: DateTime<Utc>,
        allowed: &[IntentStatus],
        change: impl FnOnce(&mut ReservationIntent) -> Result<T, IntentStoreError>,
    ) -> Result<T, IntentStoreError> {
        let mut intents = self
            .intents
            .write()
            .map_err(|_| IntentStoreError::Unavailable("lock poisoned".to_string()))?;
        let intent = intents
            .get_mut(&order_id)
            .ok_or(IntentStoreError::NotFound(order_id))?;
        if !allowed.contains(&intent.status) {
            return Err(IntentStoreError::NotPending {
                order_id,
                status: intent.status,
            });
        }
        let out = change(intent)?;
        intent.updated_at = at;
        Ok(out)
    }
}

impl IntentStore for InMemoryIntentStore {
    fn create(&self, intent: ReservationIntent) -> Result<(), IntentStoreError> {
        let mut intents = self
            .intents
            .write()
            .map_err(|_| IntentStoreError::Unavailable("lock poisoned".to_string()))?;
        if intents.contains_key(&intent.order_id) {
            return Err(IntentStoreError::Duplicate(intent.order_id));
        }
        intents.insert(intent.order_id, intent);
        Ok(())
    }

    fn get(&self, order_id: OrderId) -> Result<Option<ReservationIntent>, IntentStoreError> {
        let intents = self
            .intents
            .read()
            .map_err(|_| IntentStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(intents.get(&order_id).cloned())
    }

    fn record_reservation(&self, order_id: OrderId, line: usize, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        self.with_pending(order_id, at, |intent| {
            let entry = intent
                .lines
                .get_mut(line)
                .ok_or(IntentStoreError::NoSuchLine { order_id, line })?;
            entry.reserved = true;
            Ok(())
        })
    }

    fn record_coupon(&self, order_id: OrderId, user_coupon_id: UserCouponId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        self.with_pending(order_id, at, |intent| {
            intent.user_coupon_id = Some(user_coupon_id);
            Ok(())
        })
    }

    fn commit(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        self.with_pending(order_id, at, |intent| {
            intent.status = IntentStatus::Committed;
            Ok(())
        })
    }

    fn begin_compensation(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        self.with_status(order_id, at, &[IntentStatus::Pending, IntentStatus::Compensating], |intent| {
            intent.status = IntentStatus::Compensating;
            Ok(())
        })
    }

    fn mark_compensated(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), IntentStoreError> {
        self.with_status(order_id, at, &[IntentStatus::Pending, IntentStatus::Compensating], |intent| {
            intent.status = IntentStatus::Compensated;
            Ok(())
        })
    }

    fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReservationIntent>, IntentStoreError> {
        let intents = self
            .intents
            .read()
            .map_err(|_| IntentStoreError::Unavailable("lock poisoned".to_string()))?;
        let mut stale: Vec<_> = intents
            .values()
            .filter(|i| matches!(i.status, IntentStatus::Pending | IntentStatus::Compensating) && i.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|i| i.created_at);
        Ok(stale)
    }
}
