use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use storefront_core::{AggregateId, Money, OrderId, UserId};
use storefront_events::EventEnvelope;
use storefront_orders::{ORDER_AGGREGATE_TYPE, OrderEvent, OrderNo, OrderStatus};

use crate::read_model::ReadModelStore;

/// One row per order: what the sweeper and back-office lists need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub order_no: OrderNo,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub pay_amount: Money,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub compensated: bool,
    /// Last refund gateway failure awaiting an operator.
    pub refund_failure: Option<String>,
}

impl OrderSummary {
    pub fn needs_compensation(&self) -> bool {
        self.status.requires_compensation() && !self.compensated
    }
}

#[derive(Debug, Error)]
pub enum OrderSummaryProjectionError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),

    #[error("envelope does not match its event: {0}")]
    Mismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Order summary projection.
///
/// Consumes published envelopes (JSON payloads) and keeps one `OrderSummary`
/// per order. Envelopes of other aggregate types are ignored.
#[derive(Debug)]
pub struct OrderSummaryProjection<S>
where
    S: ReadModelStore<OrderId, OrderSummary>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> OrderSummaryProjection<S>
where
    S: ReadModelStore<OrderId, OrderSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, order_id: OrderId) -> Option<OrderSummary> {
        self.store.get(&order_id)
    }

    pub fn list(&self) -> Vec<OrderSummary> {
        let mut all = self.store.list();
        all.sort_by(|a, b| a.order_no.cmp(&b.order_no));
        all
    }

    /// Unpaid orders whose payment window has closed at `now`.
    pub fn expired_unpaid(&self, now: DateTime<Utc>) -> Vec<OrderSummary> {
        self.list()
            .into_iter()
            .filter(|s| s.status == OrderStatus::Unpaid && now >= s.expires_at)
            .collect()
    }

    /// Cancelled or refund orders without a compensation marker.
    pub fn awaiting_compensation(&self) -> Vec<OrderSummary> {
        self.list()
            .into_iter()
            .filter(OrderSummary::needs_compensation)
            .collect()
    }

    /// Refunds left in `refunding` after a gateway failure.
    pub fn refunds_pending_resolution(&self) -> Vec<OrderSummary> {
        self.list()
            .into_iter()
            .filter(|s| s.status == OrderStatus::Refunding && s.refund_failure.is_some())
            .collect()
    }

    /// Apply a published envelope.
    ///
    /// Replays at or below the stream cursor are ignored; gaps are rejected.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), OrderSummaryProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let Ok(mut cursors) = self.cursors.write() else {
            return Ok(());
        };
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq == 0 {
            return Err(OrderSummaryProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(OrderSummaryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OrderSummaryProjectionError::Deserialize(e.to_string()))?;

        let order_id = event.order_id();
        if order_id.aggregate_id() != aggregate_id {
            return Err(OrderSummaryProjectionError::Mismatch(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let OrderEvent::OrderPlaced(e) = &event {
            self.store.upsert(
                order_id,
                OrderSummary {
                    order_id,
                    order_no: e.order_no.clone(),
                    user_id: e.user_id,
                    status: OrderStatus::Unpaid,
                    pay_amount: e.totals.pay_amount,
                    placed_at: e.placed_at,
                    expires_at: e.expires_at,
                    compensated: false,
                    refund_failure: None,
                },
            );
        } else {
            let Some(mut summary) = self.store.get(&order_id) else {
                return Err(OrderSummaryProjectionError::Mismatch(format!(
                    "{} before orders.order.placed",
                    envelope.event_type()
                )));
            };
            match event {
                OrderEvent::OrderPlaced(_) => {}
                OrderEvent::OrderPaid(_) => summary.status = OrderStatus::Paid,
                OrderEvent::OrderCancelled(_) => summary.status = OrderStatus::Cancelled,
                OrderEvent::PreparationStarted(_) => summary.status = OrderStatus::Preparing,
                OrderEvent::OrderShipped(_) => summary.status = OrderStatus::Shipped,
                OrderEvent::OrderCompleted(_) => summary.status = OrderStatus::Completed,
                OrderEvent::RefundRequested(_) => summary.status = OrderStatus::Refunding,
                OrderEvent::RefundFailed(e) => summary.refund_failure = Some(e.reason),
                OrderEvent::OrderRefunded(_) => {
                    summary.status = OrderStatus::Refunded;
                    summary.refund_failure = None;
                }
                OrderEvent::CompensationApplied(_) => summary.compensated = true,
            }
            self.store.upsert(order_id, summary);
        }

        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrderSummaryProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
