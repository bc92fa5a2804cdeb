//! Reconciliation pass: cleans up after crashes and closes expired orders.
//!
//! Nothing here is needed for correctness of a single request: payment and
//! cancel evaluate expiry lazily, and every release is idempotent. The pass
//! exists so abandoned reservations do not stay out of stock forever.
//!
//! A stale intent is claimed (`begin_compensation`) before its reservations
//! are released. A checkout still running past the grace period then fails to
//! commit and cancels its own order; one that died after placing it has the
//! order cancelled here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use storefront_catalog::{Actor, StockReason};
use storefront_core::OrderId;
use storefront_coupons::CouponReleasePolicy;
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::event_store::EventStore;
use storefront_infra::intent_store::{IntentStatus, IntentStoreError, ReservationIntent};
use storefront_infra::projections::{OrderSummary, OrderSummaryProjection};
use storefront_infra::read_model::ReadModelStore;
use storefront_orders::CancelReason;

use crate::engine::FulfillmentEngine;
use crate::error::FulfillmentError;
use crate::stock_ledger::ReservedLine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Abandoned checkouts whose reservations were released.
    pub intents_compensated: usize,
    /// Pending intents whose order turned out to exist.
    pub intents_committed: usize,
    pub orders_expired: usize,
    /// Cancelled or refund orders whose compensation was finished.
    pub orders_compensated: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentResolution {
    Committed,
    Compensated,
}

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run every reconciliation step once. Per-item failures are logged and
    /// counted; the next pass retries them.
    pub fn reconcile<R>(&self, summaries: &OrderSummaryProjection<R>) -> Result<ReconcileReport, FulfillmentError>
    where
        R: ReadModelStore<OrderId, OrderSummary>,
    {
        let mut report = self.reconcile_intents()?;
        let now = self.clock.now();

        for summary in summaries.expired_unpaid(now) {
            match self.expire_order(summary.order_id) {
                Ok(t) if t.is_applied() => report.orders_expired += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(order_id = %summary.order_id, error = %err, "could not expire order");
                    report.failures += 1;
                }
            }
        }

        for summary in summaries.awaiting_compensation() {
            let result = self
                .orders
                .get(summary.order_id)
                .and_then(|order| self.compensate_if_needed(&order, Actor::system("reconciler"), now));
            match result {
                Ok(true) => report.orders_compensated += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(order_id = %summary.order_id, error = %err, "could not finish compensation");
                    report.failures += 1;
                }
            }
        }

        if report != ReconcileReport::default() {
            info!(?report, "reconciliation pass finished");
        } else {
            debug!("reconciliation pass found nothing to do");
        }
        Ok(report)
    }

    /// Resolve checkout intents left pending longer than the grace period.
    pub fn reconcile_intents(&self) -> Result<ReconcileReport, FulfillmentError> {
        let now = self.clock.now();
        let cutoff = now
            .checked_sub_signed(self.settings.intent_grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = ReconcileReport::default();

        for intent in self.intents.stale_pending(cutoff)? {
            match self.resolve_intent(&intent) {
                Ok(IntentResolution::Committed) => report.intents_committed += 1,
                Ok(IntentResolution::Compensated) => report.intents_compensated += 1,
                Err(err) => {
                    warn!(order_id = %intent.order_id, error = %err, "could not reconcile reservation intent");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    fn resolve_intent(&self, stale: &ReservationIntent) -> Result<IntentResolution, FulfillmentError> {
        let now = self.clock.now();
        let order_id = stale.order_id;

        if stale.status == IntentStatus::Pending {
            if self.orders.find(order_id)?.is_some() {
                // The order was placed; its lifecycle owns the reservations.
                return self.commit_intent(order_id, now);
            }
            // Claim the intent before releasing anything. From here on the
            // checkout cannot commit, and cancels its order if it places one.
            match self.intents.begin_compensation(order_id, now) {
                Ok(()) => {}
                Err(IntentStoreError::NotPending {
                    status: IntentStatus::Committed,
                    ..
                }) => return Ok(IntentResolution::Committed),
                Err(err) => return Err(err.into()),
            }
        }

        // Reservations recorded between the stale read and the claim count too.
        let intent = self
            .intents
            .get(order_id)?
            .ok_or_else(|| FulfillmentError::Store(format!("reservation intent for order {order_id} vanished")))?;

        let lines: Vec<ReservedLine> = intent
            .reserved_lines()
            .map(|(index, line)| ReservedLine {
                index,
                key: line.key,
                quantity: line.quantity,
            })
            .collect();
        let released = self.stock.release_lines(
            order_id,
            &lines,
            StockReason::IntentReconciled,
            Actor::system("reconciler"),
            &order_id.to_string(),
            now,
        )?;

        if let Some(user_coupon_id) = intent.user_coupon_id {
            self.coupons
                .release_with(user_coupon_id, order_id, CouponReleasePolicy::Reopen)?;
        }

        // Covers a checkout that placed its order after the claim and died
        // before cancelling it.
        if self.orders.find(order_id)?.is_some() {
            self.cancel_with(
                order_id,
                CancelReason::CheckoutAbandoned,
                Actor::system("reconciler"),
                now,
            )?;
        }

        self.intents.mark_compensated(order_id, now)?;
        info!(%order_id, released, "abandoned checkout reconciled");
        Ok(IntentResolution::Compensated)
    }

    fn commit_intent(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<IntentResolution, FulfillmentError> {
        match self.intents.commit(order_id, now) {
            Ok(())
            | Err(IntentStoreError::NotPending {
                status: IntentStatus::Committed,
                ..
            }) => Ok(IntentResolution::Committed),
            Err(err) => Err(err.into()),
        }
    }
}
