//! Cancellation / Expiry Compensator.
//!
//! `unpaid → cancelled` is guarded like every transition, so a cancel racing a
//! payment either wins or observes the new status and does nothing. Once an
//! order is cancelled (or refunding), its reservations are released with
//! per-line release references and the coupon hold is undone; the order then
//! records `CompensationApplied`. Re-running any of this is harmless.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use storefront_catalog::{Actor, StockReason};
use storefront_core::OrderId;
use storefront_coupons::CouponReleasePolicy;
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::event_store::EventStore;
use storefront_orders::{
    CancelOrder, CancelReason, MarkCompensated, Order, OrderCommand, OrderStatus,
};

use crate::engine::FulfillmentEngine;
use crate::error::{FulfillmentError, Transition};
use crate::order_repository::Step;
use crate::stock_ledger::ReservedLine;

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// User-requested cancel of an unpaid order.
    ///
    /// A paid order is left alone (`Unchanged`); it has to go through a refund.
    /// An order whose payment window already closed is cancelled as expired.
    pub fn cancel_order(&self, order_id: OrderId) -> Result<Transition, FulfillmentError> {
        let now = self.clock.now();
        let order = self.orders.get(order_id)?;
        let reason = if order.is_expired(now) {
            CancelReason::PaymentWindowExpired
        } else {
            CancelReason::UserRequested
        };
        let actor = order.user_id().map(Actor::User).unwrap_or_else(|| Actor::system("cancellation"));
        self.cancel_with(order_id, reason, actor, now)
    }

    /// Cancel an unpaid order whose payment window has closed.
    ///
    /// `Unchanged` if it was paid or cancelled meanwhile, or is not yet expired.
    pub fn expire_order(&self, order_id: OrderId) -> Result<Transition, FulfillmentError> {
        let now = self.clock.now();
        let order = self.orders.get(order_id)?;
        if !order.is_expired(now) {
            return Ok(Transition::Unchanged(order.status()));
        }
        self.cancel_with(order_id, CancelReason::PaymentWindowExpired, Actor::system("expiry"), now)
    }

    pub(crate) fn cancel_with(
        &self,
        order_id: OrderId,
        reason: CancelReason,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Transition, FulfillmentError> {
        let step = self.orders.transition(OrderCommand::CancelOrder(CancelOrder {
            order_id,
            reason,
            cancelled_at: now,
        }))?;

        if step.applied {
            info!(
                %order_id,
                order_no = %display_no(&step.order),
                ?reason,
                "order cancelled"
            );
        }
        // Also covers a cancel that was applied before a crash but never compensated.
        self.compensate_if_needed(&step.order, actor, now)?;
        Ok(step.transition())
    }

    /// Release the order's stock and coupon hold, then record the marker.
    ///
    /// No-op unless the order is cancelled or refunding/refunded and has not
    /// been compensated yet.
    pub fn compensate_if_needed(&self, order: &Order, actor: Actor, now: DateTime<Utc>) -> Result<bool, FulfillmentError> {
        if !order.needs_compensation() {
            return Ok(false);
        }
        let order_id = order.id_typed();
        let reason = stock_reason_for(order);
        let lines: Vec<ReservedLine> = order
            .lines()
            .iter()
            .enumerate()
            .map(|(index, line)| ReservedLine {
                index,
                key: line.stock_key(),
                quantity: line.quantity,
            })
            .collect();

        let released = self
            .stock
            .release_lines(order_id, &lines, reason, actor, &display_no(order), now)?;

        if let Some(coupon) = order.coupon() {
            // An abandoned checkout never reached the buyer; the claim goes back whatever the policy.
            let policy = match order.cancel_reason() {
                Some(CancelReason::CheckoutAbandoned) => CouponReleasePolicy::Reopen,
                _ => self.coupons.policy(),
            };
            self.coupons.release_with(coupon.user_coupon_id, order_id, policy)?;
        }

        let marked: Step = self.orders.transition(OrderCommand::MarkCompensated(MarkCompensated {
            order_id,
            occurred_at: now,
        }))?;
        if marked.applied {
            info!(%order_id, released, ?reason, "order compensated");
        } else {
            warn!(%order_id, status = %marked.order.status(), "compensation marker was already recorded");
        }
        Ok(marked.applied)
    }
}

fn stock_reason_for(order: &Order) -> StockReason {
    match (order.status(), order.cancel_reason()) {
        (OrderStatus::Cancelled, Some(CancelReason::PaymentWindowExpired)) => StockReason::OrderExpired,
        (OrderStatus::Cancelled, Some(CancelReason::CheckoutAbandoned)) => StockReason::CheckoutCompensated,
        (OrderStatus::Cancelled, _) => StockReason::OrderCancelled,
        _ => StockReason::OrderRefunded,
    }
}

pub(crate) fn display_no(order: &Order) -> String {
    order
        .order_no()
        .map(|no| no.to_string())
        .unwrap_or_else(|| order.id_typed().to_string())
}
