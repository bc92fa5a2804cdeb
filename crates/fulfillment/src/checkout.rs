//! Order Creation Orchestrator.
//!
//! ```text
//! validate cart + delivery ─▶ snapshot prices ─▶ coupon redeemable?
//!   ─▶ allocate order number ─▶ write reservation intent (pending)
//!   ─▶ reserve line 1..n ─▶ hold coupon ─▶ quote totals + points
//!   ─▶ place order (unpaid) ─▶ commit intent
//! ```
//!
//! Any failure after the intent is written releases what was reserved, in
//! reverse order, and marks the intent compensated. If the process dies
//! before that, the intent stays pending and the reconciliation sweep
//! releases exactly the reservations it recorded. A checkout that outlives
//! the sweep's grace period finds its intent claimed when it tries to commit;
//! it then cancels the order it just placed and reports `OrderCancelled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use storefront_catalog::{Actor, StockReason};
use storefront_core::{CouponId, Money, OrderId, ProductId, UserCouponId, UserId, VariantId};
use storefront_coupons::{Coupon, CouponReleasePolicy};
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::event_store::EventStore;
use storefront_infra::intent_store::{IntentStatus, IntentStoreError, ReservationIntent};
use storefront_infra::order_index::OrderIndexError;
use storefront_infra::stock_store::StockMutation;
use storefront_orders::{
    CancelReason, CouponUse, Delivery, DeliveryRequest, Order, OrderCommand, OrderLine, OrderNo, PlaceOrder, PointsRequirement,
    PricingRules,
};

use crate::compensation::display_no;
use crate::engine::FulfillmentEngine;
use crate::error::FulfillmentError;
use crate::stock_ledger::ReservedLine;

/// Attempts at drawing an unused order number before giving up.
const ORDER_NO_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub lines: Vec<CartLine>,
    pub delivery: DeliveryRequest,
    pub coupon_id: Option<CouponId>,
}

/// Side effects held by an in-flight checkout, for compensation.
#[derive(Debug)]
struct Held {
    order_id: OrderId,
    order_no: OrderNo,
    lines: Vec<ReservedLine>,
    user_coupon: Option<UserCouponId>,
}

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Turn a cart into an unpaid order.
    ///
    /// On success stock is durably reserved until the order is cancelled,
    /// expires or is refunded. On failure no stock or coupon hold remains.
    pub fn place_order(&self, request: CheckoutRequest) -> Result<Order, FulfillmentError> {
        let now = self.clock.now();
        let (lines, delivery) = self.price_cart(&request, now)?;
        let (goods_total, discount) = PricingRules::merchandise(&lines);
        let subtotal = goods_total.saturating_sub(discount);

        let coupon = match request.coupon_id {
            Some(coupon_id) => Some(self.coupons.redeemable(coupon_id, now, subtotal)?),
            None => None,
        };

        let order_id = OrderId::new();
        let order_no = self.allocate_order_no(order_id, now)?;

        let intent = ReservationIntent::new(
            order_id,
            request.user_id,
            lines.iter().map(|l| (l.stock_key(), l.quantity)).collect(),
            now,
        );
        if let Err(err) = self.intents.create(intent) {
            self.forget_order_no(&order_no);
            return Err(err.into());
        }

        let mut held = Held {
            order_id,
            order_no: order_no.clone(),
            lines: Vec::with_capacity(lines.len()),
            user_coupon: None,
        };

        match self.reserve_and_place(&request, lines, delivery, coupon, subtotal, now, &mut held) {
            Ok(order) => {
                match self.intents.commit(order_id, now) {
                    Ok(()) => {}
                    Err(IntentStoreError::NotPending { status, .. }) => {
                        return Err(self.abandon_placed_order(&order, status, now));
                    }
                    Err(err) => {
                        // The order exists; reconciliation commits the intent later.
                        warn!(%order_id, order_no = %order_no, error = %err, "could not commit reservation intent");
                    }
                }
                info!(
                    %order_id,
                    order_no = %order_no,
                    user_id = %request.user_id,
                    pay_amount = %order.pay_amount(),
                    lines = order.lines().len(),
                    "order placed"
                );
                Ok(order)
            }
            Err(err) => {
                info!(%order_id, order_no = %order_no, error = %err, "checkout failed, compensating");
                self.abort_checkout(&held, now);
                Err(err)
            }
        }
    }

    /// Validate the cart and capture current prices.
    fn price_cart(
        &self,
        request: &CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<(Vec<OrderLine>, Delivery), FulfillmentError> {
        if request.lines.is_empty() {
            return Err(FulfillmentError::validation("cart is empty"));
        }
        if let Some(line) = request.lines.iter().find(|l| l.quantity == 0) {
            return Err(FulfillmentError::Validation(format!(
                "quantity for product {} must be positive",
                line.product_id
            )));
        }
        let delivery = Delivery::from_request(request.delivery.clone(), now)?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for (cart_line, line_no) in request.lines.iter().zip(1u32..) {
            let product = self
                .catalog
                .product(cart_line.product_id)
                .map_err(|e| FulfillmentError::ExternalGateway(e.to_string()))?
                .ok_or_else(|| FulfillmentError::Validation(format!("unknown product {}", cart_line.product_id)))?;
            lines.push(OrderLine {
                line_no,
                snapshot: product.snapshot(cart_line.variant_id)?,
                quantity: cart_line.quantity,
            });
        }
        Ok((lines, delivery))
    }

    fn allocate_order_no(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<OrderNo, FulfillmentError> {
        for _ in 0..ORDER_NO_ATTEMPTS {
            let candidate = OrderNo::generate(now);
            match self.order_index.insert(&candidate, order_id) {
                Ok(()) => return Ok(candidate),
                Err(OrderIndexError::Duplicate(taken)) => {
                    warn!(order_no = %taken, "order number collision, drawing again");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(FulfillmentError::Store("could not allocate a unique order number".to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn reserve_and_place(
        &self,
        request: &CheckoutRequest,
        lines: Vec<OrderLine>,
        delivery: Delivery,
        coupon: Option<Coupon>,
        subtotal: Money,
        now: DateTime<Utc>,
        held: &mut Held,
    ) -> Result<Order, FulfillmentError> {
        let order_id = held.order_id;
        let mutation = StockMutation::new(
            StockReason::OrderReserved,
            Actor::User(request.user_id),
            held.order_no.as_str(),
            now,
        );

        for (index, line) in lines.iter().enumerate() {
            let key = line.stock_key();
            self.stock.reserve(key, line.quantity, &mutation)?;
            held.lines.push(ReservedLine {
                index,
                key,
                quantity: line.quantity,
            });
            self.intents.record_reservation(order_id, index, now)?;
        }

        let (coupon_use, coupon_amount) = match coupon {
            Some(coupon) => {
                let instance = self
                    .coupons
                    .reserve_for_order(coupon.id, request.user_id, order_id, now)?;
                held.user_coupon = Some(instance.id);
                self.intents.record_coupon(order_id, instance.id, now)?;
                let coupon_use = CouponUse {
                    coupon_id: coupon.id,
                    user_coupon_id: instance.id,
                };
                (Some(coupon_use), coupon.discount_for(subtotal))
            }
            None => (None, Money::ZERO),
        };

        let pricing = self.settings.pricing;
        let totals = pricing.quote(&lines, &delivery, coupon_amount);
        let balance = self
            .points
            .balance(request.user_id)
            .map_err(|e| FulfillmentError::ExternalGateway(e.to_string()))?;
        let points = PointsRequirement {
            required_points: pricing.required_points(totals.pay_amount),
            user_points_at_creation: balance,
        };

        let expires_at = now
            .checked_add_signed(self.settings.payment_ttl)
            .ok_or_else(|| FulfillmentError::validation("payment window out of range"))?;

        let command = OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            order_no: held.order_no.clone(),
            user_id: request.user_id,
            lines,
            delivery,
            totals,
            coupon: coupon_use,
            points,
            placed_at: now,
            expires_at,
        });
        Ok(self.orders.place(command)?)
    }

    /// Release everything the checkout holds. Failures are logged and leave
    /// the intent pending for the reconciliation sweep.
    fn abort_checkout(&self, held: &Held, now: DateTime<Utc>) {
        let mut complete = true;

        if let Err(err) = self.stock.release_lines(
            held.order_id,
            &held.lines,
            StockReason::CheckoutCompensated,
            Actor::system("checkout"),
            held.order_no.as_str(),
            now,
        ) {
            error!(order_id = %held.order_id, error = %err, "checkout compensation left stock reserved");
            complete = false;
        }

        if let Some(user_coupon_id) = held.user_coupon {
            // The order never existed, so the claim goes back to the user whatever the policy.
            if let Err(err) = self
                .coupons
                .release_with(user_coupon_id, held.order_id, CouponReleasePolicy::Reopen)
            {
                error!(order_id = %held.order_id, %user_coupon_id, error = %err, "checkout compensation left coupon attached");
                complete = false;
            }
        }

        self.forget_order_no(&held.order_no);

        if !complete {
            return;
        }
        if let Err(err) = self.intents.mark_compensated(held.order_id, now) {
            warn!(order_id = %held.order_id, error = %err, "could not mark reservation intent compensated");
        }
    }

    /// The reconciliation sweep claimed the intent while this checkout was
    /// still running, so its reservations are being released. Cancel the
    /// order so it can never be paid without stock behind it.
    fn abandon_placed_order(&self, order: &Order, intent_status: IntentStatus, now: DateTime<Utc>) -> FulfillmentError {
        let order_id = order.id_typed();
        let order_no = display_no(order);
        warn!(%order_id, %order_no, ?intent_status, "reservation intent reconciled mid-checkout, cancelling order");

        if let Err(err) = self.cancel_with(
            order_id,
            CancelReason::CheckoutAbandoned,
            Actor::system("checkout"),
            now,
        ) {
            // Left unpaid, it is closed by the payment expiry sweep.
            error!(%order_id, error = %err, "could not cancel order placed after its intent was reconciled");
        }
        match order.order_no() {
            Some(order_no) => FulfillmentError::OrderCancelled {
                order_no: order_no.clone(),
            },
            None => FulfillmentError::Store(format!("checkout for order {order_id} outlived its reservation intent")),
        }
    }

    fn forget_order_no(&self, order_no: &OrderNo) {
        if let Err(err) = self.order_index.remove(order_no) {
            warn!(order_no = %order_no, error = %err, "could not free order number");
        }
    }
}
