//! Payment Confirmation Handler.
//!
//! Delivery of the "payment succeeded" signal is at-least-once, so confirming
//! the same order twice must be harmless: the second call sees a paid order
//! and reports `Unchanged` without touching stock or the coupon again.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use storefront_catalog::Actor;
use storefront_core::{Money, OrderId};
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::command_dispatcher::DispatchError;
use storefront_infra::event_store::EventStore;
use storefront_orders::{CancelReason, ConfirmPayment, Order, OrderCommand, OrderNo, OrderStatus};

use crate::engine::FulfillmentEngine;
use crate::error::{FulfillmentError, Transition};

/// How the payment signal identifies its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum OrderRef {
    Id(OrderId),
    Number(OrderNo),
}

/// An externally verified "payment succeeded" signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSignal {
    pub order: OrderRef,
    pub transaction_id: String,
    pub amount: Money,
}

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Apply a payment to an unpaid order, exactly once.
    ///
    /// - already paid (or later): `Ok(Unchanged)`.
    /// - payment window closed: the order is cancelled and compensated, and
    ///   `OrderExpired` tells the caller not to charge.
    /// - cancelled by the user: `OrderCancelled`, also "do not charge".
    pub fn confirm_payment(&self, signal: PaymentSignal) -> Result<Transition, FulfillmentError> {
        let order = match &signal.order {
            OrderRef::Id(order_id) => self.orders.get(*order_id)?,
            OrderRef::Number(order_no) => self.orders.get_by_number(self.order_index.as_ref(), order_no)?,
        };
        let order_id = order.id_typed();
        let now = self.clock.now();

        let command = OrderCommand::ConfirmPayment(ConfirmPayment {
            order_id,
            transaction_id: signal.transaction_id.clone(),
            paid_amount: signal.amount,
            paid_at: now,
        });

        let step = match self.orders.transition(command) {
            Ok(step) => step,
            Err(DispatchError::Expired(reason)) => {
                warn!(%order_id, %reason, transaction_id = %signal.transaction_id, "payment arrived after the window closed");
                self.cancel_with(order_id, CancelReason::PaymentWindowExpired, Actor::system("payment"), now)?;
                return Err(FulfillmentError::OrderExpired {
                    order_no: order_no_of(&order)?,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let current = &step.order;
        match current.status() {
            OrderStatus::Cancelled => {
                warn!(%order_id, transaction_id = %signal.transaction_id, "payment arrived for a cancelled order");
                // Finish a compensation a crashed cancel may have left behind.
                self.compensate_if_needed(current, Actor::system("payment"), now)?;
                let order_no = order_no_of(current)?;
                return Err(match current.cancel_reason() {
                    Some(CancelReason::PaymentWindowExpired) => FulfillmentError::OrderExpired { order_no },
                    _ => FulfillmentError::OrderCancelled { order_no },
                });
            }
            status if status.is_paid_or_later() && !status.requires_compensation() => {
                // Runs again on a redelivered signal so a crash between the two
                // steps still ends with the coupon consumed.
                if let Some(coupon) = current.coupon() {
                    self.coupons.consume(coupon.user_coupon_id, order_id, now)?;
                }
            }
            _ => {}
        }

        if step.applied {
            info!(
                %order_id,
                order_no = %order_no_of(current)?,
                transaction_id = %signal.transaction_id,
                amount = %signal.amount,
                "payment confirmed"
            );
        } else if current
            .payment()
            .is_some_and(|p| p.transaction_id != signal.transaction_id)
        {
            warn!(%order_id, transaction_id = %signal.transaction_id, "second payment for an already paid order");
        }
        Ok(step.transition())
    }
}

fn order_no_of(order: &Order) -> Result<OrderNo, FulfillmentError> {
    order.order_no().cloned().ok_or(FulfillmentError::OrderNotFound)
}
