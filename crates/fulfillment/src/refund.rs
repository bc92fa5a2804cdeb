//! Refund Handler: `paid|preparing → refunding → refunded`.
//!
//! The order moves to `refunding` before anything else happens, stock and the
//! coupon are released like a cancellation, and only then is the gateway asked
//! to move money. A gateway failure is recorded on the order and reported as
//! pending manual resolution; it is never retried here.

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use storefront_catalog::Actor;
use storefront_core::{Money, OrderId};
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::event_store::EventStore;
use storefront_orders::{CompleteRefund, Order, OrderCommand, OrderStatus, RecordRefundFailure, RequestRefund};

use crate::compensation::display_no;
use crate::engine::FulfillmentEngine;
use crate::error::{FulfillmentError, RefundOutcome};
use crate::ports::RefundRequest;

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn refund_order(
        &self,
        order_id: OrderId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Result<RefundOutcome, FulfillmentError> {
        let now = self.clock.now();
        let reason = reason.into();

        let step = self.orders.transition(OrderCommand::RequestRefund(RequestRefund {
            order_id,
            amount,
            reason: reason.clone(),
            occurred_at: now,
        }))?;

        if !step.applied {
            // A refund requested earlier may have stopped before compensating.
            self.compensate_if_needed(&step.order, Actor::system("refund"), now)?;
            return Ok(RefundOutcome::Unchanged {
                status: step.order.status(),
            });
        }
        info!(%order_id, order_no = %display_no(&step.order), %amount, %reason, "refund requested");

        self.compensate_if_needed(&step.order, Actor::system("refund"), now)?;

        let request = refund_request(&step.order, amount, reason)?;
        match self.payments.refund(&request) {
            Ok(gateway_refund_id) => {
                self.orders.transition(OrderCommand::CompleteRefund(CompleteRefund {
                    order_id,
                    gateway_refund_id: gateway_refund_id.clone(),
                    occurred_at: self.clock.now(),
                }))?;
                info!(%order_id, %gateway_refund_id, "order refunded");
                Ok(RefundOutcome::Refunded { gateway_refund_id })
            }
            Err(err) => {
                let failure = err.to_string();
                self.orders
                    .transition(OrderCommand::RecordRefundFailure(RecordRefundFailure {
                        order_id,
                        reason: failure.clone(),
                        occurred_at: self.clock.now(),
                    }))?;
                warn!(%order_id, error = %failure, "refund gateway call failed, pending manual resolution");
                Ok(RefundOutcome::PendingManualResolution { reason: failure })
            }
        }
    }

    /// Operator follow-up for a refund left in `refunding`: record the refund
    /// the operator completed out of band.
    pub fn resolve_refund(
        &self,
        order_id: OrderId,
        gateway_refund_id: impl Into<String>,
    ) -> Result<RefundOutcome, FulfillmentError> {
        let now = self.clock.now();
        let gateway_refund_id = gateway_refund_id.into();
        let step = self.orders.transition(OrderCommand::CompleteRefund(CompleteRefund {
            order_id,
            gateway_refund_id: gateway_refund_id.clone(),
            occurred_at: now,
        }))?;

        if step.order.status() == OrderStatus::Refunded {
            self.compensate_if_needed(&step.order, Actor::system("refund"), now)?;
        }
        if !step.applied {
            return Ok(RefundOutcome::Unchanged {
                status: step.order.status(),
            });
        }
        info!(%order_id, %gateway_refund_id, "refund resolved manually");
        Ok(RefundOutcome::Refunded { gateway_refund_id })
    }
}

fn refund_request(order: &Order, amount: Money, reason: String) -> Result<RefundRequest, FulfillmentError> {
    let order_no = order.order_no().cloned().ok_or(FulfillmentError::OrderNotFound)?;
    let transaction_id = order
        .payment()
        .map(|p| p.transaction_id.clone())
        .ok_or_else(|| FulfillmentError::Store(format!("order {order_no} has no payment record")))?;
    Ok(RefundRequest {
        order_id: order.id_typed(),
        order_no,
        transaction_id,
        amount,
        reason,
    })
}
