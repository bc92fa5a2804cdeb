//! Happy-path transitions after payment: preparing, shipped, completed.

use serde_json::Value as JsonValue;
use tracing::info;

use storefront_core::OrderId;
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::event_store::EventStore;
use storefront_orders::{CompleteOrder, OrderCommand, ShipOrder, StartPreparing};

use crate::engine::FulfillmentEngine;
use crate::error::{FulfillmentError, Transition};

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn start_preparing(&self, order_id: OrderId) -> Result<Transition, FulfillmentError> {
        let occurred_at = self.clock.now();
        self.lifecycle_step(OrderCommand::StartPreparing(StartPreparing { order_id, occurred_at }))
    }

    pub fn ship(&self, order_id: OrderId, tracking_no: impl Into<String>) -> Result<Transition, FulfillmentError> {
        let occurred_at = self.clock.now();
        self.lifecycle_step(OrderCommand::ShipOrder(ShipOrder {
            order_id,
            tracking_no: tracking_no.into(),
            occurred_at,
        }))
    }

    pub fn complete(&self, order_id: OrderId) -> Result<Transition, FulfillmentError> {
        let occurred_at = self.clock.now();
        self.lifecycle_step(OrderCommand::CompleteOrder(CompleteOrder { order_id, occurred_at }))
    }

    fn lifecycle_step(&self, command: OrderCommand) -> Result<Transition, FulfillmentError> {
        let order_id = command.order_id();
        let step = self.orders.transition(command)?;
        let transition = step.transition();
        if step.applied {
            info!(%order_id, status = %transition.status(), "order advanced");
        }
        Ok(transition)
    }
}
