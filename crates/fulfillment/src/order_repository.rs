//! Order access for the engine: guarded transitions with reload-and-redecide.

use serde_json::Value as JsonValue;
use tracing::debug;

use storefront_core::OrderId;
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use storefront_infra::event_store::EventStore;
use storefront_infra::order_index::OrderIndex;
use storefront_orders::{ORDER_AGGREGATE_TYPE, Order, OrderCommand, OrderNo};

use crate::error::{FulfillmentError, Transition};

/// Appends lost to a concurrent writer are retried this many times.
const MAX_ATTEMPTS: usize = 8;

/// A transition attempt and the order as it stands afterwards.
#[derive(Debug, Clone)]
pub struct Step {
    pub order: Order,
    pub applied: bool,
}

impl Step {
    pub fn transition(&self) -> Transition {
        if self.applied {
            Transition::Applied(self.order.status())
        } else {
            Transition::Unchanged(self.order.status())
        }
    }
}

#[derive(Debug)]
pub struct OrderRepository<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> OrderRepository<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// The order, or `None` if it was never placed.
    pub fn find(&self, order_id: OrderId) -> Result<Option<Order>, FulfillmentError> {
        let order = self
            .dispatcher
            .load(order_id.aggregate_id(), |id| Order::empty(OrderId::from(id)))?;
        Ok(order.is_created().then_some(order))
    }

    pub fn get(&self, order_id: OrderId) -> Result<Order, FulfillmentError> {
        self.find(order_id)?.ok_or(FulfillmentError::OrderNotFound)
    }

    pub fn get_by_number(&self, index: &dyn OrderIndex, order_no: &OrderNo) -> Result<Order, FulfillmentError> {
        let order_id = index.get(order_no)?.ok_or(FulfillmentError::OrderNotFound)?;
        self.get(order_id)
    }

    /// Dispatch a command that must not be retried on a lost race (placement).
    pub fn place(&self, command: OrderCommand) -> Result<Order, DispatchError> {
        let order_id = command.order_id();
        let dispatched = self.dispatcher.dispatch(
            order_id.aggregate_id(),
            ORDER_AGGREGATE_TYPE,
            command,
            |id| Order::empty(OrderId::from(id)),
        )?;
        Ok(dispatched.aggregate)
    }

    /// Apply a guarded transition.
    ///
    /// A from-status mismatch yields an unapplied `Step` with the current order.
    /// A lost append is retried against the reloaded stream, where the guard
    /// decides again. Other domain rejections (expiry, validation) are returned
    /// as `DispatchError` for the caller to interpret.
    pub fn transition(&self, command: OrderCommand) -> Result<Step, DispatchError> {
        let order_id = command.order_id();
        let aggregate_id = order_id.aggregate_id();
        let mut last_conflict = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.dispatcher.dispatch(
                aggregate_id,
                ORDER_AGGREGATE_TYPE,
                command.clone(),
                |id| Order::empty(OrderId::from(id)),
            ) {
                Ok(dispatched) => {
                    return Ok(Step {
                        order: dispatched.aggregate,
                        applied: true,
                    });
                }
                Err(DispatchError::StateConflict(reason)) => {
                    debug!(%order_id, %reason, "transition not applicable, treating as no-op");
                    let order = self
                        .dispatcher
                        .load(aggregate_id, |id| Order::empty(OrderId::from(id)))?;
                    return Ok(Step { order, applied: false });
                }
                Err(DispatchError::Concurrency(reason)) => {
                    debug!(%order_id, attempt, %reason, "lost append race, reloading");
                    last_conflict = reason;
                }
                Err(other) => return Err(other),
            }
        }

        Err(DispatchError::Concurrency(last_conflict))
    }
}
