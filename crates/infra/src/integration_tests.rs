//! Command → EventStore → EventBus → Projection → ReadModel, end to end.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::{DateTime, Utc};
    use serde_json::Value as JsonValue;

    use storefront_catalog::PriceSnapshot;
    use storefront_core::{Money, OrderId, ProductId, UserId};
    use storefront_events::{EventEnvelope, InMemoryEventBus};
    use storefront_orders::{
        CancelOrder, CancelReason, ConfirmPayment, Delivery, ORDER_AGGREGATE_TYPE, Order, OrderCommand,
        OrderLine, OrderNo, OrderStatus, PickupSlot, PlaceOrder, PointsRequirement, PricingRules,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::projections::{OrderSummary, OrderSummaryProjection};
    use crate::read_model::InMemoryReadModelStore;
    use crate::workers::ProjectionWorker;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Projection = Arc<OrderSummaryProjection<Arc<InMemoryReadModelStore<OrderId, OrderSummary>>>>;

    fn setup() -> (CommandDispatcher<Arc<InMemoryEventStore>, Bus>, Projection, crate::workers::WorkerHandle) {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let projection: Projection = Arc::new(OrderSummaryProjection::new(Arc::new(InMemoryReadModelStore::new())));

        let p = projection.clone();
        let worker = ProjectionWorker::spawn("order-summaries", bus.clone(), move |env: EventEnvelope<JsonValue>| {
            p.apply_envelope(&env)
        })
        .unwrap();

        (CommandDispatcher::new(store, bus), projection, worker)
    }

    fn wait_for(projection: &Projection, order_id: OrderId, status: OrderStatus) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if projection.get(order_id).is_some_and(|s| s.status == status) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("order {order_id} never reached {status}");
    }

    fn place(order_id: OrderId, at: DateTime<Utc>) -> OrderCommand {
        let lines = vec![OrderLine {
            line_no: 1,
            snapshot: PriceSnapshot {
                product_id: ProductId::new(),
                variant_id: None,
                product_name: "Tea".to_string(),
                variant_name: None,
                list_price: Money::from_units(20),
                sale_price: Money::from_units(18),
            },
            quantity: 2,
        }];
        let delivery = Delivery::Pickup {
            slot: PickupSlot {
                store_id: "downtown".to_string(),
                window_start: at + chrono::Duration::hours(2),
                window_end: at + chrono::Duration::hours(3),
            },
        };
        let totals = PricingRules::default().quote(&lines, &delivery, Money::ZERO);
        OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            order_no: OrderNo::generate(at),
            user_id: UserId::new(),
            lines,
            delivery,
            totals,
            coupon: None,
            points: PointsRequirement {
                required_points: 36,
                user_points_at_creation: 0,
            },
            placed_at: at,
            expires_at: at + chrono::Duration::minutes(30),
        })
    }

    fn dispatch(
        dispatcher: &CommandDispatcher<Arc<InMemoryEventStore>, Bus>,
        cmd: OrderCommand,
    ) -> Result<Order, DispatchError> {
        let order_id = cmd.order_id();
        dispatcher
            .dispatch(order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, cmd, |id| {
                Order::empty(OrderId::from(id))
            })
            .map(|d| d.aggregate)
    }

    #[test]
    fn placed_order_reaches_the_summary_read_model() {
        let (dispatcher, projection, worker) = setup();
        let order_id = OrderId::new();
        let now = Utc::now();

        let order = dispatch(&dispatcher, place(order_id, now)).unwrap();
        assert_eq!(order.pay_amount(), Money::from_units(36));
        wait_for(&projection, order_id, OrderStatus::Unpaid);

        let summary = projection.get(order_id).unwrap();
        assert_eq!(summary.pay_amount, Money::from_units(36));
        assert!(projection.expired_unpaid(now).is_empty());
        assert_eq!(projection.expired_unpaid(now + chrono::Duration::minutes(30)).len(), 1);
        worker.shutdown();
    }

    #[test]
    fn second_transition_from_same_status_is_a_state_conflict() {
        let (dispatcher, projection, worker) = setup();
        let order_id = OrderId::new();
        let now = Utc::now();
        dispatch(&dispatcher, place(order_id, now)).unwrap();

        let cancel = OrderCommand::CancelOrder(CancelOrder {
            order_id,
            reason: CancelReason::UserRequested,
            cancelled_at: now,
        });
        dispatch(&dispatcher, cancel.clone()).unwrap();
        let err = dispatch(&dispatcher, cancel).unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict(_)));

        let pay = OrderCommand::ConfirmPayment(ConfirmPayment {
            order_id,
            transaction_id: "txn".to_string(),
            paid_amount: Money::from_units(36),
            paid_at: now,
        });
        assert!(matches!(dispatch(&dispatcher, pay), Err(DispatchError::StateConflict(_))));

        wait_for(&projection, order_id, OrderStatus::Cancelled);
        assert_eq!(projection.awaiting_compensation().len(), 1);
        worker.shutdown();
    }

    #[test]
    fn stale_writer_loses_the_append() {
        let (dispatcher, _projection, worker) = setup();
        let order_id = OrderId::new();
        let now = Utc::now();
        dispatch(&dispatcher, place(order_id, now)).unwrap();

        // Both writers decide against version 1; the second append must fail.
        let stream = dispatcher.store().load_stream(order_id.aggregate_id()).unwrap();
        assert_eq!(stream.len(), 1);
        let stale = stream[0].clone();
        let mut replay = crate::event_store::UncommittedEvent {
            event_id: uuid::Uuid::now_v7(),
            aggregate_id: stale.aggregate_id,
            aggregate_type: stale.aggregate_type.clone(),
            event_type: stale.event_type.clone(),
            event_version: stale.event_version,
            occurred_at: stale.occurred_at,
            payload: stale.payload.clone(),
        };
        dispatcher
            .store()
            .append(vec![replay.clone()], storefront_core::ExpectedVersion::Exact(1))
            .unwrap();
        replay.event_id = uuid::Uuid::now_v7();
        let err = dispatcher
            .store()
            .append(vec![replay], storefront_core::ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, crate::event_store::EventStoreError::Concurrency(_)));
        worker.shutdown();
    }

    #[test]
    fn rebuild_replays_to_the_same_state() {
        let (dispatcher, projection, worker) = setup();
        let order_id = OrderId::new();
        let now = Utc::now();
        dispatch(&dispatcher, place(order_id, now)).unwrap();
        dispatch(
            &dispatcher,
            OrderCommand::ConfirmPayment(ConfirmPayment {
                order_id,
                transaction_id: "txn".to_string(),
                paid_amount: Money::from_units(36),
                paid_at: now,
            }),
        )
        .unwrap();
        wait_for(&projection, order_id, OrderStatus::Paid);
        let before = projection.get(order_id);

        let envelopes: Vec<_> = dispatcher
            .store()
            .load_stream(order_id.aggregate_id())
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();
        projection.rebuild_from_scratch(envelopes).unwrap();

        assert_eq!(projection.get(order_id), before);
        worker.shutdown();
    }
}
