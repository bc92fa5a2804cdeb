mod common;

use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;

use common::Harness;
use storefront_catalog::{Actor, StockKey, StockReason};
use storefront_core::{Money, OrderId};
use storefront_coupons::UserCouponStatus;
use storefront_fulfillment::{
    ExpirySweeper, FulfillmentError, GatewayError, OrderRef, PaymentSignal, RefundOutcome, Transition,
};
use storefront_infra::coupon_store::CouponStore;
use storefront_infra::intent_store::{IntentStatus, IntentStore, ReservationIntent};
use storefront_infra::stock_store::{StockMutation, StockStore};
use storefront_orders::{Order, OrderStatus};

fn paid_order(h: &Harness, lines: &[(storefront_core::ProductId, u32)]) -> Order {
    let order = h.engine().place_order(h.cart(lines)).unwrap();
    h.engine()
        .confirm_payment(PaymentSignal {
            order: OrderRef::Id(order.id_typed()),
            transaction_id: format!("tx-{}", order.id_typed()),
            amount: order.pay_amount(),
        })
        .unwrap();
    h.engine().orders().get(order.id_typed()).unwrap()
}

#[test]
fn refund_returns_stock_and_money() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let order = paid_order(&h, &[(tea, 2)]);

    let outcome = h
        .engine()
        .refund_order(order.id_typed(), Money::from_units(63), "damaged in transit")
        .unwrap();

    let expected_id = format!("rf-{}-1", order.order_no().unwrap());
    assert_eq!(outcome, RefundOutcome::Refunded { gateway_refund_id: expected_id.clone() });

    let refunded = h.engine().orders().get(order.id_typed()).unwrap();
    assert_eq!(refunded.status(), OrderStatus::Refunded);
    assert_eq!(refunded.refund().unwrap().gateway_refund_id, Some(expected_id));
    assert!(refunded.compensated_at().is_some());
    assert_eq!(h.level(tea).stock, 10);
    assert_eq!(h.level(tea).sales, 0);
    assert_eq!(h.records(tea).last().unwrap().reason, StockReason::OrderRefunded);

    let requests = h.stack.payments.refunds();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].transaction_id, format!("tx-{}", order.id_typed()));

    // Refunding again neither calls the gateway nor touches stock.
    let again = h
        .engine()
        .refund_order(order.id_typed(), Money::from_units(63), "damaged in transit")
        .unwrap();
    assert_eq!(again, RefundOutcome::Unchanged { status: OrderStatus::Refunded });
    assert_eq!(h.stack.payments.refunds().len(), 1);
    assert_eq!(h.level(tea).stock, 10);
}

#[test]
fn gateway_failure_leaves_the_refund_for_an_operator() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let order = paid_order(&h, &[(tea, 2)]);
    h.stack
        .payments
        .fail_refunds(Some(GatewayError::Unavailable("timeout".to_string())));

    let outcome = h
        .engine()
        .refund_order(order.id_typed(), Money::from_units(63), "changed mind")
        .unwrap();
    assert!(matches!(outcome, RefundOutcome::PendingManualResolution { ref reason } if reason.contains("timeout")));

    let pending = h.engine().orders().get(order.id_typed()).unwrap();
    assert_eq!(pending.status(), OrderStatus::Refunding);
    assert!(pending.refund().unwrap().failure.as_deref().is_some_and(|f| f.contains("timeout")));
    // Stock goes back as soon as the order is refunding.
    assert_eq!(h.level(tea).stock, 10);

    let resolved = h.engine().resolve_refund(order.id_typed(), "manual-77").unwrap();
    assert_eq!(resolved, RefundOutcome::Refunded { gateway_refund_id: "manual-77".to_string() });
    assert_eq!(h.engine().orders().get(order.id_typed()).unwrap().status(), OrderStatus::Refunded);
    assert_eq!(h.level(tea).stock, 10);
}

#[test]
fn unpaid_or_oversized_refunds_are_refused() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let unpaid = h.engine().place_order(h.cart(&[(tea, 1)])).unwrap();

    assert_eq!(
        h.engine().refund_order(unpaid.id_typed(), Money::from_units(1), "why").unwrap(),
        RefundOutcome::Unchanged { status: OrderStatus::Unpaid }
    );

    let paid = paid_order(&h, &[(tea, 2)]);
    let err = h
        .engine()
        .refund_order(paid.id_typed(), Money::from_units(64), "too much")
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));
    assert_eq!(h.engine().orders().get(paid.id_typed()).unwrap().status(), OrderStatus::Paid);
}

#[test]
fn a_coupon_is_claimed_once_per_user() {
    let h = Harness::new();
    let coupon = h.fixed_coupon(5, 0, 10);

    h.engine().coupons().claim(coupon, h.user, h.now()).unwrap();
    let err = h.engine().coupons().claim(coupon, h.user, h.now()).unwrap_err();

    assert!(matches!(err, FulfillmentError::CouponAlreadyClaimed));
    assert_eq!(h.stack.coupons.coupon(coupon).unwrap().unwrap().received_count, 1);
}

#[test]
fn abandoned_checkout_is_released_by_reconciliation() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let cup = h.product("Cup", 900, 900, 5);
    let coupon = h.fixed_coupon(5, 0, 10);
    let order_id = OrderId::new();

    // A checkout that reserved its first line and the coupon, then died.
    let intent = ReservationIntent::new(
        order_id,
        h.user,
        vec![(StockKey::product(tea), 3), (StockKey::product(cup), 1)],
        h.now(),
    );
    h.stack.intents.create(intent).unwrap();
    h.stack
        .stock
        .reserve(
            StockKey::product(tea),
            3,
            &StockMutation::new(StockReason::OrderReserved, Actor::User(h.user), "SO-crashed", h.now()),
        )
        .unwrap();
    h.stack.intents.record_reservation(order_id, 0, h.now()).unwrap();
    let claim = h.stack.coupons.claim(coupon, h.user, h.now()).unwrap();
    h.stack.coupons.attach(claim.id, order_id).unwrap();
    h.stack.intents.record_coupon(order_id, claim.id, h.now()).unwrap();

    // Still inside the grace period: left alone.
    assert_eq!(h.engine().reconcile_intents().unwrap().intents_compensated, 0);
    assert_eq!(h.level(tea).stock, 7);

    h.advance(Duration::minutes(6));
    let report = h.engine().reconcile_intents().unwrap();
    assert_eq!(report.intents_compensated, 1);
    assert_eq!(report.failures, 0);

    assert_eq!(h.level(tea).stock, 10);
    assert_eq!(h.level(cup).stock, 5);
    assert!(h.records(cup).is_empty());
    let last = h.records(tea).pop().unwrap();
    assert_eq!((last.delta, last.reason), (3, StockReason::IntentReconciled));

    let instance = h.stack.coupons.user_coupon(claim.id).unwrap().unwrap();
    assert_eq!(instance.status, UserCouponStatus::Unused);
    assert_eq!(instance.order_id, None);
    assert_eq!(h.stack.intents.get(order_id).unwrap().unwrap().status, IntentStatus::Compensated);

    // A second pass finds nothing.
    assert_eq!(h.engine().reconcile_intents().unwrap(), Default::default());
    assert_eq!(h.level(tea).stock, 10);
}

#[test]
fn reconcile_expires_unpaid_orders_from_the_summaries() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);

    let projection = h.stack.spawn_projection().unwrap();
    let stale = h.engine().place_order(h.cart(&[(tea, 2)])).unwrap();
    let paid = paid_order(&h, &[(tea, 1)]);
    h.advance(Duration::minutes(20));
    let fresh = h.engine().place_order(h.cart(&[(tea, 3)])).unwrap();
    // Shutdown drains the queued events into the read model.
    projection.shutdown();

    h.advance(Duration::minutes(15));
    let report = h.engine().reconcile(h.stack.summaries.as_ref()).unwrap();

    assert_eq!(report.orders_expired, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(h.engine().orders().get(stale.id_typed()).unwrap().status(), OrderStatus::Cancelled);
    assert_eq!(h.engine().orders().get(paid.id_typed()).unwrap().status(), OrderStatus::Paid);
    assert_eq!(h.engine().orders().get(fresh.id_typed()).unwrap().status(), OrderStatus::Unpaid);
    assert_eq!(h.level(tea).stock, 10 - 1 - 3);
}

#[test]
fn sweeper_closes_expired_orders_in_the_background() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);

    let projection = h.stack.spawn_projection().unwrap();
    let order = h.engine().place_order(h.cart(&[(tea, 2)])).unwrap();
    projection.shutdown();
    h.advance(Duration::minutes(31));

    let sweeper = ExpirySweeper::spawn(
        "expiry-sweeper",
        h.stack.engine.clone(),
        h.stack.summaries.clone(),
        StdDuration::from_millis(20),
    )
    .unwrap();

    let deadline = Instant::now() + StdDuration::from_secs(5);
    // The compensation marker is the last thing the pass writes.
    while h.engine().orders().get(order.id_typed()).unwrap().compensated_at().is_none() {
        assert!(Instant::now() < deadline, "sweeper did not expire the order in time");
        thread::sleep(StdDuration::from_millis(10));
    }
    sweeper.shutdown();

    assert_eq!(h.level(tea).stock, 10);
    assert_eq!(
        h.engine().expire_order(order.id_typed()).unwrap(),
        Transition::Unchanged(OrderStatus::Cancelled)
    );
}
