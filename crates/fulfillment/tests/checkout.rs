mod common;

use std::sync::{Arc, Barrier, Mutex, OnceLock, Weak};
use std::thread;

use chrono::Duration;
use proptest::prelude::*;

use common::Harness;
use storefront_catalog::{Price, Product, StockReason};
use storefront_core::{ManualClock, Money, UserId};
use storefront_coupons::UserCouponStatus;
use storefront_fulfillment::{
    Collaborators, EngineSettings, FulfillmentEngine, FulfillmentError, GatewayError, InMemoryEngine, OrderRef,
    PaymentSignal, PointsLedger, ReconcileReport,
};
use storefront_infra::command_dispatcher::CommandDispatcher;
use storefront_infra::coupon_store::CouponStore;
use storefront_infra::intent_store::{IntentStatus, IntentStore};
use storefront_orders::{CancelReason, DeliveryMethod, DeliveryRequest, OrderStatus};

fn no_pending_intents(h: &Harness) -> bool {
    h.stack
        .intents
        .stale_pending(h.now() + Duration::days(365))
        .unwrap()
        .is_empty()
}

#[test]
fn placed_order_reserves_stock_and_snapshots_prices() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);

    let order = h.engine().place_order(h.cart(&[(tea, 2)])).unwrap();

    assert_eq!(order.status(), OrderStatus::Unpaid);
    assert_eq!(order.pay_amount(), Money::from_units(63));
    assert_eq!(order.totals().unwrap().delivery_fee, Money::from_units(10));
    assert_eq!(order.expires_at(), Some(h.now() + Duration::minutes(30)));
    assert_eq!(h.level(tea).stock, 8);
    assert_eq!(h.level(tea).sales, 2);

    // A later price change leaves the stored order alone.
    h.stack
        .catalog
        .upsert(Product::new(tea, "Tea", Price::fixed(Money::from_units(99))));
    let reloaded = h.engine().orders().get(order.id_typed()).unwrap();
    assert_eq!(reloaded.lines()[0].snapshot.list_price, Money::from_cents(2650));
    assert_eq!(reloaded.pay_amount(), Money::from_units(63));

    let intent = h.stack.intents.get(order.id_typed()).unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Committed);

    let by_number = h
        .engine()
        .orders()
        .get_by_number(h.stack.order_index.as_ref(), order.order_no().unwrap())
        .unwrap();
    assert_eq!(by_number.id_typed(), order.id_typed());
}

#[test]
fn failed_line_releases_every_earlier_reservation() {
    let h = Harness::new();
    let a = h.product("A", 1000, 1000, 10);
    let b = h.product("B", 1000, 1000, 10);
    let c = h.product("C", 1000, 1000, 1);

    let err = h
        .engine()
        .place_order(h.cart(&[(a, 2), (b, 3), (c, 5)]))
        .unwrap_err();

    match err {
        FulfillmentError::InsufficientStock {
            product_id,
            requested,
            available,
            ..
        } => {
            assert_eq!(product_id, c);
            assert_eq!((requested, available), (5, 1));
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    assert_eq!(h.level(a).stock, 10);
    assert_eq!(h.level(a).sales, 0);
    assert_eq!(h.level(b).stock, 10);
    assert_eq!(h.level(c).stock, 1);

    let a_records = h.records(a);
    assert_eq!(a_records.len(), 2);
    assert_eq!(a_records[0].reason, StockReason::OrderReserved);
    assert_eq!(a_records[1].reason, StockReason::CheckoutCompensated);
    assert_eq!(a_records.iter().map(|r| r.delta).sum::<i64>(), 0);
    assert!(h.records(c).is_empty());
    assert!(no_pending_intents(&h));
}

#[test]
fn two_buyers_for_the_last_unit() {
    let h = Harness::new();
    let lamp = h.product("Lamp", 4000, 4000, 1);
    let engine = h.stack.engine.clone();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let request = h.cart_for(UserId::new(), &[(lamp, 1)], Harness::express(), None);
            thread::spawn(move || {
                barrier.wait();
                engine.place_order(request)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|j| j.join().unwrap()).collect();
    let placed = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(FulfillmentError::InsufficientStock { .. })))
        .count();

    assert_eq!((placed, refused), (1, 1));
    assert_eq!(h.level(lamp).stock, 0);
    assert_eq!(h.level(lamp).sales, 1);
}

#[test]
fn concurrent_checkouts_never_oversell() {
    let h = Harness::new();
    let mug = h.product("Mug", 500, 500, 20);
    let engine = h.stack.engine.clone();
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let request = h.cart_for(UserId::new(), &[(mug, 3)], Harness::express(), None);
            thread::spawn(move || {
                barrier.wait();
                engine.place_order(request).is_ok()
            })
        })
        .collect();

    let successes = handles.into_iter().map(|j| j.join().unwrap()).filter(|ok| *ok).count();

    assert_eq!(successes, 20 / 3);
    assert_eq!(h.level(mug).stock, 20 - 3 * successes as u32);
    assert_eq!(h.level(mug).total(), 20);
}

#[test]
fn coupon_is_held_for_the_order_and_priced_in() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let coupon = h.fixed_coupon(5, 50, 100);

    let order = h
        .engine()
        .place_order(h.cart_for(h.user, &[(tea, 2)], Harness::express(), Some(coupon)))
        .unwrap();

    let totals = order.totals().unwrap();
    assert_eq!(totals.coupon_amount, Money::from_units(5));
    assert_eq!(totals.pay_amount, Money::from_units(58));

    let used = order.coupon().unwrap();
    let instance = h.stack.coupons.user_coupon(used.user_coupon_id).unwrap().unwrap();
    assert_eq!(instance.order_id, Some(order.id_typed()));
    assert_eq!(instance.status, UserCouponStatus::Unused);
    assert_eq!(h.stack.coupons.coupon(coupon).unwrap().unwrap().received_count, 1);
}

#[test]
fn coupon_below_min_spend_is_rejected_before_reserving() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let coupon = h.fixed_coupon(5, 100, 100);

    let err = h
        .engine()
        .place_order(h.cart_for(h.user, &[(tea, 2)], Harness::express(), Some(coupon)))
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::CouponUnavailable(_)));
    assert_eq!(h.level(tea).stock, 10);
    assert!(h.records(tea).is_empty());
    assert_eq!(h.stack.coupons.coupon(coupon).unwrap().unwrap().received_count, 0);
}

#[test]
fn stock_failure_does_not_spend_the_coupon() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let scarce = h.product("Saffron", 3000, 3000, 0);
    let coupon = h.fixed_coupon(5, 50, 100);

    let err = h
        .engine()
        .place_order(h.cart_for(h.user, &[(tea, 2), (scarce, 1)], Harness::express(), Some(coupon)))
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InsufficientStock { .. }));
    assert_eq!(h.stack.coupons.coupon(coupon).unwrap().unwrap().received_count, 0);

    let order = h
        .engine()
        .place_order(h.cart_for(h.user, &[(tea, 2)], Harness::express(), Some(coupon)))
        .unwrap();
    assert!(order.coupon().is_some());
    assert_eq!(h.level(tea).stock, 8);
}

#[test]
fn a_coupon_held_by_an_unpaid_order_cannot_be_applied_twice() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);
    let coupon = h.fixed_coupon(5, 50, 100);

    h.engine()
        .place_order(h.cart_for(h.user, &[(tea, 2)], Harness::express(), Some(coupon)))
        .unwrap();
    let err = h
        .engine()
        .place_order(h.cart_for(h.user, &[(tea, 2)], Harness::express(), Some(coupon)))
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::CouponUnavailable(_)));
    assert_eq!(h.level(tea).stock, 8);
    assert_eq!(h.stack.coupons.coupon(coupon).unwrap().unwrap().received_count, 1);
    assert!(no_pending_intents(&h));
}

#[test]
fn malformed_carts_are_rejected_without_side_effects() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 10);

    let empty = h.cart(&[]);
    assert!(matches!(h.engine().place_order(empty), Err(FulfillmentError::Validation(_))));

    let zero = h.cart(&[(tea, 0)]);
    assert!(matches!(h.engine().place_order(zero), Err(FulfillmentError::Validation(_))));

    let no_address = h.cart_for(
        h.user,
        &[(tea, 1)],
        DeliveryRequest {
            method: DeliveryMethod::Express,
            address: None,
            pickup: None,
        },
        None,
    );
    assert!(matches!(h.engine().place_order(no_address), Err(FulfillmentError::Validation(_))));

    assert_eq!(h.level(tea).stock, 10);
    assert!(h.records(tea).is_empty());
}

#[test]
fn pickup_is_free_and_points_are_captured() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2000, 10);
    h.stack.points.set_balance(h.user, 30);

    let order = h
        .engine()
        .place_order(h.cart_for(h.user, &[(tea, 2)], h.pickup(), None))
        .unwrap();

    let totals = order.totals().unwrap();
    assert_eq!(totals.goods_total, Money::from_units(53));
    assert_eq!(totals.discount_amount, Money::from_units(13));
    assert_eq!(totals.delivery_fee, Money::ZERO);
    assert_eq!(totals.pay_amount, Money::from_units(40));

    let points = order.points().unwrap();
    assert_eq!(points.required_points, 40);
    assert_eq!(points.user_points_at_creation, 30);
    assert!(!order.points_sufficient());
}

#[test]
fn variants_are_priced_and_stocked_per_variant() {
    let h = Harness::new();
    let (shirt, sizes) = h.product_with_variants("Shirt", &[("S", 1500, 1500, 4), ("L", 2000, 1800, 2)]);
    let (small, large) = (sizes[0], sizes[1]);

    let order = h.engine().place_order(h.variant_cart(&[(shirt, Some(large), 2)])).unwrap();

    let snapshot = &order.lines()[0].snapshot;
    assert_eq!(snapshot.variant_id, Some(large));
    assert_eq!(snapshot.variant_name.as_deref(), Some("L"));
    assert_eq!(snapshot.list_price, Money::from_cents(2000));
    assert_eq!(snapshot.sale_price, Money::from_cents(1800));
    assert_eq!(order.totals().unwrap().goods_total, Money::from_units(40));

    assert_eq!((h.variant_level(shirt, large).stock, h.variant_level(shirt, large).sales), (0, 2));
    assert_eq!((h.variant_level(shirt, small).stock, h.variant_level(shirt, small).sales), (4, 0));
    assert!(h.variant_records(shirt, small).is_empty());

    // The sold-out size is refused while the other one still sells.
    let err = h
        .engine()
        .place_order(h.variant_cart(&[(shirt, Some(large), 1)]))
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::InsufficientStock { variant_id: Some(v), requested: 1, available: 0, .. } if v == large
    ));
    h.engine().place_order(h.variant_cart(&[(shirt, Some(small), 1)])).unwrap();
    assert_eq!(h.variant_level(shirt, small).stock, 3);

    // A variant product cannot be ordered without naming the variant.
    let err = h.engine().place_order(h.variant_cart(&[(shirt, None, 1)])).unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));

    h.engine().cancel_order(order.id_typed()).unwrap();
    assert_eq!((h.variant_level(shirt, large).stock, h.variant_level(shirt, large).sales), (2, 0));
    assert_eq!(h.variant_level(shirt, small).stock, 3);

    let records = h.variant_records(shirt, large);
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].delta, records[0].reason), (-2, StockReason::OrderReserved));
    assert_eq!((records[1].delta, records[1].reason), (2, StockReason::OrderCancelled));
}

/// A points ledger that stalls long enough for the intent sweep to run
/// while the checkout is still between reserving and placing.
struct StallingLedger {
    clock: Arc<ManualClock>,
    engine: OnceLock<Weak<InMemoryEngine>>,
    reports: Mutex<Vec<ReconcileReport>>,
}

impl PointsLedger for StallingLedger {
    fn balance(&self, _user_id: UserId) -> Result<u64, GatewayError> {
        self.clock.advance(Duration::minutes(10));
        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            let report = engine
                .reconcile_intents()
                .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
            self.reports.lock().unwrap().push(report);
        }
        Ok(0)
    }
}

#[test]
fn checkout_outliving_the_grace_period_cancels_its_order() {
    let h = Harness::new();
    let tea = h.product("Tea", 2650, 2650, 1);
    let coupon = h.fixed_coupon(5, 0, 10);

    let ledger = Arc::new(StallingLedger {
        clock: h.clock.clone(),
        engine: OnceLock::new(),
        reports: Mutex::new(Vec::new()),
    });
    let stalled = Arc::new(FulfillmentEngine::new(
        CommandDispatcher::new(h.stack.events.clone(), h.stack.bus.clone()),
        Collaborators {
            stock: h.stack.stock.clone(),
            coupons: h.stack.coupons.clone(),
            intents: h.stack.intents.clone(),
            order_index: h.stack.order_index.clone(),
            catalog: h.stack.catalog.clone(),
            payments: h.stack.payments.clone(),
            points: ledger.clone(),
            clock: h.clock.clone(),
        },
        EngineSettings::default(),
    ));
    ledger.engine.set(Arc::downgrade(&stalled)).unwrap();

    let err = stalled
        .place_order(h.cart_for(h.user, &[(tea, 1)], Harness::express(), Some(coupon)))
        .unwrap_err();
    let order_no = match err {
        FulfillmentError::OrderCancelled { order_no } => order_no,
        other => panic!("expected a cancelled checkout, got {other:?}"),
    };

    let reports = ledger.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].intents_compensated, 1);
    assert_eq!(reports[0].failures, 0);

    // Released once by the sweep; the checkout's own release finds it done.
    assert_eq!(h.level(tea).stock, 1);
    assert_eq!(h.level(tea).sales, 0);
    let records = h.records(tea);
    assert_eq!(records.len(), 2);
    assert_eq!((records[1].delta, records[1].reason), (1, StockReason::IntentReconciled));
    assert_eq!(records.iter().map(|r| r.delta).sum::<i64>(), 0);

    let order = h
        .engine()
        .orders()
        .get_by_number(h.stack.order_index.as_ref(), &order_no)
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.cancel_reason(), Some(CancelReason::CheckoutAbandoned));
    assert!(order.compensated_at().is_some());
    assert_eq!(
        h.stack.intents.get(order.id_typed()).unwrap().unwrap().status,
        IntentStatus::Compensated
    );

    let instance = h
        .stack
        .coupons
        .user_coupon(order.coupon().unwrap().user_coupon_id)
        .unwrap()
        .unwrap();
    assert_eq!(instance.status, UserCouponStatus::Unused);
    assert_eq!(instance.order_id, None);

    let paid = h.engine().confirm_payment(PaymentSignal {
        order: OrderRef::Id(order.id_typed()),
        transaction_id: "tx-late".to_string(),
        amount: order.pay_amount(),
    });
    assert!(matches!(paid, Err(FulfillmentError::OrderCancelled { .. })));

    // The unit is still there for the next buyer.
    let next = h
        .engine()
        .place_order(h.cart_for(UserId::new(), &[(tea, 1)], Harness::express(), None))
        .unwrap();
    assert_eq!(next.status(), OrderStatus::Unpaid);
    assert_eq!(h.level(tea).stock, 0);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: whatever sequence of carts arrives, admitted quantity never exceeds stock
    /// and refused carts leave no trace.
    #[test]
    fn admitted_quantity_never_exceeds_stock(stock in 0u32..40, carts in proptest::collection::vec(1u32..8, 1..20)) {
        let h = Harness::new();
        let item = h.product("Item", 100, 100, stock);

        let mut admitted = 0u32;
        for quantity in carts {
            if h.engine().place_order(h.cart(&[(item, quantity)])).is_ok() {
                admitted += quantity;
            }
        }

        prop_assert!(admitted <= stock);
        prop_assert_eq!(h.level(item).stock, stock - admitted);
        prop_assert_eq!(h.level(item).total(), u64::from(stock));
    }
}
