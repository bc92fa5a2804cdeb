#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use storefront_catalog::{Price, Product, StockKey, StockLevel, StockRecord};
use storefront_core::{Clock, CouponId, ManualClock, Money, ProductId, UserId, VariantId};
use storefront_coupons::{Coupon, CouponDiscount};
use storefront_fulfillment::{CartLine, CheckoutRequest, InMemoryEngine, InMemoryStack};
use storefront_infra::config::FulfillmentConfig;
use storefront_infra::coupon_store::CouponStore;
use storefront_infra::stock_store::StockStore;
use storefront_observability::ObservabilityConfig;
use storefront_orders::{Address, DeliveryMethod, DeliveryRequest, PickupSlot};

pub struct Harness {
    pub stack: InMemoryStack,
    pub clock: Arc<ManualClock>,
    pub user: UserId,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FulfillmentConfig::default())
    }

    pub fn with_config(config: FulfillmentConfig) -> Self {
        storefront_observability::init_with(&ObservabilityConfig::for_tests("warn"));
        let clock = Arc::new(ManualClock::new(start()));
        let stack = InMemoryStack::new(&config, clock.clone());
        Self {
            stack,
            clock,
            user: UserId::new(),
        }
    }

    pub fn engine(&self) -> &InMemoryEngine {
        &self.stack.engine
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// A product without variants, priced at `list`/`sale` cents, with `stock` units.
    pub fn product(&self, name: &str, list_cents: u64, sale_cents: u64, stock: u32) -> ProductId {
        let id = ProductId::new();
        let price = Price::new(Money::from_cents(list_cents), Money::from_cents(sale_cents)).unwrap();
        self.stack.catalog.upsert(Product::new(id, name, price));
        self.stack.stock.seed(StockKey::product(id), stock).unwrap();
        id
    }

    /// A product sold only by variant. Each `(name, list, sale, stock)` entry
    /// gets its own price and its own stock counter; the returned ids follow
    /// the input order.
    pub fn product_with_variants(&self, name: &str, variants: &[(&str, u64, u64, u32)]) -> (ProductId, Vec<VariantId>) {
        let id = ProductId::new();
        let (base_list, base_sale) = variants.first().map(|&(_, list, sale, _)| (list, sale)).unwrap_or((0, 0));
        let base = Price::new(Money::from_cents(base_list), Money::from_cents(base_sale)).unwrap();
        let mut product = Product::new(id, name, base);
        let mut ids = Vec::with_capacity(variants.len());

        for (variant_name, list_cents, sale_cents, stock) in variants {
            let vid = VariantId::new();
            let price = Price::new(Money::from_cents(*list_cents), Money::from_cents(*sale_cents)).unwrap();
            product = product.with_variant(vid, *variant_name, price);
            self.stack.stock.seed(StockKey::variant(id, vid), *stock).unwrap();
            ids.push(vid);
        }
        self.stack.catalog.upsert(product);
        (id, ids)
    }

    pub fn fixed_coupon(&self, amount_units: u64, min_spend_units: u64, total: u32) -> CouponId {
        let id = CouponId::new();
        self.stack
            .coupons
            .put_coupon(Coupon {
                id,
                name: format!("{amount_units} off"),
                discount: CouponDiscount::FixedAmount {
                    amount: Money::from_units(amount_units),
                },
                min_spend: Money::from_units(min_spend_units),
                start_time: self.now() - Duration::days(1),
                end_time: self.now() + Duration::days(30),
                enabled: true,
                total_count: total,
                received_count: 0,
            })
            .unwrap();
        id
    }

    pub fn express() -> DeliveryRequest {
        DeliveryRequest {
            method: DeliveryMethod::Express,
            address: Some(Address {
                recipient: "Grace".to_string(),
                phone: "555-0101".to_string(),
                line: "7 Compiler Street".to_string(),
            }),
            pickup: None,
        }
    }

    pub fn pickup(&self) -> DeliveryRequest {
        DeliveryRequest {
            method: DeliveryMethod::Pickup,
            address: None,
            pickup: Some(PickupSlot {
                store_id: "harbour".to_string(),
                window_start: self.now() + Duration::hours(2),
                window_end: self.now() + Duration::hours(4),
            }),
        }
    }

    pub fn cart(&self, lines: &[(ProductId, u32)]) -> CheckoutRequest {
        self.cart_for(self.user, lines, Self::express(), None)
    }

    pub fn cart_for(
        &self,
        user_id: UserId,
        lines: &[(ProductId, u32)],
        delivery: DeliveryRequest,
        coupon_id: Option<CouponId>,
    ) -> CheckoutRequest {
        let lines: Vec<_> = lines
            .iter()
            .map(|(product_id, quantity)| (*product_id, None, *quantity))
            .collect();
        self.variant_cart_for(user_id, &lines, delivery, coupon_id)
    }

    /// Cart lines addressed by `(product, variant, quantity)`.
    pub fn variant_cart(&self, lines: &[(ProductId, Option<VariantId>, u32)]) -> CheckoutRequest {
        self.variant_cart_for(self.user, lines, Self::express(), None)
    }

    pub fn variant_cart_for(
        &self,
        user_id: UserId,
        lines: &[(ProductId, Option<VariantId>, u32)],
        delivery: DeliveryRequest,
        coupon_id: Option<CouponId>,
    ) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            lines: lines
                .iter()
                .map(|(product_id, variant_id, quantity)| CartLine {
                    product_id: *product_id,
                    variant_id: *variant_id,
                    quantity: *quantity,
                })
                .collect(),
            delivery,
            coupon_id,
        }
    }

    pub fn level(&self, product_id: ProductId) -> StockLevel {
        self.stack.stock.level(StockKey::product(product_id)).unwrap().unwrap()
    }

    pub fn records(&self, product_id: ProductId) -> Vec<StockRecord> {
        self.stack.stock.records(StockKey::product(product_id)).unwrap()
    }

    pub fn variant_level(&self, product_id: ProductId, variant_id: VariantId) -> StockLevel {
        self.stack
            .stock
            .level(StockKey::variant(product_id, variant_id))
            .unwrap()
            .unwrap()
    }

    pub fn variant_records(&self, product_id: ProductId, variant_id: VariantId) -> Vec<StockRecord> {
        self.stack
            .stock
            .records(StockKey::variant(product_id, variant_id))
            .unwrap()
    }
}
