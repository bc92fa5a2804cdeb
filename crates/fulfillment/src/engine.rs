//! The engine: one value wiring the stores, collaborators and settings that
//! every fulfillment operation shares.
//!
//! Operations are implemented in their own modules (`checkout`, `payment`,
//! `compensation`, `refund`, `lifecycle`, `reconciliation`) as `impl` blocks on
//! [`FulfillmentEngine`].

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value as JsonValue;

use storefront_core::Clock;
use storefront_coupons::CouponReleasePolicy;
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::command_dispatcher::CommandDispatcher;
use storefront_infra::config::FulfillmentConfig;
use storefront_infra::coupon_store::CouponStore;
use storefront_infra::event_store::EventStore;
use storefront_infra::intent_store::IntentStore;
use storefront_infra::order_index::OrderIndex;
use storefront_infra::stock_store::StockStore;
use storefront_orders::PricingRules;

use crate::coupon_reservation::CouponReservation;
use crate::order_repository::OrderRepository;
use crate::ports::{PaymentGateway, PointsLedger, ProductCatalog};
use crate::stock_ledger::StockLedger;

/// Tunables taken from `FulfillmentConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub pricing: PricingRules,
    pub payment_ttl: Duration,
    pub coupon_release_policy: CouponReleasePolicy,
    pub intent_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&FulfillmentConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &FulfillmentConfig) -> Self {
        Self {
            pricing: config.pricing_rules(),
            payment_ttl: config.payment_ttl(),
            coupon_release_policy: config.coupon_release_policy,
            intent_grace: config.intent_grace(),
        }
    }
}

/// Stores and external collaborators, besides the order event store.
#[derive(Clone)]
pub struct Collaborators {
    pub stock: Arc<dyn StockStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub intents: Arc<dyn IntentStore>,
    pub order_index: Arc<dyn OrderIndex>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub payments: Arc<dyn PaymentGateway>,
    pub points: Arc<dyn PointsLedger>,
    pub clock: Arc<dyn Clock>,
}

pub struct FulfillmentEngine<S, B> {
    pub(crate) orders: OrderRepository<S, B>,
    pub(crate) stock: StockLedger,
    pub(crate) coupons: CouponReservation,
    pub(crate) intents: Arc<dyn IntentStore>,
    pub(crate) order_index: Arc<dyn OrderIndex>,
    pub(crate) catalog: Arc<dyn ProductCatalog>,
    pub(crate) payments: Arc<dyn PaymentGateway>,
    pub(crate) points: Arc<dyn PointsLedger>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: EngineSettings,
}

impl<S, B> std::fmt::Debug for FulfillmentEngine<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<S, B> FulfillmentEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, collaborators: Collaborators, settings: EngineSettings) -> Self {
        Self {
            orders: OrderRepository::new(dispatcher),
            stock: StockLedger::new(collaborators.stock),
            coupons: CouponReservation::new(collaborators.coupons, settings.coupon_release_policy),
            intents: collaborators.intents,
            order_index: collaborators.order_index,
            catalog: collaborators.catalog,
            payments: collaborators.payments,
            points: collaborators.points,
            clock: collaborators.clock,
            settings,
        }
    }

    pub fn orders(&self) -> &OrderRepository<S, B> {
        &self.orders
    }

    pub fn stock(&self) -> &StockLedger {
        &self.stock
    }

    pub fn coupons(&self) -> &CouponReservation {
        &self.coupons
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
