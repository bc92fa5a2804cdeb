//! Concrete wiring of the engine over the in-memory stores (dev and tests).

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use storefront_core::{Clock, OrderId};
use storefront_events::{EventEnvelope, InMemoryEventBus};
use storefront_infra::command_dispatcher::CommandDispatcher;
use storefront_infra::config::FulfillmentConfig;
use storefront_infra::coupon_store::InMemoryCouponStore;
use storefront_infra::event_store::InMemoryEventStore;
use storefront_infra::intent_store::InMemoryIntentStore;
use storefront_infra::order_index::InMemoryOrderIndex;
use storefront_infra::projections::{OrderSummary, OrderSummaryProjection};
use storefront_infra::read_model::InMemoryReadModelStore;
use storefront_infra::stock_store::InMemoryStockStore;
use storefront_infra::workers::{ProjectionWorker, WorkerHandle};

use crate::engine::{Collaborators, EngineSettings, FulfillmentEngine};
use crate::ports::{InMemoryCatalog, InMemoryPaymentGateway, InMemoryPointsLedger};

pub type InMemoryBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

pub type InMemoryEngine = FulfillmentEngine<Arc<InMemoryEventStore>, InMemoryBus>;

pub type InMemorySummaries = OrderSummaryProjection<Arc<InMemoryReadModelStore<OrderId, OrderSummary>>>;

/// The engine plus typed handles on every in-memory store behind it.
#[derive(Clone)]
pub struct InMemoryStack {
    pub engine: Arc<InMemoryEngine>,
    pub events: Arc<InMemoryEventStore>,
    pub bus: InMemoryBus,
    pub stock: Arc<InMemoryStockStore>,
    pub coupons: Arc<InMemoryCouponStore>,
    pub intents: Arc<InMemoryIntentStore>,
    pub order_index: Arc<InMemoryOrderIndex>,
    pub catalog: Arc<InMemoryCatalog>,
    pub payments: Arc<InMemoryPaymentGateway>,
    pub points: Arc<InMemoryPointsLedger>,
    pub summaries: Arc<InMemorySummaries>,
}

impl InMemoryStack {
    pub fn new(config: &FulfillmentConfig, clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(InMemoryEventStore::new());
        let bus: InMemoryBus = Arc::new(InMemoryEventBus::new());
        let stock = Arc::new(InMemoryStockStore::new());
        let coupons = Arc::new(InMemoryCouponStore::new());
        let intents = Arc::new(InMemoryIntentStore::new());
        let order_index = Arc::new(InMemoryOrderIndex::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let payments = Arc::new(InMemoryPaymentGateway::new());
        let points = Arc::new(InMemoryPointsLedger::new());
        let summaries: Arc<InMemorySummaries> = Arc::new(OrderSummaryProjection::new(Arc::new(InMemoryReadModelStore::new())));

        let collaborators = Collaborators {
            stock: stock.clone(),
            coupons: coupons.clone(),
            intents: intents.clone(),
            order_index: order_index.clone(),
            catalog: catalog.clone(),
            payments: payments.clone(),
            points: points.clone(),
            clock,
        };
        let engine = Arc::new(FulfillmentEngine::new(
            CommandDispatcher::new(events.clone(), bus.clone()),
            collaborators,
            EngineSettings::from_config(config),
        ));

        Self {
            engine,
            events,
            bus,
            stock,
            coupons,
            intents,
            order_index,
            catalog,
            payments,
            points,
            summaries,
        }
    }

    /// Feed published order events into the summary read model.
    pub fn spawn_projection(&self) -> io::Result<WorkerHandle> {
        let summaries = self.summaries.clone();
        ProjectionWorker::spawn("order-summaries", self.bus.clone(), move |env: EventEnvelope<JsonValue>| {
            summaries.apply_envelope(&env)
        })
    }
}
