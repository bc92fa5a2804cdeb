//! Background thread running the reconciliation pass on an interval.

use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use storefront_core::OrderId;
use storefront_events::{EventBus, EventEnvelope};
use storefront_infra::event_store::EventStore;
use storefront_infra::projections::{OrderSummary, OrderSummaryProjection};
use storefront_infra::read_model::ReadModelStore;
use storefront_infra::workers::WorkerHandle;

use crate::engine::FulfillmentEngine;

#[derive(Debug)]
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Spawn the sweeper. The first pass runs after one `interval`.
    pub fn spawn<S, B, R>(
        name: &'static str,
        engine: Arc<FulfillmentEngine<S, B>>,
        summaries: Arc<OrderSummaryProjection<R>>,
        interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: EventStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
        R: ReadModelStore<OrderId, OrderSummary> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if let Err(err) = engine.reconcile(&summaries) {
                            warn!(worker = name, error = %err, "reconciliation pass failed");
                        }
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(worker = name, "expiry sweeper stopped");
        })?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}
