//! Projections: read models built from published order events.
//!
//! Rebuildable from the event stream and idempotent under at-least-once delivery.

pub mod order_summaries;

pub use order_summaries::{OrderSummary, OrderSummaryProjection, OrderSummaryProjectionError};
