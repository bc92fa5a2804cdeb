//! Infrastructure layer: stores, the command pipeline, projections and config.
//!
//! Every store is a sync trait with an in-memory implementation; the two
//! contended primitives (stock and coupon claims) also have Postgres
//! implementations behind the `postgres` feature.

pub mod command_dispatcher;
pub mod config;
pub mod coupon_store;
pub mod event_store;
pub mod intent_store;
pub mod order_index;
pub mod projections;
pub mod read_model;
pub mod stock_store;
pub mod workers;

mod integration_tests;
