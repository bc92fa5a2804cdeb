//! Catalog domain module: product prices and per-variant stock levels.
//!
//! Pure rules only. The atomic stock primitives live behind `StockStore` in
//! `storefront-infra`; this crate defines what a reservation *means*.

pub mod product;
pub mod stock;

pub use product::{Price, PriceSnapshot, Product, ProductStatus, ProductVariant};
pub use stock::{Actor, ReleaseRef, Shortfall, StockKey, StockLevel, StockReason, StockRecord};
