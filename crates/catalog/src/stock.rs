use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::{ProductId, UserId, VariantId};

/// Identifies one stock counter: a product, or one variant of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl StockKey {
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id,
            variant_id: None,
        }
    }

    pub fn variant(product_id: ProductId, variant_id: VariantId) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.variant_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => core::fmt::Display::fmt(&self.product_id, f),
        }
    }
}

/// Available stock and the derived sales counter for one key.
///
/// `stock` is unsigned, so the non-negative invariant is a type property; the
/// only way down is `try_reserve`, which refuses to cross zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub stock: u32,
    pub sales: u64,
}

/// Why a reservation could not be satisfied.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: u32,
    pub available: u32,
}

impl StockLevel {
    pub fn new(stock: u32) -> Self {
        Self { stock, sales: 0 }
    }

    /// Decrement stock and increment sales in lock-step, only if enough stock exists.
    pub fn try_reserve(self, quantity: u32) -> Result<StockLevel, Shortfall> {
        match self.stock.checked_sub(quantity) {
            Some(stock) => Ok(StockLevel {
                stock,
                sales: self.sales + u64::from(quantity),
            }),
            None => Err(Shortfall {
                requested: quantity,
                available: self.stock,
            }),
        }
    }

    /// Unconditional inverse of `try_reserve`.
    pub fn release(self, quantity: u32) -> StockLevel {
        StockLevel {
            stock: self.stock.saturating_add(quantity),
            sales: self.sales.saturating_sub(u64::from(quantity)),
        }
    }

    /// `stock + sales`, constant across any reserve/release pair.
    pub fn total(&self) -> u64 {
        u64::from(self.stock) + self.sales
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    /// Reserved for a new order.
    OrderReserved,
    /// Rolled back because a later checkout step failed.
    CheckoutCompensated,
    OrderCancelled,
    OrderExpired,
    OrderRefunded,
    /// Released by the reconciliation sweep for an abandoned checkout.
    IntentReconciled,
    /// Catalog restock (outside the order lifecycle).
    Restock,
}

/// Who caused a stock mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    System(String),
}

impl Actor {
    pub fn system(name: impl Into<String>) -> Self {
        Actor::System(name.into())
    }
}

/// Idempotency key for a release ("undo this specific reservation").
///
/// Built from the reservation's owner (checkout intent or order number) and the
/// line index; a store applies a given reference at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseRef(String);

impl ReleaseRef {
    pub fn for_line(owner: impl core::fmt::Display, line_index: usize) -> Self {
        Self(format!("{owner}#{line_index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append-only audit entry for one stock mutation. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub record_id: Uuid,
    pub key: StockKey,
    /// Negative for reservations, positive for releases.
    pub delta: i64,
    pub stock_before: u32,
    pub stock_after: u32,
    pub reason: StockReason,
    pub actor: Actor,
    /// Order number or checkout intent this mutation belongs to.
    pub reference: String,
    pub recorded_at: DateTime<Utc>,
}
