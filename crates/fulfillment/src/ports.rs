//! Collaborators outside the engine: catalog reads, the payment gateway and
//! the loyalty ledger.
//!
//! In-memory implementations are provided for tests and local runs. The fake
//! gateway can be scripted to fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_catalog::Product;
use storefront_core::{Money, OrderId, ProductId, UserId};
use storefront_orders::OrderNo;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway declined: {0}")]
    Declined(String),

    #[error("gateway unreachable: {0}")]
    Unavailable(String),
}

/// Read access to current product data.
pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: ProductId) -> Result<Option<Product>, GatewayError>;
}

/// What the engine asks the gateway to give back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_id: OrderId,
    pub order_no: OrderNo,
    pub transaction_id: String,
    pub amount: Money,
    pub reason: String,
}

pub trait PaymentGateway: Send + Sync {
    /// Initiate a refund. Returns the gateway's refund id.
    fn refund(&self, request: &RefundRequest) -> Result<String, GatewayError>;
}

/// Read-only view of a user's loyalty balance.
pub trait PointsLedger: Send + Sync {
    fn balance(&self, user_id: UserId) -> Result<u64, GatewayError>;
}

impl<T: ProductCatalog + ?Sized> ProductCatalog for Arc<T> {
    fn product(&self, id: ProductId) -> Result<Option<Product>, GatewayError> {
        (**self).product(id)
    }
}

impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    fn refund(&self, request: &RefundRequest) -> Result<String, GatewayError> {
        (**self).refund(request)
    }
}

impl<T: PointsLedger + ?Sized> PointsLedger for Arc<T> {
    fn balance(&self, user_id: UserId) -> Result<u64, GatewayError> {
        (**self).balance(user_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product (price changes included).
    pub fn upsert(&self, product: Product) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product.id, product);
        }
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> Result<Option<Product>, GatewayError> {
        let products = self
            .products
            .read()
            .map_err(|_| GatewayError::Unavailable("catalog lock poisoned".to_string()))?;
        Ok(products.get(&id).cloned())
    }
}

/// Gateway fake that records every refund it was asked for.
#[derive(Debug, Default)]
pub struct InMemoryPaymentGateway {
    state: Mutex<GatewayState>,
}

#[derive(Debug, Default)]
struct GatewayState {
    fail_with: Option<GatewayError>,
    refunds: Vec<RefundRequest>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent refund calls fail with `error` (`None` restores success).
    pub fn fail_refunds(&self, error: Option<GatewayError>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_with = error;
        }
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.state.lock().map(|s| s.refunds.clone()).unwrap_or_default()
    }
}

impl PaymentGateway for InMemoryPaymentGateway {
    fn refund(&self, request: &RefundRequest) -> Result<String, GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Unavailable("gateway lock poisoned".to_string()))?;
        if let Some(err) = state.fail_with.clone() {
            return Err(err);
        }
        state.refunds.push(request.clone());
        Ok(format!("rf-{}-{}", request.order_no, state.refunds.len()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPointsLedger {
    balances: RwLock<HashMap<UserId, u64>>,
}

impl InMemoryPointsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, user_id: UserId, points: u64) {
        if let Ok(mut balances) = self.balances.write() {
            balances.insert(user_id, points);
        }
    }
}

impl PointsLedger for InMemoryPointsLedger {
    fn balance(&self, user_id: UserId) -> Result<u64, GatewayError> {
        let balances = self
            .balances
            .read()
            .map_err(|_| GatewayError::Unavailable("points lock poisoned".to_string()))?;
        Ok(balances.get(&user_id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request() -> RefundRequest {
        RefundRequest {
            order_id: OrderId::new(),
            order_no: OrderNo::generate(Utc::now()),
            transaction_id: "tx-1".to_string(),
            amount: Money::from_units(10),
            reason: "damaged".to_string(),
        }
    }

    #[test]
    fn scripted_gateway_failure_records_nothing() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.fail_refunds(Some(GatewayError::Unavailable("timeout".to_string())));
        assert!(gateway.refund(&request()).is_err());
        assert!(gateway.refunds().is_empty());

        gateway.fail_refunds(None);
        assert!(gateway.refund(&request()).is_ok());
        assert_eq!(gateway.refunds().len(), 1);
    }

    #[test]
    fn unknown_user_has_zero_points() {
        let ledger = InMemoryPointsLedger::new();
        assert_eq!(ledger.balance(UserId::new()).unwrap(), 0);
    }
}
