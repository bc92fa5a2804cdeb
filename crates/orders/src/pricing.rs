//! Order totals, computed once from price snapshots at creation time.

use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Money, ValueObject};

use crate::delivery::{Delivery, DeliveryMethod};
use crate::order::OrderLine;

/// Amounts captured on an order. `pay_amount` is what the gateway must collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    /// Sum of list price × quantity.
    pub goods_total: Money,
    /// Sum of (list − sale) × quantity.
    pub discount_amount: Money,
    pub coupon_amount: Money,
    pub delivery_fee: Money,
    pub pay_amount: Money,
}

impl ValueObject for OrderTotals {}

impl OrderTotals {
    /// Goods value after markdowns; what a coupon applies to.
    pub fn merchandise_subtotal(&self) -> Money {
        self.goods_total.saturating_sub(self.discount_amount)
    }

    /// Re-derive `pay_amount` from the components.
    pub fn expected_pay_amount(&self) -> Money {
        self.merchandise_subtotal().saturating_sub(self.coupon_amount) + self.delivery_fee
    }

    pub fn check_consistent(&self) -> DomainResult<()> {
        if self.discount_amount > self.goods_total {
            return Err(DomainError::invariant("discount exceeds goods total"));
        }
        if self.coupon_amount > self.merchandise_subtotal() {
            return Err(DomainError::invariant("coupon exceeds merchandise subtotal"));
        }
        if self.pay_amount != self.expected_pay_amount() {
            return Err(DomainError::invariant(format!(
                "pay amount {} does not match components ({})",
                self.pay_amount,
                self.expected_pay_amount()
            )));
        }
        Ok(())
    }
}

/// Storefront pricing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRules {
    pub express_fee: Money,
    /// Express delivery is free when the merchandise subtotal reaches this amount.
    pub free_delivery_threshold: Option<Money>,
    /// Loyalty points required per whole currency unit paid.
    pub points_per_unit: u32,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            express_fee: Money::from_units(10),
            free_delivery_threshold: Some(Money::from_units(99)),
            points_per_unit: 1,
        }
    }
}

impl PricingRules {
    /// Goods total and markdown discount for a set of lines.
    pub fn merchandise(lines: &[OrderLine]) -> (Money, Money) {
        let goods = lines.iter().map(OrderLine::list_total).sum();
        let discount = lines.iter().map(OrderLine::markdown_total).sum();
        (goods, discount)
    }

    pub fn delivery_fee(&self, method: DeliveryMethod, merchandise_subtotal: Money) -> Money {
        match method {
            DeliveryMethod::Pickup => Money::ZERO,
            DeliveryMethod::Express => match self.free_delivery_threshold {
                Some(threshold) if merchandise_subtotal >= threshold => Money::ZERO,
                _ => self.express_fee,
            },
        }
    }

    /// Full quote. `coupon_amount` must already be capped at the merchandise subtotal.
    pub fn quote(&self, lines: &[OrderLine], delivery: &Delivery, coupon_amount: Money) -> OrderTotals {
        let (goods_total, discount_amount) = Self::merchandise(lines);
        let subtotal = goods_total.saturating_sub(discount_amount);
        let coupon_amount = coupon_amount.min(subtotal);
        let delivery_fee = self.delivery_fee(delivery.method(), subtotal);
        OrderTotals {
            goods_total,
            discount_amount,
            coupon_amount,
            delivery_fee,
            pay_amount: subtotal.saturating_sub(coupon_amount) + delivery_fee,
        }
    }

    pub fn required_points(&self, pay_amount: Money) -> u64 {
        pay_amount.units_ceil() * u64::from(self.points_per_unit)
    }
}
